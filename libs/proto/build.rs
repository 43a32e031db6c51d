use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so builds do not depend on a system install.
    let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
    std::env::set_var("PROTOC", protoc);

    let proto_root = PathBuf::from("../../api/proto");

    let protos = [
        "fleet/cluster/v1/state.proto",
        "fleet/cluster/v1/cluster.proto",
    ];

    let proto_paths: Vec<PathBuf> = protos.iter().map(|p| proto_root.join(p)).collect();

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&proto_paths, &[&proto_root])?;

    for proto in &protos {
        println!(
            "cargo:rerun-if-changed={}",
            proto_root.join(proto).display()
        );
    }

    Ok(())
}

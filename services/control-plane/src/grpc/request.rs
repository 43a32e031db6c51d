//! Request field resolution shared by every handler.

use std::str::FromStr;

use fleet_id::IdError;
use tonic::metadata::MetadataMap;
use tonic::Status;

pub const REGION_HEADER: &str = "x-fleet-region";
pub const CLUSTER_ID_HEADER: &str = "x-fleet-cluster-id";

fn header<'a>(metadata: &'a MetadataMap, name: &str) -> Option<&'a str> {
    metadata
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Region from the body, falling back to the `x-fleet-region` header.
pub fn region(metadata: &MetadataMap, body: &str) -> Result<String, Status> {
    let body = body.trim();
    if !body.is_empty() {
        return Ok(body.to_string());
    }
    header(metadata, REGION_HEADER)
        .map(str::to_string)
        .ok_or_else(|| Status::invalid_argument("region is required"))
}

/// Cluster ID from the body, falling back to the `x-fleet-cluster-id` header.
pub fn cluster_id(metadata: &MetadataMap, body: &str) -> Option<String> {
    let body = body.trim();
    if !body.is_empty() {
        return Some(body.to_string());
    }
    header(metadata, CLUSTER_ID_HEADER).map(str::to_string)
}

pub fn parse_id<T>(field: &str, value: &str) -> Result<T, Status>
where
    T: FromStr<Err = IdError>,
{
    value
        .parse()
        .map_err(|e: IdError| Status::invalid_argument(format!("invalid {field}: {e}")))
}

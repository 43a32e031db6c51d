//! # fleet-id
//!
//! Typed resource IDs and the shared version cursor for the fleet control plane.
//!
//! ## ID Format
//!
//! Resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `dep_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `snt_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `ins_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! The prefix keeps a sentinel ID from being passed where a deployment ID is
//! expected, both in Rust and on the wire.
//!
//! ## Versions
//!
//! [`Version`] is the per-region, cross-kind cursor agents resume from. It is
//! assigned by an external generator and only ever compared here.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

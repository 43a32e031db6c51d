//! Shared-secret authentication for every gRPC call.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tonic::service::Interceptor;
use tonic::{Request, Status};

pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Checks `authorization: Bearer <token>` before any handler runs.
#[derive(Clone)]
pub struct Authenticator {
    token: Arc<[u8]>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(token: &str) -> Self {
        Self {
            token: Arc::from(token.as_bytes()),
        }
    }

    /// Validates a raw `authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> Result<(), Status> {
        let header = header.ok_or_else(|| Status::unauthenticated("missing authorization"))?;

        let (scheme, presented) = header
            .split_once(' ')
            .ok_or_else(|| Status::unauthenticated("malformed authorization"))?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(Status::unauthenticated("malformed authorization"));
        }
        let presented = presented.trim();
        if presented.is_empty() {
            return Err(Status::unauthenticated("malformed authorization"));
        }

        // Length is not secret; ct_eq returns false on mismatched lengths.
        if bool::from(presented.as_bytes().ct_eq(&self.token)) {
            Ok(())
        } else {
            Err(Status::unauthenticated("invalid token"))
        }
    }
}

impl Interceptor for Authenticator {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let header = match request.metadata().get(AUTHORIZATION_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| Status::unauthenticated("malformed authorization"))?,
            ),
            None => None,
        };
        self.verify(header)?;
        Ok(request)
    }
}

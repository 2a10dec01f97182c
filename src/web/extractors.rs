//! # Custom Axum Extractors
//!
//! Request-scoped context shared by the flow endpoints.

use crate::web::errors::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const SCOPE_HEADER: &str = "x-scope-id";

/// Tenancy tuple taken from the `X-Tenant-Id` and `X-Scope-Id` headers.
///
/// Collection-level endpoints (create, list) require both headers; flow-id
/// endpoints do not, because the record itself carries its tenancy.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub scope_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Result<String, ApiError> {
            let value = parts
                .headers
                .get(name)
                .ok_or_else(|| ApiError::bad_request(format!("missing required header {name}")))?
                .to_str()
                .map_err(|_| ApiError::bad_request(format!("header {name} is not valid UTF-8")))?
                .trim()
                .to_string();
            if value.is_empty() {
                return Err(ApiError::bad_request(format!(
                    "header {name} must not be empty"
                )));
            }
            Ok(value)
        };

        Ok(Self {
            tenant_id: header(TENANT_HEADER)?,
            scope_id: header(SCOPE_HEADER)?,
        })
    }
}

//! Client access credentials and the `client_auth` header encoding.
//!
//! Probes present a client id/secret pair (plus an optional tenant) in
//! message headers. Once the gateway has validated them, it folds the pair
//! into a [`ClientAuth`] context and forwards it downstream as a single
//! JSON-encoded `client_auth` header so consumers never re-validate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A client id/secret access pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAccess {
    /// Client identifier.
    pub id: String,
    /// Client secret.
    pub secret: String,
}

impl ClientAccess {
    /// Create a new access pair.
    #[must_use]
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

/// Authentication context attached to validated probe messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAuth {
    /// The validated access pair.
    pub access: ClientAccess,
    /// Tenant the probe reports under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Error decoding a `client_auth` header.
#[derive(Debug, Error)]
#[error("invalid client_auth header: {0}")]
pub struct ClientAuthParseError(#[from] serde_json::Error);

impl ClientAuth {
    /// Create an auth context from an access pair and optional tenant.
    #[must_use]
    pub const fn new(access: ClientAccess, tenant_id: Option<String>) -> Self {
        Self { access, tenant_id }
    }

    /// Encode for transport in the `client_auth` header.
    #[must_use]
    pub fn to_header(&self) -> String {
        serde_json::to_string(self).expect("ClientAuth serialization is infallible")
    }

    /// Decode from a `client_auth` header value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientAuthParseError`] if the header is not a valid
    /// JSON-encoded auth context.
    pub fn from_header(raw: &str) -> Result<Self, ClientAuthParseError> {
        Ok(serde_json::from_str(raw)?)
    }
}

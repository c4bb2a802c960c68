//! Probe authentication against configured client accesses.
//!
//! Probes present `client_id`/`client_secret` headers (plus an optional
//! `tenant_id`). Validation compares them against the accesses from the
//! `[auth]` configuration section. An empty access list disables
//! authentication entirely, mirroring deployments that run without
//! client access control.
//!
//! A failed validation rejects the triggering bridge event only; the
//! connection stays open for subsequent attempts.

use probegate_core::envelope::header;
use probegate_core::{ClientAccess, ClientAuth, Envelope};
use thiserror::Error;

use crate::config::AuthSection;

/// Probe authentication failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Authentication is enabled but the message carries no credentials.
    #[error("missing client credentials")]
    MissingCredentials,

    /// The presented credentials match no configured access.
    #[error("invalid client credentials")]
    InvalidCredentials,
}

struct ConfiguredAccess {
    access: ClientAccess,
    tenant_id: Option<String>,
}

/// Validates probe credentials on bridge events.
pub struct ProbeAuthenticator {
    accesses: Vec<ConfiguredAccess>,
}

impl ProbeAuthenticator {
    /// Build from the `[auth]` configuration section.
    #[must_use]
    pub fn from_config(section: &AuthSection) -> Self {
        Self {
            accesses: section
                .accesses
                .iter()
                .map(|access| ConfiguredAccess {
                    access: ClientAccess::new(&access.client_id, &access.client_secret),
                    tenant_id: access.tenant_id.clone(),
                })
                .collect(),
        }
    }

    /// Authenticator that accepts every probe (no accesses configured).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            accesses: Vec::new(),
        }
    }

    /// Whether authentication is enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.accesses.is_empty()
    }

    /// Validate the credentials carried by `envelope`.
    ///
    /// Returns `Ok(None)` when authentication is disabled, or the
    /// validated [`ClientAuth`] context. The tenant comes from the
    /// `tenant_id` header, falling back to the access's configured
    /// tenant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when credentials are absent or match no
    /// configured access.
    pub fn validate(&self, envelope: &Envelope) -> Result<Option<ClientAuth>, AuthError> {
        if self.accesses.is_empty() {
            return Ok(None);
        }

        let client_id = envelope
            .header(header::CLIENT_ID)
            .ok_or(AuthError::MissingCredentials)?;
        let client_secret = envelope
            .header(header::CLIENT_SECRET)
            .ok_or(AuthError::MissingCredentials)?;

        let matched = self
            .accesses
            .iter()
            .find(|configured| {
                configured.access.id == client_id && configured.access.secret == client_secret
            })
            .ok_or(AuthError::InvalidCredentials)?;

        let tenant_id = envelope
            .header(header::TENANT_ID)
            .map(str::to_string)
            .or_else(|| matched.tenant_id.clone());

        Ok(Some(ClientAuth::new(matched.access.clone(), tenant_id)))
    }
}

#[cfg(test)]
mod tests {
    use probegate_core::envelope::EventKind;

    use super::*;
    use crate::config::ClientAccessConfig;

    fn authenticator() -> ProbeAuthenticator {
        ProbeAuthenticator::from_config(&AuthSection {
            accesses: vec![ClientAccessConfig {
                client_id: "c1".into(),
                client_secret: "s1".into(),
                tenant_id: Some("t1".into()),
            }],
        })
    }

    fn envelope_with(id: Option<&str>, secret: Option<&str>) -> Envelope {
        let mut env = Envelope::new(EventKind::Publish, "addr");
        if let Some(id) = id {
            env = env.with_header(header::CLIENT_ID, id);
        }
        if let Some(secret) = secret {
            env = env.with_header(header::CLIENT_SECRET, secret);
        }
        env
    }

    #[test]
    fn disabled_authenticator_accepts_anything() {
        let auth = ProbeAuthenticator::disabled();
        assert!(!auth.is_enabled());
        assert_eq!(auth.validate(&envelope_with(None, None)).unwrap(), None);
    }

    #[test]
    fn valid_credentials_produce_auth_context() {
        let auth = authenticator();
        let context = auth
            .validate(&envelope_with(Some("c1"), Some("s1")))
            .unwrap()
            .unwrap();
        assert_eq!(context.access.id, "c1");
        assert_eq!(context.tenant_id.as_deref(), Some("t1"));
    }

    #[test]
    fn tenant_header_wins_over_configured_tenant() {
        let auth = authenticator();
        let env = envelope_with(Some("c1"), Some("s1")).with_header(header::TENANT_ID, "t2");
        let context = auth.validate(&env).unwrap().unwrap();
        assert_eq!(context.tenant_id.as_deref(), Some("t2"));
    }

    #[test]
    fn missing_credentials_rejected() {
        let auth = authenticator();
        assert_eq!(
            auth.validate(&envelope_with(None, None)),
            Err(AuthError::MissingCredentials)
        );
        assert_eq!(
            auth.validate(&envelope_with(Some("c1"), None)),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn wrong_secret_rejected() {
        let auth = authenticator();
        assert_eq!(
            auth.validate(&envelope_with(Some("c1"), Some("wrong"))),
            Err(AuthError::InvalidCredentials)
        );
    }
}

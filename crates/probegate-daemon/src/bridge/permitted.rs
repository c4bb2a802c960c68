//! Direction-partitioned address permission lists.
//!
//! Two static allow-lists are enforced at the transport boundary, BEFORE
//! any gateway logic runs:
//!
//! - **Inbound** (probe → platform): exactly the probe-connected address
//!   plus the remote-registration and instrument-applied/removed
//!   addresses.
//! - **Outbound** (platform → probe): the live-instrument remote address
//!   and its instance-scoped `:<suffix>` variants.
//!
//! Deny-by-default: an empty list permits nothing, and any address
//! outside the list is rejected without reaching application logic.

use probegate_core::address::{platform, probe, processor};
use regex::Regex;

/// One allow-list rule: an exact address or an anchored pattern.
#[derive(Debug, Clone)]
pub enum PermittedAddress {
    /// Address must match exactly.
    Exact(String),
    /// Address must match the full pattern.
    Pattern(Regex),
}

impl PermittedAddress {
    /// Exact-match rule.
    #[must_use]
    pub fn exact(address: impl Into<String>) -> Self {
        Self::Exact(address.into())
    }

    /// Full-match pattern rule. The pattern is anchored on both ends.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Pattern(Regex::new(&format!("^(?:{pattern})$"))?))
    }

    /// Whether `address` satisfies this rule.
    #[must_use]
    pub fn matches(&self, address: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == address,
            Self::Pattern(regex) => regex.is_match(address),
        }
    }
}

/// An ordered allow-list of address rules.
#[derive(Debug, Clone, Default)]
pub struct PermissionList {
    rules: Vec<PermittedAddress>,
}

impl PermissionList {
    /// Build a list from rules.
    #[must_use]
    pub fn new(rules: Vec<PermittedAddress>) -> Self {
        Self { rules }
    }

    /// Whether any rule permits `address`. Empty list permits nothing.
    #[must_use]
    pub fn is_permitted(&self, address: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(address))
    }
}

/// Addresses probes may send toward the platform.
#[must_use]
pub fn inbound_permitted() -> PermissionList {
    PermissionList::new(vec![
        PermittedAddress::exact(platform::PROBE_CONNECTED),
        PermittedAddress::exact(processor::REMOTE_REGISTERED),
        PermittedAddress::exact(processor::LIVE_INSTRUMENT_APPLIED),
        PermittedAddress::exact(processor::LIVE_INSTRUMENT_REMOVED),
    ])
}

/// Addresses the platform may deliver toward probes.
#[must_use]
pub fn outbound_permitted() -> PermissionList {
    let scoped = PermittedAddress::pattern(&format!(
        "{}:.+",
        regex::escape(probe::LIVE_INSTRUMENT_REMOTE)
    ))
    .expect("static outbound pattern is valid");
    PermissionList::new(vec![
        PermittedAddress::exact(probe::LIVE_INSTRUMENT_REMOTE),
        scoped,
    ])
}

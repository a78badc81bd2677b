//! Proxy record and health status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Health state of a single egress proxy.
///
/// ```text
/// untested ──probe ok──▶ available ──probe fail / failure report──▶ failed
///     │                      ▲                                        │
///     └──probe fail──▶ failed └──────────────re-probe ok──────────────┘
/// ```
///
/// An operator proxy reload is the only way back to `untested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    /// Never probed, or reset by an operator reload
    #[default]
    Untested,
    /// Last probe succeeded
    Available,
    /// Last probe failed or a transport failure was reported
    Failed,
}

impl ProxyStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Same-state moves are accepted as no-ops. Moving back to `Untested`
    /// is reserved for operator reloads and never goes through this check.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Untested, Self::Untested)
                | (Self::Untested, Self::Available)
                | (Self::Untested, Self::Failed)
                | (Self::Available, Self::Available)
                | (Self::Available, Self::Failed)
                | (Self::Failed, Self::Failed)
                | (Self::Failed, Self::Available)
        )
    }

    /// Result of a probe expressed as a status.
    pub const fn from_probe(ok: bool) -> Self {
        if ok {
            Self::Available
        } else {
            Self::Failed
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Untested => "untested",
            Self::Available => "available",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "untested" => Ok(Self::Untested),
            "available" => Ok(Self::Available),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown proxy status '{}'", other)),
        }
    }
}

/// A proxy known to the pool.
///
/// `assigned_accounts` mirrors the binding map: it contains exactly the
/// accounts whose binding points at `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    /// Normalized proxy url, unique key
    pub url: String,
    /// Current health state
    #[serde(default)]
    pub status: ProxyStatus,
    /// Accounts currently bound to this proxy
    #[serde(default)]
    pub assigned_accounts: BTreeSet<String>,
}

impl ProxyRecord {
    /// New record in the `untested` state with no assignments.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), status: ProxyStatus::Untested, assigned_accounts: BTreeSet::new() }
    }

    pub fn with_status(url: impl Into<String>, status: ProxyStatus) -> Self {
        Self { status, ..Self::new(url) }
    }

    /// Number of accounts bound to this proxy.
    pub fn load(&self) -> usize {
        self.assigned_accounts.len()
    }

    pub fn is_unused(&self) -> bool {
        self.assigned_accounts.is_empty()
    }

    /// A proxy that can take an exclusive binding: untested, or available and unused.
    pub fn is_spare(&self) -> bool {
        match self.status {
            ProxyStatus::Untested => true,
            ProxyStatus::Available => self.is_unused(),
            ProxyStatus::Failed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use ProxyStatus::*;

        assert!(Untested.can_transition_to(Available));
        assert!(Untested.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Available));
        assert!(Available.can_transition_to(Failed));

        assert!(!Available.can_transition_to(Untested));
        assert!(!Failed.can_transition_to(Untested));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [ProxyStatus::Untested, ProxyStatus::Available, ProxyStatus::Failed] {
            assert_eq!(status.as_str().parse::<ProxyStatus>(), Ok(status));
        }
        assert!("dead".parse::<ProxyStatus>().is_err());
    }

    #[test]
    fn test_spare_detection() {
        let mut record = ProxyRecord::with_status("socks5://10.0.0.1:1080", ProxyStatus::Available);
        assert!(record.is_spare());

        record.assigned_accounts.insert("a@x.com".to_string());
        assert!(!record.is_spare());

        record.status = ProxyStatus::Failed;
        record.assigned_accounts.clear();
        assert!(!record.is_spare());

        assert!(ProxyRecord::new("socks5://10.0.0.2:1080").is_spare());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ProxyStatus::Available).unwrap();
        assert_eq!(json, "\"available\"");
    }
}

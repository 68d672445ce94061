// Version numbering and read-repair between the two stores

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Which version a read targets. Requests use `0` for "latest".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Exact(i64),
}

impl VersionSelector {
    pub fn from_request(version: i64) -> Self {
        if version == 0 {
            VersionSelector::Latest
        } else {
            VersionSelector::Exact(version)
        }
    }
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Source of wall-clock seconds for new version numbers
pub trait VersionClock: Send + Sync {
    fn epoch_seconds(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl VersionClock for SystemClock {
    fn epoch_seconds(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock that only moves when told to. Used by tests and dry runs.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, seconds: i64) {
        self.now.store(seconds, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) -> i64 {
        self.now.fetch_add(seconds, Ordering::SeqCst) + seconds
    }
}

impl VersionClock for ManualClock {
    fn epoch_seconds(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// How a new version number is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Raw epoch seconds. Two appends within one second collide.
    #[default]
    EpochSeconds,
    /// Epoch seconds, bumped past the current latest version when needed.
    Monotonic,
}

impl VersionPolicy {
    pub fn next(&self, now: i64, current_latest: Option<i64>) -> i64 {
        match (self, current_latest) {
            (VersionPolicy::Monotonic, Some(latest)) if latest >= now => latest + 1,
            _ => now,
        }
    }
}

impl std::str::FromStr for VersionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoch" | "epoch_seconds" => Ok(VersionPolicy::EpochSeconds),
            "monotonic" => Ok(VersionPolicy::Monotonic),
            other => Err(format!("unknown version policy: {}", other)),
        }
    }
}

/// Outcome of comparing the relational and cluster views of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionAgreement {
    Consistent(i64),
    Divergent { db_version: i64, cluster_version: i64 },
}

impl VersionAgreement {
    /// Version the cluster label reports; authoritative for reads.
    pub fn cluster_version(&self) -> i64 {
        match self {
            VersionAgreement::Consistent(v) => *v,
            VersionAgreement::Divergent {
                cluster_version, ..
            } => *cluster_version,
        }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, VersionAgreement::Consistent(_))
    }
}

pub fn reconcile_version(db_version: i64, cluster_version: i64) -> VersionAgreement {
    if db_version == cluster_version {
        VersionAgreement::Consistent(db_version)
    } else {
        VersionAgreement::Divergent {
            db_version,
            cluster_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_from_request() {
        assert_eq!(VersionSelector::from_request(0), VersionSelector::Latest);
        assert_eq!(VersionSelector::from_request(5), VersionSelector::Exact(5));
        assert_eq!(VersionSelector::Latest.to_string(), "latest");
    }

    #[test]
    fn test_epoch_policy_ignores_latest() {
        assert_eq!(VersionPolicy::EpochSeconds.next(100, Some(100)), 100);
        assert_eq!(VersionPolicy::EpochSeconds.next(100, None), 100);
    }

    #[test]
    fn test_monotonic_policy_bumps_on_collision() {
        let policy = VersionPolicy::Monotonic;
        assert_eq!(policy.next(100, Some(100)), 101);
        assert_eq!(policy.next(100, Some(150)), 151);
        assert_eq!(policy.next(200, Some(150)), 200);
        assert_eq!(policy.next(200, None), 200);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("monotonic".parse::<VersionPolicy>(), Ok(VersionPolicy::Monotonic));
        assert_eq!("EPOCH".parse::<VersionPolicy>(), Ok(VersionPolicy::EpochSeconds));
        assert!("sometimes".parse::<VersionPolicy>().is_err());
    }

    #[test]
    fn test_reconcile() {
        assert_eq!(reconcile_version(7, 7), VersionAgreement::Consistent(7));
        let divergent = reconcile_version(7, 8);
        assert!(!divergent.is_consistent());
        assert_eq!(divergent.cluster_version(), 8);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.epoch_seconds(), 1_000);
        assert_eq!(clock.advance(5), 1_005);
        clock.set(2_000);
        assert_eq!(clock.epoch_seconds(), 2_000);
    }
}

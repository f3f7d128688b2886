//! Health reporting for external surfaces (e.g. an HTTP `/healthz` endpoint).

use crate::member::StatusSnapshot;
use serde::Serialize;
use std::sync::Arc;

/// Per-member health callback: `Ok(())` when healthy, otherwise the last error.
pub type HealthCheck = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Aggregated health of every member of a conductor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `true` if every member is healthy.
    pub healthy: bool,
    /// One snapshot per member, in registration order.
    pub members: Vec<StatusSnapshot>,
}

impl HealthReport {
    pub(crate) fn from_snapshots(members: Vec<StatusSnapshot>) -> Self {
        Self {
            healthy: members.iter().all(|m| m.healthy),
            members,
        }
    }

    /// Returns the names of unhealthy members.
    pub fn failing(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| !m.healthy)
            .map(|m| m.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberState;
    use time::OffsetDateTime;

    fn snapshot(name: &str, healthy: bool) -> StatusSnapshot {
        StatusSnapshot {
            name: name.to_string(),
            healthy,
            state: if healthy {
                MemberState::Active
            } else {
                MemberState::Failed
            },
            last_error: (!healthy).then(|| "provider unavailable: down".to_string()),
            last_updated: OffsetDateTime::UNIX_EPOCH,
            lease_expires: None,
            serial: None,
        }
    }

    #[test]
    fn healthy_only_if_all_members_are() {
        let report = HealthReport::from_snapshots(vec![snapshot("a", true), snapshot("b", true)]);
        assert!(report.healthy);
        assert_eq!(report.failing().count(), 0);

        let report = HealthReport::from_snapshots(vec![snapshot("a", true), snapshot("b", false)]);
        assert!(!report.healthy);
        assert_eq!(report.failing().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn empty_report_is_healthy() {
        assert!(HealthReport::from_snapshots(Vec::new()).healthy);
    }

    #[test]
    fn serializes_to_json() {
        let report = HealthReport::from_snapshots(vec![snapshot("b", false)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["healthy"], false);
        assert_eq!(json["members"][0]["state"], "failed");
        assert_eq!(json["members"][0]["last_updated"], "1970-01-01T00:00:00Z");
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for activity logs.
/// Controls retention policies and log filtering.
/// Logins are not recorded, so there is no low-retention level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Access-control changes: long-term retention, never auto-delete
    Critical,
    /// Default retention
    #[default]
    Important,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
        }
    }
}

/// Entities that can be recorded in the activity log.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of the event name, e.g. "group" in "group.created"
    fn entity_type() -> &'static str;

    /// The subject ID (usually the entity's primary key)
    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Removals of any kind are always critical.
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "detached" | "removed" | "revoked" => Severity::Critical,
            _ => self.severity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Thing(Uuid);

    impl Loggable for Thing {
        fn entity_type() -> &'static str { "thing" }
        fn subject_id(&self) -> Uuid { self.0 }
    }

    #[test]
    fn removals_escalate_to_critical() {
        let thing = Thing(Uuid::new_v4());
        assert_eq!(thing.severity_for_action("created"), Severity::Important);
        assert_eq!(thing.severity_for_action("detached"), Severity::Critical);
        assert_eq!(thing.severity_for_action("deleted").as_str(), "critical");
    }
}

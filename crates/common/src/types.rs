// Core domain types shared across the dashsync crates.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A declared dashboard intent: "this dashboard should exist at
/// `dir/name.json` with this payload".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    /// Stable identifier assigned by the watch runtime; immutable for the
    /// resource's lifetime.
    pub id: Uuid,
    pub spec: DashboardSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

/// The declared placement and payload of a dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardSpec {
    /// Directory under the working root, e.g. `team-a`.
    pub dir: String,
    /// Filename stem; the materialized file is `dir/name.json`.
    pub name: String,
    /// Raw dashboard JSON, written to disk verbatim.
    pub json: String,
}

impl DashboardSpec {
    /// Field names that differ between `self` and `other`, in declaration
    /// order. Used for update-counter labels and update dispatch.
    pub fn changed_fields(&self, other: &DashboardSpec) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.dir != other.dir {
            changed.push("dir");
        }
        if self.name != other.name {
            changed.push("name");
        }
        if self.json != other.json {
            changed.push("json");
        }
        changed
    }
}

/// Persisted handling outcome for a resource. Absent (`state = None`)
/// before the first create attempt completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,
    #[serde(default)]
    pub reason: String,
}

impl ResourceStatus {
    pub fn is_error(&self) -> bool {
        self.state == Some(SyncState::Error)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Ok,
    Warning,
    Error,
}

/// Status change produced by a handler, applied to the persisted resource
/// by the watch runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusPatch {
    pub state: SyncState,
    pub reason: String,
}

impl StatusPatch {
    pub fn ok() -> Self {
        Self { state: SyncState::Ok, reason: String::new() }
    }

    pub fn warning(reason: impl Into<String>) -> Self {
        Self { state: SyncState::Warning, reason: reason.into() }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self { state: SyncState::Error, reason: reason.into() }
    }
}

/// Dashboard identity embedded in the payload, distinct from the
/// resource's own id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardMeta {
    pub uid: String,
    pub title: String,
}

/// Read-mostly mapping from embedded dashboard uid to the set of resource
/// ids that declare it. Built by the watch runtime across all live
/// resources; a uid owned by more than one resource is a conflict.
#[derive(Debug, Clone, Default)]
pub struct UidIndex {
    owners: HashMap<String, BTreeSet<Uuid>>,
}

impl UidIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uid: impl Into<String>, owner: Uuid) {
        self.owners.entry(uid.into()).or_default().insert(owner);
    }

    pub fn remove(&mut self, uid: &str, owner: &Uuid) {
        if let Some(set) = self.owners.get_mut(uid) {
            set.remove(owner);
            if set.is_empty() {
                self.owners.remove(uid);
            }
        }
    }

    /// Resource ids currently declaring `uid`.
    pub fn owners(&self, uid: &str) -> impl Iterator<Item = &Uuid> {
        self.owners.get(uid).into_iter().flatten()
    }

    /// True when any resource other than `owner` declares `uid`.
    pub fn has_other_owner(&self, uid: &str, owner: &Uuid) -> bool {
        self.owners(uid).any(|id| id != owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &str, name: &str, json: &str) -> DashboardSpec {
        DashboardSpec {
            dir: dir.to_string(),
            name: name.to_string(),
            json: json.to_string(),
        }
    }

    #[test]
    fn changed_fields_reports_each_difference() {
        let old = spec("a", "b", "{}");
        assert!(old.changed_fields(&old).is_empty());
        assert_eq!(old.changed_fields(&spec("x", "b", "{}")), vec!["dir"]);
        assert_eq!(old.changed_fields(&spec("a", "y", "{}")), vec!["name"]);
        assert_eq!(old.changed_fields(&spec("a", "b", "[]")), vec!["json"]);
        assert_eq!(
            old.changed_fields(&spec("x", "y", "[]")),
            vec!["dir", "name", "json"]
        );
    }

    #[test]
    fn status_roundtrips_through_json() {
        let status = ResourceStatus {
            state: Some(SyncState::Warning),
            reason: "json_mismatch".to_string(),
        };
        let encoded = serde_json::to_string(&status).unwrap();
        assert!(encoded.contains("\"warning\""));
        let decoded: ResourceStatus = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn absent_status_defaults_to_none_state() {
        let resource: Resource = serde_json::from_str(
            r#"{"id":"00000000-0000-0000-0000-000000000001",
                "spec":{"dir":"a","name":"b","json":"{}"}}"#,
        )
        .unwrap();
        assert_eq!(resource.status.state, None);
        assert!(resource.status.reason.is_empty());
        assert!(!resource.status.is_error());
    }

    #[test]
    fn uid_index_tracks_other_owners() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut index = UidIndex::new();

        index.insert("abc", a);
        assert!(!index.has_other_owner("abc", &a));
        assert!(index.has_other_owner("abc", &b));

        index.insert("abc", b);
        assert!(index.has_other_owner("abc", &a));

        index.remove("abc", &b);
        assert!(!index.has_other_owner("abc", &a));

        index.remove("abc", &a);
        assert_eq!(index.owners("abc").count(), 0);
    }

    #[test]
    fn status_patch_constructors() {
        assert_eq!(StatusPatch::ok().state, SyncState::Ok);
        assert!(StatusPatch::ok().reason.is_empty());
        let warn = StatusPatch::warning("json_mismatch");
        assert_eq!(warn.state, SyncState::Warning);
        assert_eq!(warn.reason, "json_mismatch");
        let err = StatusPatch::error("duplicate_name");
        assert_eq!(err.state, SyncState::Error);
        assert_eq!(err.reason, "duplicate_name");
    }
}

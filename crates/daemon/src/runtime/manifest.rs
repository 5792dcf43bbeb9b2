// Manifest persistence: declarative resource files in the watched
// directory, one JSON document per dashboard.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use dashsync_common::types::{DashboardSpec, ResourceStatus, StatusPatch};

/// On-disk shape of a resource manifest.
///
/// `id` is optional in the file; the runtime assigns one for the entry's
/// lifetime when absent. `status` is written back by the runtime after
/// each handled event. Unknown top-level fields are preserved across
/// status writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub spec: DashboardSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

/// Read and decode a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to decode manifest `{}`", path.display()))
}

/// Write a status patch into the manifest file, leaving every other
/// field untouched.
///
/// Works on the raw JSON value rather than the typed `Manifest` so that
/// fields this daemon does not know about survive the round trip.
pub fn apply_status_patch(path: &Path, patch: &StatusPatch) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest `{}`", path.display()))?;
    let mut value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to decode manifest `{}`", path.display()))?;

    let object = value
        .as_object_mut()
        .with_context(|| format!("manifest `{}` is not a JSON object", path.display()))?;
    object.insert(
        "status".to_string(),
        serde_json::to_value(patch).context("failed to encode status patch")?,
    );

    let mut encoded = serde_json::to_string_pretty(&value).context("failed to encode manifest")?;
    encoded.push('\n');
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write manifest `{}`", path.display()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use dashsync_common::types::SyncState;

    use super::*;

    #[test]
    fn load_decodes_minimal_manifest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dash.json");
        std::fs::write(
            &path,
            r#"{"spec":{"dir":"team-a","name":"dash1","json":"{}"}}"#,
        )
        .unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert!(manifest.id.is_none());
        assert_eq!(manifest.spec.dir, "team-a");
        assert_eq!(manifest.spec.name, "dash1");
        assert_eq!(manifest.status.state, None);
    }

    #[test]
    fn load_keeps_declared_id_and_status() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dash.json");
        std::fs::write(
            &path,
            r#"{"id":"00000000-0000-0000-0000-000000000007",
                "spec":{"dir":"a","name":"b","json":"{}"},
                "status":{"state":"error","reason":"duplicate_name"}}"#,
        )
        .unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(
            manifest.id,
            Some(Uuid::parse_str("00000000-0000-0000-0000-000000000007").unwrap())
        );
        assert_eq!(manifest.status.state, Some(SyncState::Error));
        assert_eq!(manifest.status.reason, "duplicate_name");
    }

    #[test]
    fn load_rejects_manifest_without_spec() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dash.json");
        std::fs::write(&path, r#"{"status":{}}"#).unwrap();
        assert!(load_manifest(&path).is_err());
    }

    #[test]
    fn status_patch_preserves_unknown_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dash.json");
        std::fs::write(
            &path,
            r#"{"spec":{"dir":"a","name":"b","json":"{}"},"labels":{"team":"a"}}"#,
        )
        .unwrap();

        apply_status_patch(&path, &StatusPatch::error("duplicate_name")).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["labels"]["team"], "a");
        assert_eq!(value["status"]["state"], "error");
        assert_eq!(value["status"]["reason"], "duplicate_name");

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.status.state, Some(SyncState::Error));
    }

    #[test]
    fn status_patch_replaces_previous_status() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dash.json");
        std::fs::write(
            &path,
            r#"{"spec":{"dir":"a","name":"b","json":"{}"},
                "status":{"state":"error","reason":"invalid_json"}}"#,
        )
        .unwrap();

        apply_status_patch(&path, &StatusPatch::ok()).unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.status.state, Some(SyncState::Ok));
        assert!(manifest.status.reason.is_empty());
    }

    #[test]
    fn status_patch_fails_on_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.json");
        assert!(apply_status_patch(&path, &StatusPatch::ok()).is_err());
    }
}

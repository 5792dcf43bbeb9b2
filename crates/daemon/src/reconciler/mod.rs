// Reconciliation orchestrator: sequences validation and file-store calls
// for create/update/delete/periodic events and decides status
// transitions.
//
// Holds no state of its own between events; all durable state is the
// resource's status (persisted by the watch runtime) and the filesystem
// (owned by the file store).

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dashsync_common::error::SyncError;
use dashsync_common::path::dashboard_rel_path;
use dashsync_common::types::{DashboardSpec, Resource, StatusPatch, UidIndex};
use dashsync_common::validate::{check_title_not_dir, check_uid_unique, extract_dashboard_meta};

use crate::metrics::SidecarMetrics;
use crate::store::FileStore;

/// Result of one handler invocation.
///
/// A failure is terminal for the triggering event: the patch records the
/// reason and the runtime reports the event upward as a hard failure.
/// Retry policy, if any, belongs to the watch runtime's layer.
#[derive(Debug)]
pub enum HandlerOutcome {
    Handled(Option<StatusPatch>),
    Failed { patch: StatusPatch, error: SyncError },
}

impl HandlerOutcome {
    pub fn patch(&self) -> Option<&StatusPatch> {
        match self {
            Self::Handled(patch) => patch.as_ref(),
            Self::Failed { patch, .. } => Some(patch),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

pub struct Reconciler {
    store: FileStore,
    metrics: Arc<SidecarMetrics>,
}

impl Reconciler {
    pub fn new(store: FileStore, metrics: Arc<SidecarMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Materialize a newly declared dashboard.
    pub fn on_create(&self, resource: &Resource, uid_index: &UidIndex) -> HandlerOutcome {
        self.metrics.inc_created();
        let spec = &resource.spec;

        let result = self.validate_spec(resource, uid_index).and_then(|rel| {
            self.store.create(&rel, &spec.json)?;
            Ok(rel)
        });

        match result {
            Ok(rel) => {
                info!(id = %resource.id, path = rel, "created dashboard");
                HandlerOutcome::Handled(Some(StatusPatch::ok()))
            }
            Err(e) => self.fail(resource.id, "create", e),
        }
    }

    /// Apply a spec change: rename and/or rewrite, with self-healing out
    /// of a previous error state.
    pub fn on_update(
        &self,
        resource: &Resource,
        old_spec: &DashboardSpec,
        uid_index: &UidIndex,
    ) -> HandlerOutcome {
        let new_spec = &resource.spec;
        let changed = old_spec.changed_fields(new_spec);
        for field in &changed {
            self.metrics.inc_updated(field);
        }
        info!(id = %resource.id, fields = ?changed, "resource updated");

        let json_changed = changed.contains(&"json");
        if json_changed {
            if let Err(e) = self.validate_payload(resource, uid_index) {
                // The old file is left untouched when the new payload is
                // invalid.
                return self.fail(resource.id, "update", e);
            }
        }

        let old_rel = match dashboard_rel_path(&old_spec.dir, &old_spec.name) {
            Ok(rel) => rel,
            Err(e) => return self.fail(resource.id, "update", e.into()),
        };
        let new_rel = match dashboard_rel_path(&new_spec.dir, &new_spec.name) {
            Ok(rel) => rel,
            Err(e) => return self.fail(resource.id, "update", e.into()),
        };

        if resource.status.is_error() {
            info!(
                id = %resource.id,
                reason = resource.status.reason,
                "resource in error state, probing for self-heal"
            );
            // Error conditions are expected to end with no file present,
            // so a recreate is the usual repair.
            match self.store.check(&new_rel, None) {
                Err(SyncError::NoFileExists) => {
                    info!(id = %resource.id, "fixing error with create");
                    return self.on_create(resource, uid_index);
                }
                Ok(()) => info!(id = %resource.id, "fixing error with update"),
                Err(e) => {
                    info!(id = %resource.id, error = %e, "unexpected probe failure in error state");
                }
            }
        }

        let path_changed = old_rel != new_rel;
        let result = self.store.update(
            &old_rel,
            path_changed.then_some(new_rel.as_str()),
            json_changed.then_some(new_spec.json.as_str()),
        );

        match result {
            Ok(()) => {
                info!(id = %resource.id, path = new_rel, fields = ?changed, "updated dashboard");
                HandlerOutcome::Handled(Some(StatusPatch::ok()))
            }
            Err(SyncError::NothingToDo) => {
                debug!(id = %resource.id, path = new_rel, "update found nothing to do");
                HandlerOutcome::Handled(None)
            }
            Err(e) => {
                // Remove the stale file at the old path so a failed
                // migration does not leave an orphan the resource no
                // longer points at.
                error!(id = %resource.id, path = old_rel, "deleting original file after failed update");
                self.delete_rel(resource.id, &old_rel);
                self.fail(resource.id, "update", e)
            }
        }
    }

    /// Remove the materialized file for a vanishing resource. Never
    /// fails: the resource is gone regardless, so there is no corrective
    /// action to report.
    pub fn on_delete(&self, resource: &Resource) -> HandlerOutcome {
        self.metrics.inc_deleted();

        if resource.status.is_error() {
            info!(id = %resource.id, "fixing error with delete");
        }

        match dashboard_rel_path(&resource.spec.dir, &resource.spec.name) {
            Ok(rel) => self.delete_rel(resource.id, &rel),
            Err(e) => {
                warn!(id = %resource.id, error = %e, "could not compose path during delete");
            }
        }

        HandlerOutcome::Handled(None)
    }

    /// Periodic divergence check between declared and on-disk state.
    pub fn on_reconcile(&self, resource: &Resource, uid_index: &UidIndex) -> HandlerOutcome {
        // Errors are not auto-corrected by periodic reconciliation; only
        // an explicit update moves a resource out of the error state.
        if resource.status.is_error() {
            return HandlerOutcome::Handled(None);
        }

        let rel = match dashboard_rel_path(&resource.spec.dir, &resource.spec.name) {
            Ok(rel) => rel,
            Err(e) => {
                info!(id = %resource.id, error = %e, "unexpected error when checking file");
                return HandlerOutcome::Handled(None);
            }
        };

        match self.store.check(&rel, Some(&resource.spec.json)) {
            Ok(()) => HandlerOutcome::Handled(None),
            Err(SyncError::NoFileExists) => {
                warn!(id = %resource.id, path = rel, "recreating missing file");
                self.on_create(resource, uid_index)
            }
            Err(e @ SyncError::JsonMismatch) => {
                // Drift favors the on-disk file: out-of-band edits are
                // assumed intentional and are not overwritten.
                warn!(
                    id = %resource.id,
                    path = rel,
                    "json drift detected, configured not to reconcile drift"
                );
                HandlerOutcome::Handled(Some(StatusPatch::warning(e.code())))
            }
            Err(e) => {
                info!(id = %resource.id, error = %e, "unexpected error when checking file");
                HandlerOutcome::Handled(None)
            }
        }
    }

    /// Run the payload checks shared by create and update, returning the
    /// embedded meta on success.
    fn validate_payload(
        &self,
        resource: &Resource,
        uid_index: &UidIndex,
    ) -> Result<(), SyncError> {
        let spec = &resource.spec;
        let meta = extract_dashboard_meta(&spec.json)?;
        check_uid_unique(&meta.uid, &resource.id, uid_index)?;
        check_title_not_dir(&meta.title, &spec.dir)?;
        Ok(())
    }

    /// Full create-path validation: payload checks plus path composition.
    fn validate_spec(
        &self,
        resource: &Resource,
        uid_index: &UidIndex,
    ) -> Result<String, SyncError> {
        let spec = &resource.spec;
        let rel = dashboard_rel_path(&spec.dir, &spec.name)?;
        self.validate_payload(resource, uid_index)?;
        Ok(rel)
    }

    /// Logged-only delete used by the delete handler and the failed-update
    /// cleanup path.
    fn delete_rel(&self, id: Uuid, rel: &str) {
        match self.store.delete(rel) {
            Ok(()) => info!(id = %id, path = rel, "deleted dashboard"),
            Err(e) => {
                // Deleting an already-vanished file is not an error worth
                // surfacing; the declared state no longer includes it.
                warn!(id = %id, path = rel, error = %e, "unexpected error during delete");
            }
        }
    }

    fn fail(&self, id: Uuid, op: &str, error: SyncError) -> HandlerOutcome {
        let code = error.code();
        self.metrics.inc_error(code);
        error!(id = %id, op, reason = code, "handler failed: {error}");
        HandlerOutcome::Failed { patch: StatusPatch::error(code), error }
    }
}

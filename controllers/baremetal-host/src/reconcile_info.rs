//! Per-reconcile context.
//!
//! Handlers never talk to the Kubernetes API. They work on a private copy of
//! the host and record everything the controller has to apply afterwards:
//! status changes, annotations to drop, finalizer removal and events.

use crate::action_result::ActionResult;
use crds::{
    BareMetalHost, BareMetalHostStatus, CredentialsStatus, ErrorType, OperationalStatus,
    REBOOT_ANNOTATION_PREFIX, RebootAnnotationArguments, RebootMode,
};
use std::collections::BTreeSet;
use tracing::info;

/// An event to publish on the host once status is saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub reason: String,
    pub message: String,
    pub warning: bool,
}

#[derive(Debug)]
pub struct ReconcileInfo {
    /// Working copy of the host for spec and metadata
    pub host: BareMetalHost,
    /// Status as it will be written back when the result is dirty
    pub status: BareMetalHostStatus,
    /// Fingerprint of the credentials Secret in use, if any
    pub credentials: Option<CredentialsStatus>,
    pub events: Vec<HostEvent>,
    /// Annotations handlers consumed
    pub removed_annotations: BTreeSet<String>,
    /// Set once deletion is complete
    pub finalizer_removed: bool,
}

impl ReconcileInfo {
    pub fn new(host: BareMetalHost, credentials: Option<CredentialsStatus>) -> Self {
        Self {
            status: host.status_or_default(),
            host,
            credentials,
            events: Vec::new(),
            removed_annotations: BTreeSet::new(),
            finalizer_removed: false,
        }
    }

    pub fn publish_event(&mut self, reason: &str, message: impl Into<String>) {
        self.events.push(HostEvent {
            reason: reason.to_string(),
            message: message.into(),
            warning: false,
        });
    }

    fn publish_warning(&mut self, reason: &str, message: impl Into<String>) {
        self.events.push(HostEvent {
            reason: reason.to_string(),
            message: message.into(),
            warning: true,
        });
    }

    /// Set the operational status, reporting whether it changed.
    pub fn set_operational_status(&mut self, status: OperationalStatus) -> bool {
        let current = &mut self.status.operational_status;
        if *current == status {
            return false;
        }
        *current = status;
        true
    }

    /// Drop any recorded error and set `status`.
    pub fn clear_error_with_status(&mut self, status: OperationalStatus) -> bool {
        let mut dirty = self.set_operational_status(status);
        if self.status.error_type.take().is_some() {
            dirty = true;
        }
        if !self.status.error_message.is_empty() {
            self.status.error_message.clear();
            dirty = true;
        }
        dirty
    }

    /// Drop any recorded error and go back to OK.
    pub fn clear_error(&mut self) -> bool {
        self.clear_error_with_status(OperationalStatus::Ok)
    }

    /// Record a backend-reported failure on the host and emit its event.
    pub fn record_action_failure(&mut self, error_type: ErrorType, message: &str) -> ActionResult {
        let status = &mut self.status;
        status.operational_status = OperationalStatus::Error;
        status.error_type = Some(error_type);
        status.error_message = message.to_string();
        status.error_count += 1;
        let error_count = status.error_count;

        self.publish_warning(error_type.event_reason(), message);

        ActionResult::Failed {
            dirty: true,
            error_type,
            error_count,
        }
    }

    /// Mark the host as waiting for backend capacity.
    pub fn record_action_delayed(&mut self) -> ActionResult {
        self.set_operational_status(OperationalStatus::Delayed);
        ActionResult::Delayed
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        self.status.error_type
    }

    pub fn has_error_type(&self, error_type: ErrorType) -> bool {
        self.error_type() == Some(error_type)
    }

    /// Remove an annotation from the working copy and remember to drop it.
    pub fn remove_annotation(&mut self, key: &str) -> bool {
        let removed = self
            .host
            .metadata
            .annotations
            .as_mut()
            .is_some_and(|a| a.remove(key).is_some());
        if removed {
            self.removed_annotations.insert(key.to_string());
        }
        removed
    }

    /// Reboot annotations currently on the host.
    fn reboot_annotations(&self) -> Vec<(String, String)> {
        self.host
            .metadata
            .annotations
            .iter()
            .flatten()
            .filter(|(key, _)| is_reboot_annotation(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Whether a reboot was requested and in which mode.
    ///
    /// With `expect_force`, only annotations asking for a forced reboot
    /// count. A hard request from any client wins over soft ones.
    pub fn reboot_requested(&mut self, expect_force: bool) -> (bool, RebootMode) {
        let mut requested = false;
        let mut mode = RebootMode::Soft;

        for (_, value) in self.reboot_annotations() {
            let args = self.reboot_arguments(&value);
            if expect_force && !args.force {
                continue;
            }
            requested = true;
            if args.mode == RebootMode::Hard {
                mode = RebootMode::Hard;
            }
        }
        (requested, mode)
    }

    fn reboot_arguments(&mut self, value: &str) -> RebootAnnotationArguments {
        if value.is_empty() {
            info!("No reboot annotation value specified, assuming soft-reboot.");
            return RebootAnnotationArguments::default();
        }
        serde_json::from_str(value).unwrap_or_else(|_| {
            info!("Could not parse reboot annotation ({:?}) - invalid json, assuming soft-reboot", value);
            self.publish_event(
                "InvalidAnnotationValue",
                format!("could not parse reboot annotation ({value}) - invalid json, assuming soft-reboot"),
            );
            RebootAnnotationArguments::default()
        })
    }

    /// Remove every reboot annotation.
    pub fn clear_reboot_annotations(&mut self) -> bool {
        let mut dirty = false;
        for (key, _) in self.reboot_annotations() {
            dirty |= self.remove_annotation(&key);
        }
        dirty
    }
}

/// True for `reboot.<group>` and `reboot.<group>/<suffix>`.
pub fn is_reboot_annotation(key: &str) -> bool {
    key == REBOOT_ANNOTATION_PREFIX
        || key
            .strip_prefix(REBOOT_ANNOTATION_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

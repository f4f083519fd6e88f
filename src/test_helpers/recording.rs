//! Audit sinks that keep what they receive.

use crate::audit::{FailureNotification, Notifier, OpsLog, OpsLogEntry};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct RecordingOpsLog {
    entries: Mutex<Vec<OpsLogEntry>>,
}

impl RecordingOpsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OpsLogEntry> {
        self.entries.lock().clone()
    }

    /// Actions recorded for `subject_id`, in order
    pub fn actions_for(&self, subject_id: &str) -> Vec<(String, bool)> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.subject.id == subject_id)
            .map(|e| (e.action.clone(), e.success))
            .collect()
    }
}

impl OpsLog for RecordingOpsLog {
    fn log_event(&self, entry: OpsLogEntry) {
        self.entries.lock().push(entry);
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<FailureNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<FailureNotification> {
        self.notifications.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_failure(&self, notification: FailureNotification) {
        self.notifications.lock().push(notification);
    }
}

use crate::pose_store::PoseStore;
use crate::service::ServiceListener;
use crate::types::{PoseSample, RawPose, ServiceEvent};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Host-side receiver for area description saving progress.
pub trait ProgressSink: Send + Sync {
    /// `progress` is in 1..=100.
    fn on_saving_progress(&self, progress: u8);
}

/// Latest value reported by the service for each event key.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<BTreeMap<String, String>>,
}

impl EventLog {
    pub fn record(&self, event: &ServiceEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(event.key.clone(), event.value.clone());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// One `key: value` line per event key, sorted by key.
    pub fn event_string(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(k, v)| format!("{}: {}\n", k, v))
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Adapter registered with the service; runs on the service's callback thread.
///
/// Pose records go to the [`PoseStore`], events to the [`EventLog`], saving
/// progress to the attached host sink. Anything malformed or arriving while
/// the bridge is closed is dropped here and never unwinds into the caller.
pub struct CallbackBridge {
    poses: Arc<PoseStore>,
    events: EventLog,
    /// Held across each forward so `detach_host` waits out an in-flight call.
    host: Mutex<Option<Arc<dyn ProgressSink>>>,
    accepting: AtomicBool,
    dropped: AtomicU64,
}

impl CallbackBridge {
    pub fn new(poses: Arc<PoseStore>) -> Self {
        Self {
            poses,
            events: EventLog::default(),
            host: Mutex::new(None),
            accepting: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Start accepting pose, event and progress callbacks.
    pub fn open(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    /// Stop accepting pose, event and progress callbacks.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Number of callbacks dropped as malformed, late or after teardown.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn attach_host(&self, sink: Arc<dyn ProgressSink>) {
        *self.host.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// Clear the host reference. Returns `true` if one was attached.
    pub fn detach_host(&self) -> bool {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn has_host(&self) -> bool {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn drop_event(&self, what: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        log::trace!("dropping {}", what);
    }

    fn handle_pose(&self, raw: &RawPose) {
        if !self.is_open() {
            self.drop_event("pose received while disconnected");
            return;
        }
        match PoseSample::from_raw(raw) {
            Some(sample) => self.poses.publish(sample),
            None => self.drop_event("malformed pose record"),
        }
    }

    fn handle_progress(&self, progress: i32) {
        if !self.is_open() {
            self.drop_event("saving progress received while disconnected");
            return;
        }
        let progress = match u8::try_from(progress) {
            Ok(p @ 1..=100) => p,
            _ => {
                self.drop_event("out-of-range saving progress");
                return;
            }
        };

        let host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        match host.as_ref() {
            Some(sink) => {
                let forwarded =
                    panic::catch_unwind(AssertUnwindSafe(|| sink.on_saving_progress(progress)));
                if forwarded.is_err() {
                    log::warn!("progress sink panicked at {}%", progress);
                }
            }
            None => self.drop_event("saving progress after host teardown"),
        }
    }
}

impl ServiceListener for CallbackBridge {
    fn on_pose(&self, pose: &RawPose) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.handle_pose(pose))).is_err() {
            log::warn!("pose callback panicked; sample dropped");
        }
    }

    fn on_event(&self, event: &ServiceEvent) {
        if !self.is_open() {
            self.drop_event("event received while disconnected");
            return;
        }
        if panic::catch_unwind(AssertUnwindSafe(|| self.events.record(event))).is_err() {
            log::warn!("event callback panicked; event dropped");
        }
    }

    fn on_saving_progress(&self, progress: i32) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.handle_progress(progress))).is_err() {
            log::warn!("progress callback panicked; notification dropped");
        }
    }
}

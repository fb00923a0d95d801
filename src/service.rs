//! Boundary to the external tracking service.
//!
//! Everything behind [`TrackingService`] (pose estimation, relocalization,
//! area description storage) is owned by the service. Backends call back into
//! a [`ServiceListener`] from a thread they own.

use crate::error::ServiceError;
use crate::types::{RawPose, ServiceConfig, ServiceEvent};
use std::sync::Arc;

/// Receiver for asynchronous notifications from the service thread.
///
/// Implementations must return quickly and must not panic.
pub trait ServiceListener: Send + Sync {
    fn on_pose(&self, pose: &RawPose);

    fn on_event(&self, event: &ServiceEvent);

    /// Area description saving progress, 1..=100 when well-formed.
    fn on_saving_progress(&self, progress: i32);
}

/// Capability set of the external tracking service.
pub trait TrackingService: Send + Sync {
    /// Installed service version number.
    fn version(&self) -> Result<u32, ServiceError>;

    /// Human-readable version string of the installed service.
    fn version_name(&self) -> String {
        match self.version() {
            Ok(v) => v.to_string(),
            Err(_) => "unknown".to_string(),
        }
    }

    fn configure(&self, config: &ServiceConfig) -> Result<(), ServiceError>;

    /// Start tracking and deliver callbacks to `listener` until `disconnect`.
    fn connect(&self, listener: Arc<dyn ServiceListener>) -> Result<(), ServiceError>;

    /// Stop tracking. No callbacks are delivered once this returns.
    fn disconnect(&self);

    fn reset_motion_tracking(&self);

    fn list_area_descriptions(&self) -> Result<Vec<String>, ServiceError>;

    /// `Ok(None)` when the area description exists but has no such key.
    fn metadata(&self, id: &str, key: &str) -> Result<Option<String>, ServiceError>;

    fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<(), ServiceError>;

    fn delete_area_description(&self, id: &str) -> Result<(), ServiceError>;

    /// Persist the area learned in the current session and return its id.
    fn save_area_description(&self) -> Result<String, ServiceError>;
}

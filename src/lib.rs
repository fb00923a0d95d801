//! # area_learning - session glue for an area-learning AR tracking service
//!
//! Sits between an external tracking service and an Android host. Provides:
//! - A lock-protected pose mailbox shared by the service callback thread and
//!   the render thread
//! - The configure / connect / disconnect session lifecycle
//! - Area Description File (ADF) listing, metadata, deletion and saving
//! - JNI entry points operating on an explicitly created native handle
//!
//! ## Quick Start
//! ```no_run
//! use area_learning::sim::{SimConfig, SimService};
//! use area_learning::{AreaLearningApp, SessionConfig};
//! use std::sync::Arc;
//!
//! let app = AreaLearningApp::new(Arc::new(SimService::new(SimConfig::default())));
//! app.setup_config(SessionConfig::default().with_area_learning(true)).unwrap();
//! app.connect().unwrap();
//! std::thread::sleep(std::time::Duration::from_millis(100));
//! println!("{}", app.pose_string());
//! let id = app.save_adf().unwrap();
//! app.adfs().set_metadata(&id, "name", "office").unwrap();
//! app.disconnect();
//! ```

pub mod error;
pub mod types;
pub mod pose_store;
pub mod service;
pub mod bridge;
pub mod registry;
pub mod session;
pub mod view;
pub mod sim;
pub mod jni_bridge;

pub use error::{AreaLearningError, ServiceError};
pub use types::*;
pub use pose_store::PoseStore;
pub use bridge::{CallbackBridge, ProgressSink};
pub use registry::AdfRegistry;
pub use service::{ServiceListener, TrackingService};
pub use session::AreaLearningApp;

/// Result type alias for area_learning operations.
pub type Result<T> = std::result::Result<T, AreaLearningError>;

//! In-process tracking service.
//!
//! Streams a scripted circular trajectory from its own thread, keeps area
//! descriptions in memory and reports saving progress on the tracking thread,
//! the same way the vendor service calls back into its listener. Used by the
//! tests, the demos and as the fallback backend of the JNI layer.

use crate::error::ServiceError;
use crate::service::{ServiceListener, TrackingService};
use crate::types::{CoordinateFrame, PoseStatus, RawPose, ServiceConfig, ServiceEvent};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Samples delivered before the simulated service reports relocalization.
const RELOCALIZE_AFTER_SAMPLES: u64 = 15;

/// Angular speed of the scripted trajectory, rad/s.
const ANGULAR_SPEED: f64 = 0.5;

/// Settings of the simulated service.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Pose rate of the tracking thread. 0 disables automatic poses; only
    /// [`SimService::emit_pose`] then delivers them.
    pub rate_hz: u32,
    pub version: u32,
    pub radius_m: f64,
    pub reject_config: bool,
    pub refuse_connection: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30,
            version: 12000,
            radius_m: 1.0,
            reject_config: false,
            refuse_connection: false,
        }
    }
}

impl SimConfig {
    /// Defaults overridden by `AREA_LEARNING_SIM_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = SimConfig::default();
        SimConfig {
            rate_hz: read_env_u32("AREA_LEARNING_SIM_RATE_HZ", defaults.rate_hz),
            version: read_env_u32("AREA_LEARNING_SIM_VERSION", defaults.version),
            radius_m: read_env_f64("AREA_LEARNING_SIM_RADIUS_M", defaults.radius_m),
            reject_config: false,
            refuse_connection: read_env_bool("AREA_LEARNING_SIM_REFUSE_CONNECT", false),
        }
    }

    pub fn with_rate_hz(mut self, rate_hz: u32) -> Self {
        self.rate_hz = rate_hz;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_radius_m(mut self, radius_m: f64) -> Self {
        self.radius_m = radius_m;
        self
    }

    pub fn rejecting_config(mut self, reject: bool) -> Self {
        self.reject_config = reject;
        self
    }

    pub fn refusing_connection(mut self, refuse: bool) -> Self {
        self.refuse_connection = refuse;
        self
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn read_env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

#[derive(Debug, Default)]
struct AdfStore {
    /// Oldest first.
    entries: Vec<(String, BTreeMap<String, String>)>,
    next_id: u64,
    fail_metadata_writes: bool,
    last_config: Option<ServiceConfig>,
    reset_count: u32,
}

impl AdfStore {
    fn insert(&mut self) -> String {
        self.next_id += 1;
        let id = format!("5a1e0000-0000-4000-8000-{:012x}", self.next_id);
        self.entries.push((id.clone(), BTreeMap::new()));
        id
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut BTreeMap<String, String>> {
        self.entries
            .iter_mut()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, metadata)| metadata)
    }
}

enum Command {
    Save(Sender<String>),
    Reset,
    Stop,
}

struct Worker {
    commands: Sender<Command>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Worker {
    fn stop(mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Simulated [`TrackingService`].
pub struct SimService {
    config: SimConfig,
    store: Arc<Mutex<AdfStore>>,
    listener: Mutex<Option<Arc<dyn ServiceListener>>>,
    worker: Mutex<Option<Worker>>,
}

impl SimService {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            store: Arc::new(Mutex::new(AdfStore::default())),
            listener: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    fn store(&self) -> MutexGuard<'_, AdfStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_listener(&self) -> Option<Arc<dyn ServiceListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Store an empty area description as if learned in an earlier session.
    pub fn insert_area_description(&self) -> String {
        self.store().insert()
    }

    /// Make every metadata write fail with an I/O error.
    pub fn fail_metadata_writes(&self, fail: bool) {
        self.store().fail_metadata_writes = fail;
    }

    /// Configuration passed to the most recent successful `configure`.
    pub fn last_config(&self) -> Option<ServiceConfig> {
        self.store().last_config.clone()
    }

    pub fn reset_count(&self) -> u32 {
        self.store().reset_count
    }

    /// Deliver `pose` to the connected listener from the calling thread.
    pub fn emit_pose(&self, pose: &RawPose) {
        if let Some(listener) = self.current_listener() {
            listener.on_pose(pose);
        }
    }

    /// Deliver an event to the connected listener from the calling thread.
    pub fn emit_event(&self, key: &str, value: &str) {
        if let Some(listener) = self.current_listener() {
            listener.on_event(&ServiceEvent::new(key, value));
        }
    }

    fn send(&self, command: Command) -> Result<(), ServiceError> {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let worker = worker.as_ref().ok_or(ServiceError::NotConnected)?;
        worker
            .commands
            .send(command)
            .map_err(|_| ServiceError::Io("tracking thread stopped".into()))
    }
}

impl TrackingService for SimService {
    fn version(&self) -> Result<u32, ServiceError> {
        Ok(self.config.version)
    }

    fn version_name(&self) -> String {
        format!("sim-{}", self.config.version)
    }

    fn configure(&self, config: &ServiceConfig) -> Result<(), ServiceError> {
        if self.config.reject_config {
            return Err(ServiceError::Rejected(
                "configuration not supported by this service version".into(),
            ));
        }
        if self.is_connected() {
            return Err(ServiceError::Rejected("cannot configure while connected".into()));
        }
        let mut store = self.store();
        if let Some(id) = &config.area_description {
            if store.entry_mut(id).is_none() {
                return Err(ServiceError::UnknownAreaDescription(id.clone()));
            }
        }
        store.last_config = Some(config.clone());
        Ok(())
    }

    fn connect(&self, listener: Arc<dyn ServiceListener>) -> Result<(), ServiceError> {
        if self.config.refuse_connection {
            return Err(ServiceError::PermissionDenied(
                "motion tracking permission not granted".into(),
            ));
        }

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Err(ServiceError::Rejected("already connected".into()));
        }

        let relocalize = self
            .store()
            .last_config
            .as_ref()
            .map(|c| c.area_description.is_some())
            .unwrap_or(false);

        let (commands, receiver) = crossbeam_channel::unbounded();
        let loop_listener = listener.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let thread = std::thread::Builder::new()
            .name("area-learning-sim".into())
            .spawn(move || tracking_loop(loop_listener, receiver, store, config, relocalize))
            .map_err(|e| ServiceError::Io(format!("failed to spawn tracking thread: {}", e)))?;

        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        *worker = Some(Worker {
            commands,
            thread: Some(thread),
        });
        Ok(())
    }

    fn disconnect(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.stop();
        }
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn reset_motion_tracking(&self) {
        if self.send(Command::Reset).is_ok() {
            self.store().reset_count += 1;
        }
    }

    fn list_area_descriptions(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .store()
            .entries
            .iter()
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn metadata(&self, id: &str, key: &str) -> Result<Option<String>, ServiceError> {
        let mut store = self.store();
        let metadata = store
            .entry_mut(id)
            .ok_or_else(|| ServiceError::UnknownAreaDescription(id.to_string()))?;
        Ok(metadata.get(key).cloned())
    }

    fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<(), ServiceError> {
        let mut store = self.store();
        let fail = store.fail_metadata_writes;
        let metadata = store
            .entry_mut(id)
            .ok_or_else(|| ServiceError::UnknownAreaDescription(id.to_string()))?;
        if fail {
            return Err(ServiceError::Io("metadata write failed".into()));
        }
        metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_area_description(&self, id: &str) -> Result<(), ServiceError> {
        let mut store = self.store();
        let before = store.entries.len();
        store.entries.retain(|(entry_id, _)| entry_id != id);
        if store.entries.len() == before {
            return Err(ServiceError::UnknownAreaDescription(id.to_string()));
        }
        Ok(())
    }

    fn save_area_description(&self) -> Result<String, ServiceError> {
        let learning = self
            .store()
            .last_config
            .as_ref()
            .map(|c| c.session.area_learning)
            .unwrap_or(false);
        if !learning {
            return Err(ServiceError::Rejected("area learning is not enabled".into()));
        }

        let (reply, done) = crossbeam_channel::bounded(1);
        self.send(Command::Save(reply))?;
        done.recv()
            .map_err(|_| ServiceError::Io("tracking thread stopped while saving".into()))
    }
}

impl Drop for SimService {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Pose on the scripted circle at `t` seconds since the last reset.
fn trajectory_pose(t: f64, radius: f64, status: PoseStatus) -> RawPose {
    let theta = t * ANGULAR_SPEED;
    let half = theta / 2.0;
    RawPose {
        timestamp: t,
        translation: [radius * theta.cos() - radius, 0.0, radius * theta.sin()],
        orientation: [0.0, half.sin(), 0.0, half.cos()],
        base_frame: CoordinateFrame::StartOfService as i32,
        target_frame: CoordinateFrame::Device as i32,
        status_code: status as i32,
    }
}

fn tracking_loop(
    listener: Arc<dyn ServiceListener>,
    commands: Receiver<Command>,
    store: Arc<Mutex<AdfStore>>,
    config: SimConfig,
    relocalize: bool,
) {
    let period = (config.rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / config.rate_hz as f64));
    let mut origin = Instant::now();
    let mut emitted: u64 = 0;
    let mut relocalized = false;

    log::info!("Simulated tracking started ({} Hz)", config.rate_hz);

    loop {
        let command = match period {
            Some(period) => match commands.recv_timeout(period) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            None => {
                let status = if emitted == 0 {
                    PoseStatus::Initializing
                } else {
                    PoseStatus::Valid
                };
                let t = origin.elapsed().as_secs_f64();
                listener.on_pose(&trajectory_pose(t, config.radius_m, status));
                emitted += 1;

                if relocalize && !relocalized && emitted >= RELOCALIZE_AFTER_SAMPLES {
                    listener.on_pose(&RawPose {
                        timestamp: t,
                        translation: [0.0; 3],
                        orientation: [0.0, 0.0, 0.0, 1.0],
                        base_frame: CoordinateFrame::AreaDescription as i32,
                        target_frame: CoordinateFrame::StartOfService as i32,
                        status_code: PoseStatus::Valid as i32,
                    });
                    listener.on_event(&ServiceEvent::new("Relocalized", "true"));
                    relocalized = true;
                }
            }
            Some(Command::Save(reply)) => {
                for progress in (10..=100).step_by(10) {
                    listener.on_saving_progress(progress);
                }
                let id = store.lock().unwrap_or_else(PoisonError::into_inner).insert();
                let _ = reply.send(id);
            }
            Some(Command::Reset) => {
                origin = Instant::now();
                emitted = 0;
            }
            Some(Command::Stop) => {
                log::info!("Simulated tracking stopping");
                break;
            }
        }
    }
}

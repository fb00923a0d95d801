use crate::bridge::{CallbackBridge, ProgressSink};
use crate::error::AreaLearningError;
use crate::pose_store::PoseStore;
use crate::registry::AdfRegistry;
use crate::service::TrackingService;
use crate::types::{PoseSample, ServiceConfig, SessionConfig, SessionState};
use crate::view::ViewState;
use crate::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    config: Option<SessionConfig>,
    loaded_adf: Option<String>,
}

/// One area-learning session against a [`TrackingService`].
///
/// Lifecycle calls are expected to be serialized by the host; they still take
/// an internal lock so the instance can be shared with the render thread,
/// which only reads poses and never waits on lifecycle work.
pub struct AreaLearningApp {
    pub(crate) service: Arc<dyn TrackingService>,
    poses: Arc<PoseStore>,
    bridge: Arc<CallbackBridge>,
    lifecycle: Mutex<Lifecycle>,
    view: ViewState,
}

impl AreaLearningApp {
    pub fn new(service: Arc<dyn TrackingService>) -> Self {
        let poses = Arc::new(PoseStore::new());
        let bridge = Arc::new(CallbackBridge::new(poses.clone()));
        Self {
            service,
            poses,
            bridge,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Uninitialized,
                config: None,
                loaded_adf: None,
            }),
            view: ViewState::default(),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle().state
    }

    pub fn config(&self) -> Option<SessionConfig> {
        self.lifecycle().config
    }

    /// Returns true if the installed service is at least `minimum_version`.
    pub fn check_version(&self, minimum_version: u32) -> bool {
        match self.service.version() {
            Ok(installed) if installed >= minimum_version => true,
            Ok(installed) => {
                log::error!(
                    "Tracking service version {} is older than required {}",
                    installed,
                    minimum_version
                );
                false
            }
            Err(e) => {
                log::error!("Failed to query tracking service version: {}", e);
                false
            }
        }
    }

    /// Attach the host that receives area description saving progress.
    pub fn attach_activity(&self, sink: Arc<dyn ProgressSink>) {
        self.bridge.attach_host(sink);
    }

    /// Configure a new session.
    ///
    /// Valid while Uninitialized, Configured or Disconnected. A Disconnected
    /// session must be reconfigured before it can connect again; doing so
    /// drops the previous session's pose and relocalization state.
    pub fn setup_config(&self, config: SessionConfig) -> Result<()> {
        let mut lc = self.lifecycle();
        if matches!(lc.state, SessionState::Connected | SessionState::Destroyed) {
            return Err(AreaLearningError::InvalidState {
                operation: "setup_config",
                state: lc.state,
            });
        }

        let area_description = if config.load_existing_map {
            self.most_recent_area_description()?
        } else {
            None
        };

        let service_config = ServiceConfig {
            session: config,
            area_description: area_description.clone(),
        };
        self.service
            .configure(&service_config)
            .map_err(|e| AreaLearningError::Config(e.to_string()))?;

        log::info!(
            "Session configured: area_learning={} load_existing_map={} auto_recovery={} adf={:?}",
            config.area_learning,
            config.load_existing_map,
            config.auto_recovery,
            area_description
        );

        if lc.state == SessionState::Disconnected {
            self.poses.reset();
        }
        lc.state = SessionState::Configured;
        lc.config = Some(config);
        lc.loaded_adf = area_description;
        Ok(())
    }

    fn most_recent_area_description(&self) -> Result<Option<String>> {
        let ids = self
            .service
            .list_area_descriptions()
            .map_err(|e| AreaLearningError::Config(e.to_string()))?;
        let latest = ids.last().cloned();
        if latest.is_none() {
            log::warn!("Loading an existing map was requested but no area descriptions are stored");
        }
        Ok(latest)
    }

    /// Start tracking and register the callback bridge with the service.
    pub fn connect(&self) -> Result<()> {
        let mut lc = self.lifecycle();
        if lc.state != SessionState::Configured {
            return Err(AreaLearningError::InvalidState {
                operation: "connect",
                state: lc.state,
            });
        }

        self.bridge.open();
        if let Err(e) = self.service.connect(self.bridge.clone()) {
            self.bridge.close();
            log::error!("Failed to connect to tracking service: {}", e);
            return Err(AreaLearningError::Connection(e.to_string()));
        }

        lc.state = SessionState::Connected;
        log::info!("Connected to tracking service");
        Ok(())
    }

    /// Release everything held on behalf of the service. Never fails and may
    /// be called any number of times, including after a failed setup.
    pub fn disconnect(&self) {
        let mut lc = self.lifecycle();
        self.release(&mut lc);
        if lc.state != SessionState::Destroyed {
            lc.state = SessionState::Disconnected;
        }
    }

    fn release(&self, lc: &mut Lifecycle) {
        self.bridge.close();
        if lc.state == SessionState::Connected {
            self.service.disconnect();
            log::info!("Disconnected from tracking service");
        }
        lc.config = None;
    }

    /// Detach the host activity and retire the session. Never fails.
    pub fn activity_destroyed(&self) {
        let mut lc = self.lifecycle();
        self.release(&mut lc);
        if self.bridge.detach_host() {
            log::info!("Host activity detached");
        }
        lc.state = SessionState::Destroyed;
    }

    /// Persist the area learned so far. Requires a connected session with
    /// area learning enabled.
    ///
    /// The lifecycle lock is released before the service is asked to save, so
    /// a progress sink may query the session while the save is running.
    pub fn save_adf(&self) -> Result<String> {
        {
            let lc = self.lifecycle();
            let learning = lc.config.map(|c| c.area_learning).unwrap_or(false);
            if lc.state != SessionState::Connected || !learning {
                return Err(AreaLearningError::InvalidState {
                    operation: "save_adf",
                    state: lc.state,
                });
            }
        }

        let id = self
            .service
            .save_area_description()
            .map_err(|e| AreaLearningError::Persist(e.to_string()))?;
        log::info!("Saved area description {}", id);
        Ok(id)
    }

    /// Area description facade backed by this session's service.
    pub fn adfs(&self) -> AdfRegistry<'_> {
        AdfRegistry::new(self)
    }

    /// Id of the area description loaded by the current configuration.
    pub fn loaded_adf(&self) -> Option<String> {
        self.lifecycle().loaded_adf.clone()
    }

    pub fn loaded_adf_string(&self) -> String {
        self.loaded_adf().unwrap_or_default()
    }

    pub fn latest_pose(&self) -> Option<PoseSample> {
        self.poses.snapshot()
    }

    pub fn is_relocalized(&self) -> bool {
        self.poses.is_relocalized()
    }

    pub fn pose_string(&self) -> String {
        self.poses.pose_string()
    }

    pub fn event_string(&self) -> String {
        self.bridge.events().event_string()
    }

    pub fn version_string(&self) -> String {
        self.service.version_name()
    }

    pub fn pose_store(&self) -> &Arc<PoseStore> {
        &self.poses
    }

    pub fn bridge(&self) -> &Arc<CallbackBridge> {
        &self.bridge
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn reset_motion_tracking(&self) -> Result<()> {
        let lc = self.lifecycle();
        if lc.state != SessionState::Connected {
            return Err(AreaLearningError::InvalidState {
                operation: "reset_motion_tracking",
                state: lc.state,
            });
        }
        self.service.reset_motion_tracking();
        self.poses.reset();
        log::info!("Motion tracking reset");
        Ok(())
    }

    /// Drop cached pose data and events.
    pub fn delete_resources(&self) {
        self.poses.reset();
        self.bridge.events().clear();
    }
}

impl Drop for AreaLearningApp {
    fn drop(&mut self) {
        let lc = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if lc.state == SessionState::Connected {
            self.bridge.close();
            self.service.disconnect();
            lc.state = SessionState::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceListener;
    use crate::sim::{SimConfig, SimService};
    use crate::types::{CoordinateFrame, FramePair, PoseStatus, RawPose};
    use std::sync::Weak;
    use std::time::Duration;

    fn app_with(config: SimConfig) -> (Arc<SimService>, AreaLearningApp) {
        let service = Arc::new(SimService::new(config));
        let app = AreaLearningApp::new(service.clone());
        (service, app)
    }

    fn manual() -> SimConfig {
        SimConfig::default().with_rate_hz(0)
    }

    fn device_pose(seed: f64) -> RawPose {
        RawPose {
            timestamp: seed,
            translation: [seed, 0.0, 0.0],
            orientation: [0.0, 0.0, 0.0, 1.0],
            base_frame: CoordinateFrame::StartOfService as i32,
            target_frame: CoordinateFrame::Device as i32,
            status_code: PoseStatus::Valid as i32,
        }
    }

    #[derive(Default)]
    struct Progress(Mutex<Vec<u8>>);

    impl ProgressSink for Progress {
        fn on_saving_progress(&self, progress: u8) {
            self.0.lock().unwrap().push(progress);
        }
    }

    #[test]
    fn test_check_version() {
        let (_, app) = app_with(manual().with_version(19000));
        assert!(app.check_version(18000));
        assert!(app.check_version(19000));
        assert!(!app.check_version(20000));
        assert_eq!(app.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (service, app) = app_with(manual());
        assert_eq!(app.state(), SessionState::Uninitialized);

        app.setup_config(SessionConfig::default()).unwrap();
        assert_eq!(app.state(), SessionState::Configured);

        app.connect().unwrap();
        assert_eq!(app.state(), SessionState::Connected);
        assert!(service.is_connected());

        app.disconnect();
        assert_eq!(app.state(), SessionState::Disconnected);
        assert!(!service.is_connected());
    }

    #[test]
    fn test_connect_requires_configuration() {
        let (_, app) = app_with(manual());
        let err = app.connect().unwrap_err();
        assert!(matches!(
            err,
            AreaLearningError::InvalidState {
                operation: "connect",
                state: SessionState::Uninitialized
            }
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (_, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();

        app.disconnect();
        assert_eq!(app.state(), SessionState::Disconnected);
        app.disconnect();
        assert_eq!(app.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_disconnect_after_failed_setup() {
        let (_, app) = app_with(manual().rejecting_config(true));
        assert!(matches!(
            app.setup_config(SessionConfig::default()),
            Err(AreaLearningError::Config(_))
        ));
        app.disconnect();
        assert_eq!(app.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_connection_refused_keeps_configured() {
        let (_, app) = app_with(manual().refusing_connection(true));
        app.setup_config(SessionConfig::default()).unwrap();
        assert!(matches!(app.connect(), Err(AreaLearningError::Connection(_))));
        assert_eq!(app.state(), SessionState::Configured);
        assert!(!app.bridge().is_open());
    }

    #[test]
    fn test_reconnect_requires_reconfiguration() {
        let (_, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        app.disconnect();

        assert!(matches!(
            app.connect(),
            Err(AreaLearningError::InvalidState {
                state: SessionState::Disconnected,
                ..
            })
        ));

        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        assert_eq!(app.state(), SessionState::Connected);
    }

    #[test]
    fn test_config_rejected_while_connected() {
        let (_, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        assert!(matches!(
            app.setup_config(SessionConfig::default()),
            Err(AreaLearningError::InvalidState {
                operation: "setup_config",
                ..
            })
        ));
    }

    #[test]
    fn test_activity_destroyed_from_any_state() {
        let (_, app) = app_with(manual());
        app.activity_destroyed();
        assert_eq!(app.state(), SessionState::Destroyed);

        let (service, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        app.activity_destroyed();
        assert_eq!(app.state(), SessionState::Destroyed);
        assert!(!service.is_connected());

        app.disconnect();
        assert_eq!(app.state(), SessionState::Destroyed);
    }

    #[test]
    fn test_progress_after_activity_destroyed_is_dropped() {
        let (_, app) = app_with(manual());
        let sink = Arc::new(Progress::default());
        app.attach_activity(sink.clone());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();

        app.bridge().on_saving_progress(30);
        app.activity_destroyed();
        app.bridge().on_saving_progress(60);

        assert_eq!(*sink.0.lock().unwrap(), vec![30]);
    }

    #[test]
    fn test_progress_after_disconnect_is_dropped() {
        let (_, app) = app_with(manual());
        let sink = Arc::new(Progress::default());
        app.attach_activity(sink.clone());
        app.setup_config(SessionConfig::default().with_area_learning(true))
            .unwrap();
        app.connect().unwrap();
        app.disconnect();

        app.bridge().on_saving_progress(55);
        assert_eq!(app.state(), SessionState::Disconnected);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    /// Sink that reads session state from inside the progress callback.
    struct SessionReader {
        app: Mutex<Weak<AreaLearningApp>>,
        seen: Mutex<Vec<(u8, SessionState)>>,
    }

    impl ProgressSink for SessionReader {
        fn on_saving_progress(&self, progress: u8) {
            let app = self.app.lock().unwrap().upgrade();
            if let Some(app) = app {
                let _ = app.loaded_adf_string();
                self.seen.lock().unwrap().push((progress, app.state()));
            }
        }
    }

    #[test]
    fn test_progress_sink_can_query_session_during_save() {
        let service = Arc::new(SimService::new(manual()));
        let app = Arc::new(AreaLearningApp::new(service));
        let sink = Arc::new(SessionReader {
            app: Mutex::new(Arc::downgrade(&app)),
            seen: Mutex::new(Vec::new()),
        });
        app.attach_activity(sink.clone());
        app.setup_config(SessionConfig::default().with_area_learning(true))
            .unwrap();
        app.connect().unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let saver = {
            let app = app.clone();
            std::thread::spawn(move || {
                let _ = tx.send(app.save_adf());
            })
        };
        let saved = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("save_adf did not complete");
        saver.join().unwrap();

        let id = saved.unwrap();
        assert!(app.adfs().list_ids().unwrap().contains(&id));
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last(), Some(&(100, SessionState::Connected)));
    }

    #[test]
    fn test_reconfigure_starts_fresh_session() {
        let (service, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        let mut pose = device_pose(2.0);
        pose.base_frame = CoordinateFrame::AreaDescription as i32;
        pose.target_frame = CoordinateFrame::StartOfService as i32;
        service.emit_pose(&pose);
        assert!(app.is_relocalized());
        app.disconnect();

        app.setup_config(SessionConfig::default()).unwrap();
        assert!(!app.is_relocalized());
        assert!(app.latest_pose().is_none());
    }

    #[test]
    fn test_save_requires_area_learning() {
        let (_, app) = app_with(manual());
        assert!(matches!(
            app.save_adf(),
            Err(AreaLearningError::InvalidState { .. })
        ));

        app.setup_config(SessionConfig::default().with_area_learning(false))
            .unwrap();
        app.connect().unwrap();
        assert!(matches!(
            app.save_adf(),
            Err(AreaLearningError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_load_existing_map_uses_latest_adf() {
        let (service, app) = app_with(manual());
        let first = service.insert_area_description();
        let second = service.insert_area_description();
        assert_ne!(first, second);

        app.setup_config(SessionConfig::default().with_existing_map(true))
            .unwrap();
        assert_eq!(app.loaded_adf(), Some(second.clone()));
        assert_eq!(service.last_config().unwrap().area_description, Some(second));
    }

    #[test]
    fn test_load_existing_map_without_adfs() {
        let (_, app) = app_with(manual());
        app.setup_config(SessionConfig::default().with_existing_map(true))
            .unwrap();
        assert_eq!(app.loaded_adf(), None);
        assert_eq!(app.loaded_adf_string(), "");
    }

    #[test]
    fn test_reset_motion_tracking_clears_poses() {
        let (service, app) = app_with(manual());
        assert!(app.reset_motion_tracking().is_err());

        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        service.emit_pose(&device_pose(1.0));
        assert!(app.latest_pose().is_some());

        app.reset_motion_tracking().unwrap();
        assert!(app.latest_pose().is_none());
        assert_eq!(service.reset_count(), 1);
    }

    #[test]
    fn test_relocalization_reported() {
        let (service, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        assert!(!app.is_relocalized());

        let mut pose = device_pose(2.0);
        pose.base_frame = CoordinateFrame::AreaDescription as i32;
        pose.target_frame = CoordinateFrame::StartOfService as i32;
        service.emit_pose(&pose);

        assert!(app.is_relocalized());
        assert_eq!(
            app.latest_pose().unwrap().frame,
            FramePair::AREA_DESCRIPTION_TO_START_OF_SERVICE
        );
    }

    #[test]
    fn test_area_learning_scenario() {
        let (service, app) = app_with(manual());
        let sink = Arc::new(Progress::default());
        app.attach_activity(sink.clone());

        app.setup_config(SessionConfig::default().with_area_learning(true))
            .unwrap();
        app.connect().unwrap();

        let a = device_pose(4.0);
        service.emit_pose(&a);
        let snapshot = app.latest_pose().unwrap();
        assert_eq!(snapshot, PoseSample::from_raw(&a).unwrap());

        let id = app.save_adf().unwrap();
        assert!(app.adfs().list_ids().unwrap().contains(&id));
        assert_eq!(sink.0.lock().unwrap().last(), Some(&100));

        assert!(matches!(
            app.adfs().get_metadata(&id, "name"),
            Err(AreaLearningError::NotFound { .. })
        ));
        app.adfs().set_metadata(&id, "name", "office").unwrap();
        assert_eq!(app.adfs().get_metadata(&id, "name").unwrap(), "office");
    }

    #[test]
    fn test_delete_resources() {
        let (service, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        service.emit_pose(&device_pose(1.0));
        service.emit_event("FisheyeOverExposed", "true");
        assert_eq!(app.event_string(), "FisheyeOverExposed: true\n");

        app.delete_resources();
        assert!(app.latest_pose().is_none());
        assert_eq!(app.event_string(), "");
        assert_eq!(app.pose_string(), "status: no data");
    }

    #[test]
    fn test_drop_disconnects() {
        let (service, app) = app_with(manual());
        app.setup_config(SessionConfig::default()).unwrap();
        app.connect().unwrap();
        drop(app);
        assert!(!service.is_connected());
    }
}

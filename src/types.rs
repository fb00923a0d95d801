use std::fmt;

/// Coordinate frames the tracking service reports poses between.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateFrame {
    GlobalWgs84 = 0,
    /// Origin of a learned or loaded area description.
    AreaDescription = 1,
    /// Where the device was when the service started.
    StartOfService = 2,
    PreviousDevicePose = 3,
    Device = 4,
    Imu = 5,
    Display = 6,
    CameraColor = 7,
    CameraDepth = 8,
    CameraFisheye = 9,
    Unknown = -1,
}

impl From<i32> for CoordinateFrame {
    fn from(value: i32) -> Self {
        match value {
            0 => CoordinateFrame::GlobalWgs84,
            1 => CoordinateFrame::AreaDescription,
            2 => CoordinateFrame::StartOfService,
            3 => CoordinateFrame::PreviousDevicePose,
            4 => CoordinateFrame::Device,
            5 => CoordinateFrame::Imu,
            6 => CoordinateFrame::Display,
            7 => CoordinateFrame::CameraColor,
            8 => CoordinateFrame::CameraDepth,
            9 => CoordinateFrame::CameraFisheye,
            _ => CoordinateFrame::Unknown,
        }
    }
}

/// Base and target frame of a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramePair {
    pub base: CoordinateFrame,
    pub target: CoordinateFrame,
}

impl FramePair {
    pub const fn new(base: CoordinateFrame, target: CoordinateFrame) -> Self {
        Self { base, target }
    }

    /// Device motion relative to where the service started.
    pub const START_OF_SERVICE_TO_DEVICE: FramePair =
        FramePair::new(CoordinateFrame::StartOfService, CoordinateFrame::Device);

    /// Device motion relative to the loaded/learned area description.
    pub const AREA_DESCRIPTION_TO_DEVICE: FramePair =
        FramePair::new(CoordinateFrame::AreaDescription, CoordinateFrame::Device);

    /// Reported by the service once it has relocalized against an area description.
    pub const AREA_DESCRIPTION_TO_START_OF_SERVICE: FramePair = FramePair::new(
        CoordinateFrame::AreaDescription,
        CoordinateFrame::StartOfService,
    );
}

/// Tracking status attached to each pose.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseStatus {
    Initializing = 0,
    Valid = 1,
    Invalid = 2,
    Unknown = 3,
}

impl From<i32> for PoseStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => PoseStatus::Initializing,
            1 => PoseStatus::Valid,
            2 => PoseStatus::Invalid,
            _ => PoseStatus::Unknown,
        }
    }
}

impl fmt::Display for PoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoseStatus::Initializing => "initializing",
            PoseStatus::Valid => "valid",
            PoseStatus::Invalid => "invalid",
            PoseStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Pose record exactly as the service hands it to a callback.
///
/// Frames and status are raw integers; they are validated when the record is
/// turned into a [`PoseSample`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPose {
    /// Service timestamp in seconds.
    pub timestamp: f64,
    pub translation: [f64; 3],
    /// Quaternion [qx, qy, qz, qw].
    pub orientation: [f64; 4],
    pub base_frame: i32,
    pub target_frame: i32,
    pub status_code: i32,
}

/// One timestamped rigid-body transform between two frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    /// Service timestamp in seconds.
    pub timestamp: f64,
    /// Translation in meters [x, y, z].
    pub translation: [f64; 3],
    /// Quaternion [qx, qy, qz, qw].
    pub orientation: [f64; 4],
    pub frame: FramePair,
    pub status: PoseStatus,
}

impl PoseSample {
    /// Validate a raw record. Returns `None` for non-finite values or
    /// unrecognised frames/status codes.
    pub fn from_raw(raw: &RawPose) -> Option<PoseSample> {
        let finite = raw.timestamp.is_finite()
            && raw.translation.iter().all(|v| v.is_finite())
            && raw.orientation.iter().all(|v| v.is_finite());
        if !finite {
            return None;
        }

        let frame = FramePair::new(raw.base_frame.into(), raw.target_frame.into());
        if frame.base == CoordinateFrame::Unknown || frame.target == CoordinateFrame::Unknown {
            return None;
        }

        let status = PoseStatus::from(raw.status_code);
        if status == PoseStatus::Unknown {
            return None;
        }

        Some(PoseSample {
            timestamp: raw.timestamp,
            translation: raw.translation,
            orientation: raw.orientation,
            frame,
            status,
        })
    }
}

impl fmt::Display for PoseSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.translation;
        let q = &self.orientation;
        write!(
            f,
            "position (m): [{:.3}, {:.3}, {:.3}]\norientation: [{:.3}, {:.3}, {:.3}, {:.3}]",
            t[0], t[1], t[2], q[0], q[1], q[2], q[3]
        )
    }
}

bitflags::bitflags! {
    /// Session feature flags as they cross the JNI boundary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlags: u32 {
        const AREA_LEARNING = 1 << 0;
        const LOAD_EXISTING_MAP = 1 << 1;
        const AUTO_RECOVERY = 1 << 2;
    }
}

/// Feature flags fixed for the lifetime of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub area_learning: bool,
    pub load_existing_map: bool,
    pub auto_recovery: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            area_learning: false,
            load_existing_map: false,
            auto_recovery: true,
        }
    }
}

impl SessionConfig {
    pub fn with_area_learning(mut self, enabled: bool) -> Self {
        self.area_learning = enabled;
        self
    }

    pub fn with_existing_map(mut self, load: bool) -> Self {
        self.load_existing_map = load;
        self
    }

    pub fn with_auto_recovery(mut self, enabled: bool) -> Self {
        self.auto_recovery = enabled;
        self
    }

    pub fn flags(&self) -> ConfigFlags {
        let mut flags = ConfigFlags::empty();
        flags.set(ConfigFlags::AREA_LEARNING, self.area_learning);
        flags.set(ConfigFlags::LOAD_EXISTING_MAP, self.load_existing_map);
        flags.set(ConfigFlags::AUTO_RECOVERY, self.auto_recovery);
        flags
    }
}

impl From<ConfigFlags> for SessionConfig {
    fn from(flags: ConfigFlags) -> Self {
        SessionConfig {
            area_learning: flags.contains(ConfigFlags::AREA_LEARNING),
            load_existing_map: flags.contains(ConfigFlags::LOAD_EXISTING_MAP),
            auto_recovery: flags.contains(ConfigFlags::AUTO_RECOVERY),
        }
    }
}

/// Configuration handed to the service when a session is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub session: SessionConfig,
    /// Area description to relocalize against, if any.
    pub area_description: Option<String>,
}

/// Lifecycle of one [`AreaLearningApp`](crate::session::AreaLearningApp).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Connected,
    Disconnected,
    Destroyed,
}

/// Key/value notification from the service, e.g. `FisheyeOverExposed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub key: String,
    pub value: String,
}

impl ServiceEvent {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status_code: i32) -> RawPose {
        RawPose {
            timestamp: 1.5,
            translation: [0.1, 0.2, 0.3],
            orientation: [0.0, 0.0, 0.0, 1.0],
            base_frame: CoordinateFrame::StartOfService as i32,
            target_frame: CoordinateFrame::Device as i32,
            status_code,
        }
    }

    #[test]
    fn test_from_raw_valid() {
        let sample = PoseSample::from_raw(&raw(1)).unwrap();
        assert_eq!(sample.status, PoseStatus::Valid);
        assert_eq!(sample.frame, FramePair::START_OF_SERVICE_TO_DEVICE);
        assert_eq!(sample.translation, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_from_raw_rejects_malformed() {
        assert!(PoseSample::from_raw(&raw(42)).is_none());

        let mut bad = raw(1);
        bad.translation[1] = f64::NAN;
        assert!(PoseSample::from_raw(&bad).is_none());

        let mut bad = raw(1);
        bad.base_frame = 77;
        assert!(PoseSample::from_raw(&bad).is_none());
    }

    #[test]
    fn test_config_flags_conversion() {
        let config = SessionConfig::default()
            .with_area_learning(true)
            .with_auto_recovery(false);
        let flags = config.flags();
        assert_eq!(flags, ConfigFlags::AREA_LEARNING);
        assert_eq!(SessionConfig::from(flags), config);

        let from_bits = SessionConfig::from(ConfigFlags::from_bits_truncate(0xff));
        assert!(from_bits.area_learning && from_bits.load_existing_map && from_bits.auto_recovery);
    }
}

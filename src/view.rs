//! Camera selection, viewport and touch input coming from the host view.
//!
//! Integers from the managed side are parsed into enums here; values outside
//! the known range become `Unknown` and are ignored.

use std::sync::{Mutex, PoisonError};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    FirstPerson = 0,
    ThirdPerson = 1,
    TopDown = 2,
    Unknown = -1,
}

impl From<i32> for CameraType {
    fn from(value: i32) -> Self {
        match value {
            0 => CameraType::FirstPerson,
            1 => CameraType::ThirdPerson,
            2 => CameraType::TopDown,
            _ => CameraType::Unknown,
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEvent {
    Touch0Down = 0,
    Touch0Up = 1,
    TouchMove = 2,
    Touch1Down = 3,
    Touch1Up = 4,
    TouchNone = 5,
    Unknown = -1,
}

impl From<i32> for TouchEvent {
    fn from(value: i32) -> Self {
        match value {
            0 => TouchEvent::Touch0Down,
            1 => TouchEvent::Touch0Up,
            2 => TouchEvent::TouchMove,
            3 => TouchEvent::Touch1Down,
            4 => TouchEvent::Touch1Up,
            5 => TouchEvent::TouchNone,
            _ => TouchEvent::Unknown,
        }
    }
}

/// Last touch reported by the host, in normalized view coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchGesture {
    pub touch_count: u8,
    pub event: TouchEvent,
    pub points: [[f32; 2]; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ViewInner {
    camera: CameraType,
    viewport: Option<(u32, u32)>,
    touch: Option<TouchGesture>,
}

#[derive(Debug)]
pub struct ViewState {
    inner: Mutex<ViewInner>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ViewInner {
                camera: CameraType::FirstPerson,
                viewport: None,
                touch: None,
            }),
        }
    }
}

impl ViewState {
    fn with<R>(&self, f: impl FnOnce(&mut ViewInner) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn camera(&self) -> CameraType {
        self.with(|v| v.camera)
    }

    /// Returns false and keeps the current camera for unknown types.
    pub fn set_camera(&self, camera: CameraType) -> bool {
        if camera == CameraType::Unknown {
            log::warn!("Ignoring unknown camera type");
            return false;
        }
        self.with(|v| v.camera = camera);
        true
    }

    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.with(|v| v.viewport)
    }

    /// Record the surface size. Non-positive sizes are ignored.
    pub fn set_viewport(&self, width: i32, height: i32) -> bool {
        match (u32::try_from(width), u32::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => {
                self.with(|v| v.viewport = Some((w, h)));
                true
            }
            _ => {
                log::warn!("Ignoring invalid viewport {}x{}", width, height);
                false
            }
        }
    }

    pub fn last_touch(&self) -> Option<TouchGesture> {
        self.with(|v| v.touch)
    }

    /// Record a touch event. Unknown events and counts outside 1..=2 are ignored.
    pub fn on_touch(&self, touch_count: i32, event: TouchEvent, points: [[f32; 2]; 2]) -> bool {
        let touch_count = match u8::try_from(touch_count) {
            Ok(n @ 1..=2) => n,
            _ => return false,
        };
        if event == TouchEvent::Unknown {
            return false;
        }
        self.with(|v| {
            v.touch = Some(TouchGesture {
                touch_count,
                event,
                points,
            })
        });
        true
    }
}

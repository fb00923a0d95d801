//! JNI entry points for `com.projecttango.examples.rust.arealearning.TangoJNINative`.
//!
//! The Java side owns the native app through the opaque `long` handle returned
//! by `nativeCreate` and must pass it to every other call until
//! `nativeDestroy`. Errors are thrown as Java exceptions; panics never cross
//! the boundary.

#![allow(non_snake_case)]

use crate::bridge::ProgressSink;
use crate::error::AreaLearningError;
use crate::service::TrackingService;
use crate::session::AreaLearningApp;
use crate::sim::{SimConfig, SimService};
use crate::types::{ConfigFlags, SessionConfig};
use crate::view::{CameraType, TouchEvent};
use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jboolean, jfloat, jint, jlong, jstring, JNI_FALSE, JNI_TRUE, JNI_VERSION_1_6};
use jni::{JNIEnv, JavaVM};
use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

/// Java method on the host activity that receives saving progress.
const PROGRESS_METHOD: &str = "updateSavingAdfProgress";
const PROGRESS_SIGNATURE: &str = "(I)V";

type ServiceFactory = fn() -> Arc<dyn TrackingService>;

static SERVICE_FACTORY: OnceLock<ServiceFactory> = OnceLock::new();

/// Install the backend used by `nativeCreate`. Must be called before the
/// first app is created; returns false if a backend was already installed.
pub fn register_service_factory(factory: ServiceFactory) -> bool {
    SERVICE_FACTORY.set(factory).is_ok()
}

fn create_service() -> Arc<dyn TrackingService> {
    match SERVICE_FACTORY.get() {
        Some(factory) => factory(),
        None => {
            log::warn!("No tracking service backend registered, using the simulated service");
            Arc::new(SimService::new(SimConfig::from_env()))
        }
    }
}

fn init_logging() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("area_learning"),
    );
}

/// Forwards saving progress to the host activity from any thread.
struct ActivitySink {
    vm: JavaVM,
    activity: GlobalRef,
}

impl ProgressSink for ActivitySink {
    fn on_saving_progress(&self, progress: u8) {
        let mut env = match self.vm.attach_current_thread() {
            Ok(env) => env,
            Err(e) => {
                log::warn!("Failed to attach callback thread to the JVM: {}", e);
                return;
            }
        };
        let result = env.call_method(
            self.activity.as_obj(),
            PROGRESS_METHOD,
            PROGRESS_SIGNATURE,
            &[JValue::Int(progress as jint)],
        );
        if let Err(e) = result {
            log::warn!("{} failed: {}", PROGRESS_METHOD, e);
            if env.exception_check().unwrap_or(false) {
                let _ = env.exception_clear();
            }
        }
    }
}

fn throw(env: &mut JNIEnv, class: &str, message: &str) {
    if let Err(e) = env.throw_new(class, message) {
        log::error!("Failed to throw {} '{}': {}", class, message, e);
    }
}

fn throw_java_exception(env: &mut JNIEnv, error: &AreaLearningError) {
    throw(env, error.java_exception_class(), &error.to_string());
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// # Safety
/// `handle` must be 0 or a value returned by `nativeCreate` that has not been
/// passed to `nativeDestroy`.
unsafe fn app_ref<'a>(handle: jlong) -> Option<&'a AreaLearningApp> {
    (handle as *const AreaLearningApp).as_ref()
}

/// Run `f` against the app behind `handle`, converting errors and panics into
/// Java exceptions and returning `fallback` in that case.
fn with_app<'local, T>(
    env: &mut JNIEnv<'local>,
    handle: jlong,
    fallback: T,
    f: impl FnOnce(&mut JNIEnv<'local>, &AreaLearningApp) -> crate::Result<T>,
) -> T {
    // SAFETY: the Java side only passes handles obtained from nativeCreate.
    let Some(app) = (unsafe { app_ref(handle) }) else {
        throw(env, "java/lang/IllegalStateException", "native app handle is null");
        return fallback;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| f(env, app))) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            throw_java_exception(env, &e);
            fallback
        }
        Err(payload) => {
            let message = format!("panic in native code: {}", panic_message(&*payload));
            log::error!("{}", message);
            throw(env, "java/lang/RuntimeException", &message);
            fallback
        }
    }
}

fn java_string(env: &mut JNIEnv, value: &JString) -> crate::Result<String> {
    Ok(env.get_string(value)?.into())
}

fn new_java_string(env: &mut JNIEnv, value: &str) -> crate::Result<jstring> {
    Ok(env.new_string(value)?.into_raw())
}

#[no_mangle]
pub extern "system" fn JNI_OnLoad(_vm: *mut jni::sys::JavaVM, _reserved: *mut c_void) -> jint {
    init_logging();
    log::info!("area_learning native library loaded");
    JNI_VERSION_1_6
}

/// JNI: Create the native app. Returns an opaque handle, never 0.
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_nativeCreate(
    _env: JNIEnv,
    _class: JClass,
) -> jlong {
    let app = Box::new(AreaLearningApp::new(create_service()));
    Box::into_raw(app) as jlong
}

/// JNI: Destroy the native app, disconnecting it if still connected.
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_nativeDestroy(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    if handle != 0 {
        // SAFETY: handle came from nativeCreate and Java drops it after this call.
        drop(unsafe { Box::from_raw(handle as *mut AreaLearningApp) });
    }
}

/// JNI: Cache the calling activity for progress updates and check the
/// installed service version.
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_checkTangoVersion(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    activity: JObject,
    min_tango_version: jint,
) -> jboolean {
    with_app(&mut env, handle, JNI_FALSE, |env, app| {
        let sink = ActivitySink {
            vm: env.get_java_vm()?,
            activity: env.new_global_ref(&activity)?,
        };
        app.attach_activity(Arc::new(sink));
        let minimum = u32::try_from(min_tango_version).unwrap_or(0);
        Ok(to_jboolean(app.check_version(minimum)))
    })
}

/// JNI: Configure the session. Returns 0 on success, -1 on error (throws).
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_setupConfig(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    is_area_learning_enabled: jboolean,
    is_loading_adf: jboolean,
) -> jint {
    with_app(&mut env, handle, -1, |_, app| {
        let config = SessionConfig::default()
            .with_area_learning(is_area_learning_enabled != JNI_FALSE)
            .with_existing_map(is_loading_adf != JNI_FALSE);
        app.setup_config(config)?;
        Ok(0)
    })
}

/// JNI: Configure the session from a `ConfigFlags` bit set.
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_setupConfigFlags(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    flags: jint,
) -> jint {
    with_app(&mut env, handle, -1, |_, app| {
        let flags = ConfigFlags::from_bits_truncate(flags as u32);
        app.setup_config(SessionConfig::from(flags))?;
        Ok(0)
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_connect(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    with_app(&mut env, handle, JNI_FALSE, |_, app| {
        app.connect()?;
        Ok(JNI_TRUE)
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_disconnect(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    with_app(&mut env, handle, (), |_, app| {
        app.disconnect();
        Ok(())
    })
}

/// JNI: Called from the activity's onDestroy().
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_destroyActivity(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    with_app(&mut env, handle, (), |_, app| {
        app.activity_destroyed();
        Ok(())
    })
}

/// JNI: Save the learned area. Returns its UUID, or null on error (throws).
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_saveAdf(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    with_app(&mut env, handle, std::ptr::null_mut(), |env, app| {
        let id = app.save_adf()?;
        new_java_string(env, &id)
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_getAdfMetadataValue(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    uuid: JString,
    key: JString,
) -> jstring {
    with_app(&mut env, handle, std::ptr::null_mut(), |env, app| {
        let uuid = java_string(env, &uuid)?;
        let key = java_string(env, &key)?;
        let value = app.adfs().get_metadata(&uuid, &key)?;
        new_java_string(env, &value)
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_setAdfMetadataValue(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    uuid: JString,
    key: JString,
    value: JString,
) {
    with_app(&mut env, handle, (), |env, app| {
        let uuid = java_string(env, &uuid)?;
        let key = java_string(env, &key)?;
        let value = java_string(env, &value)?;
        app.adfs().set_metadata(&uuid, &key, &value)
    })
}

/// JNI: All stored ADF UUIDs, comma separated.
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_getAllAdfUuids(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    with_app(&mut env, handle, std::ptr::null_mut(), |env, app| {
        let ids = app.adfs().joined_ids()?;
        new_java_string(env, &ids)
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_deleteAdf(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    uuid: JString,
) {
    with_app(&mut env, handle, (), |env, app| {
        let uuid = java_string(env, &uuid)?;
        app.adfs().delete(&uuid)
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_getLoadedAdfUuidString(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    with_app(&mut env, handle, std::ptr::null_mut(), |env, app| {
        new_java_string(env, &app.loaded_adf_string())
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_isRelocalized(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    with_app(&mut env, handle, JNI_FALSE, |_, app| {
        Ok(to_jboolean(app.is_relocalized()))
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_getPoseString(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    with_app(&mut env, handle, std::ptr::null_mut(), |env, app| {
        new_java_string(env, &app.pose_string())
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_getEventString(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    with_app(&mut env, handle, std::ptr::null_mut(), |env, app| {
        new_java_string(env, &app.event_string())
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_getVersionNumber(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    with_app(&mut env, handle, std::ptr::null_mut(), |env, app| {
        new_java_string(env, &app.version_string())
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_resetMotionTracking(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    with_app(&mut env, handle, (), |_, app| app.reset_motion_tracking())
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_deleteResources(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    with_app(&mut env, handle, (), |_, app| {
        app.delete_resources();
        Ok(())
    })
}

/// JNI: Select the camera. Unknown indices are ignored.
#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_setCamera(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    camera_index: jint,
) {
    with_app(&mut env, handle, (), |_, app| {
        app.view().set_camera(CameraType::from(camera_index));
        Ok(())
    })
}

#[no_mangle]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_setupGraphic(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    width: jint,
    height: jint,
) {
    with_app(&mut env, handle, (), |_, app| {
        app.view().set_viewport(width, height);
        Ok(())
    })
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "system" fn Java_com_projecttango_examples_rust_arealearning_TangoJNINative_onTouchEvent(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    touch_count: jint,
    event: jint,
    x0: jfloat,
    y0: jfloat,
    x1: jfloat,
    y1: jfloat,
) {
    with_app(&mut env, handle, (), |_, app| {
        let event = TouchEvent::from(event);
        if !app.view().on_touch(touch_count, event, [[x0, y0], [x1, y1]]) {
            log::trace!("Ignoring touch event {:?} with {} touches", event, touch_count);
        }
        Ok(())
    })
}

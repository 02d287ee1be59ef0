//! FFI bindings for the gesture engine
//!
//! This module exposes the engine to a host application through C-compatible
//! functions. Strings are null-terminated UTF-8; strings returned by the
//! library must be freed with `sg_free_string`. Events are queued inside the
//! handle and drained with `sg_engine_poll_events`, so the host never receives
//! calls from the engine's timeout thread. Player presence changes are queued
//! alongside them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::EngineConfig;
use crate::engine::GestureEngine;
use crate::error::GestureError;
use crate::events::{EventLog, RecordedEvent};
use crate::presence::PresenceEvent;
use crate::types::{Condition, Frame, JointId, JointInfo, PlayerId, Relation};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Required string argument; records an error naming the argument when absent
unsafe fn required(ptr: *const c_char, name: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {} string pointer", name));
    }
    value
}

/// Map a fallible call to the 0-or-positive / -1 return convention
fn status<T>(result: Result<T, GestureError>, ok: impl FnOnce(T) -> i32) -> i32 {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

fn clamp_count(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

/// Parse the string parts of a condition
unsafe fn parse_condition(
    actor: *const c_char,
    relation: *const c_char,
    relative: *const c_char,
    deviation: i32,
) -> Option<Condition> {
    let actor = required(actor, "actor joint")?;
    let relation = required(relation, "relation")?;
    let relative = required(relative, "relative id")?;

    let condition = actor.parse::<JointId>().and_then(|actor| {
        let relation = relation.parse::<Relation>()?;
        Ok(Condition::new(actor, relation, relative, deviation))
    });
    condition.inspect_err(|e| set_last_error(&e.to_string())).ok()
}

/// Serialize a value into a library-owned string, NULL on failure
fn json_to_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Position result: JSON object, or NULL with an error when unavailable
fn position_to_cstr(info: Option<JointInfo>, what: impl FnOnce() -> String) -> *mut c_char {
    match info {
        Some(info) => json_to_cstr(&info),
        None => {
            set_last_error(&what());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Engine lifecycle
// ============================================================================

/// Engine event as handed to the host
#[derive(Debug, Serialize)]
struct PolledEngineEvent {
    #[serde(flatten)]
    recorded: RecordedEvent,
    /// Host text for processing events
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// Presence change as handed to the host
#[derive(Debug, Serialize)]
struct PolledPresence {
    at: DateTime<Utc>,
    #[serde(flatten)]
    presence: PresenceEvent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PolledEvent {
    Engine(PolledEngineEvent),
    Presence(PolledPresence),
}

/// Opaque handle to a GestureEngine and its event queue
pub struct SgEngineHandle {
    engine: GestureEngine,
    events: EventLog,
    queue: Mutex<Vec<PolledEvent>>,
}

impl SgEngineHandle {
    /// Lock the host queue after moving every engine event into it
    fn queue(&self) -> MutexGuard<'_, Vec<PolledEvent>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.extend(self.events.drain().into_iter().map(|recorded| {
            PolledEvent::Engine(PolledEngineEvent {
                text: recorded.event.processing_text(),
                recorded,
            })
        }));
        queue
    }
}

/// Create an engine.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `sg_engine_free`.
/// - Returns NULL on error; call `sg_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_new(config_json: *const c_char) -> *mut SgEngineHandle {
    clear_last_error();

    let config = match cstr_to_string(config_json) {
        None => EngineConfig::default(),
        Some(json) => match EngineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&GestureError::from(e).to_string());
                return ptr::null_mut();
            }
        },
    };

    let events = EventLog::new();
    let engine = GestureEngine::new(config, events.clone());
    Box::into_raw(Box::new(SgEngineHandle {
        engine,
        events,
        queue: Mutex::new(Vec::new()),
    }))
}

/// Stop and free an engine.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_free(handle: *mut SgEngineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Start tracking with the current gestures.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_start(handle: *mut SgEngineHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *handle;

    status(handle.engine.start(), |_| 0)
}

/// Stop tracking.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_stop(handle: *mut SgEngineHandle) {
    if let Some(handle) = handle.as_mut() {
        handle.engine.stop();
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Replace every gesture with a JSON array of definitions.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns the number of gestures loaded, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_load_gestures(
    handle: *mut SgEngineHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(json) = required(json, "JSON") else {
        return -1;
    };

    status(handle.engine.load_gestures_json(&json), clamp_count)
}

/// Register a JSON array of static reference points.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns the number of points registered, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_load_references(
    handle: *mut SgEngineHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(json) = required(json, "JSON") else {
        return -1;
    };

    status(handle.engine.load_references_json(&json), clamp_count)
}

/// Add an empty gesture and make it the current one.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `name` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_add_gesture(
    handle: *mut SgEngineHandle,
    name: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(name) = required(name, "gesture name") else {
        return -1;
    };

    status(handle.engine.add_gesture(&name), |_| 0)
}

/// Set a gesture's timeout in milliseconds.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `gesture` must be NULL (current gesture) or a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_set_timeout(
    handle: *mut SgEngineHandle,
    gesture: *const c_char,
    timeout_ms: u64,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let gesture = cstr_to_string(gesture);

    status(handle.engine.set_timeout(gesture.as_deref(), timeout_ms), |_| 0)
}

/// Append an empty step to a gesture.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `gesture` must be NULL (current gesture) or a valid null-terminated C string.
/// - Returns the new step index, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_add_step(
    handle: *mut SgEngineHandle,
    gesture: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let gesture = cstr_to_string(gesture);

    status(handle.engine.add_step(gesture.as_deref()), clamp_count)
}

/// Append a success (`failure == 0`) or failure condition to a step.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `actor`, `relation` and `relative` must be valid null-terminated C strings.
/// - `gesture` must be NULL (current gesture) or a valid null-terminated C string.
/// - A negative `step` targets the current step.
/// - Returns the condition index within its list, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_add_condition(
    handle: *mut SgEngineHandle,
    failure: i32,
    actor: *const c_char,
    relation: *const c_char,
    relative: *const c_char,
    deviation: i32,
    step: i32,
    gesture: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(condition) = parse_condition(actor, relation, relative, deviation) else {
        return -1;
    };
    let gesture = cstr_to_string(gesture);
    let step = usize::try_from(step).ok();

    let result = if failure == 0 {
        handle
            .engine
            .add_success_condition(condition, step, gesture.as_deref())
    } else {
        handle
            .engine
            .add_failure_condition(condition, step, gesture.as_deref())
    };
    status(result, clamp_count)
}

/// Replace the success (`failure == 0`) or failure condition at `index` of a step.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `gesture`, `actor`, `relation` and `relative` must be valid null-terminated C strings.
/// - Returns 0 on success, -1 on error (including negative or out-of-range indices).
#[no_mangle]
pub unsafe extern "C" fn sg_engine_set_condition(
    handle: *mut SgEngineHandle,
    failure: i32,
    gesture: *const c_char,
    step: i32,
    index: i32,
    actor: *const c_char,
    relation: *const c_char,
    relative: *const c_char,
    deviation: i32,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(gesture) = required(gesture, "gesture name") else {
        return -1;
    };
    let (Ok(step), Ok(index)) = (usize::try_from(step), usize::try_from(index)) else {
        set_last_error(&format!("Invalid step {} or condition index {}", step, index));
        return -1;
    };
    let Some(condition) = parse_condition(actor, relation, relative, deviation) else {
        return -1;
    };

    let result = if failure == 0 {
        handle
            .engine
            .set_success_condition(&gesture, step, index, condition)
    } else {
        handle
            .engine
            .set_failure_condition(&gesture, step, index, condition)
    };
    status(result, |_| 0)
}

/// Register a static reference point.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `id` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_add_static_reference(
    handle: *mut SgEngineHandle,
    id: *const c_char,
    x: f32,
    y: f32,
    z: f32,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(id) = required(id, "reference id") else {
        return -1;
    };

    status(
        handle
            .engine
            .add_static_reference(&id, glam::Vec3::new(x, y, z)),
        |_| 0,
    )
}

// ============================================================================
// Frames, events and queries
// ============================================================================

/// Process one frame given as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `frame_json` must be a valid null-terminated C string.
/// - Returns the number of tracked players processed, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_process_frame(
    handle: *mut SgEngineHandle,
    frame_json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(json) = required(frame_json, "frame JSON") else {
        return -1;
    };

    let frame = match serde_json::from_str::<Frame>(&json) {
        Ok(frame) => frame,
        Err(e) => {
            set_last_error(&GestureError::from(e).to_string());
            return -1;
        }
    };

    // Presence changes are observed before the frame's gesture events
    let mut queue = handle.queue();
    let report = handle.engine.process_frame(&frame);
    if let Ok(report) = &report {
        let at = Utc::now();
        queue.extend(
            report
                .presence
                .iter()
                .cloned()
                .map(|presence| PolledEvent::Presence(PolledPresence { at, presence })),
        );
    }
    drop(queue);

    status(report, |report| clamp_count(report.players))
}

/// Drain queued events as a JSON array.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - Returns a newly allocated string that must be freed with `sg_free_string`.
/// - Returns NULL on error; call `sg_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_poll_events(handle: *mut SgEngineHandle) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    };

    let polled = std::mem::take(&mut *handle.queue());
    json_to_cstr(&polled)
}

/// Relationship value from the last frame.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `actor`, `relation` and `relative` must be valid null-terminated C strings.
/// - Returns NaN when the value is not available.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_relationship_value(
    handle: *mut SgEngineHandle,
    player: PlayerId,
    actor: *const c_char,
    relation: *const c_char,
    relative: *const c_char,
) -> f32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return f32::NAN;
    };
    let (Some(actor), Some(relation), Some(relative)) = (
        required(actor, "actor joint"),
        required(relation, "relation"),
        required(relative, "relative id"),
    ) else {
        return f32::NAN;
    };

    let (actor, relation) = match (actor.parse::<JointId>(), relation.parse::<Relation>()) {
        (Ok(actor), Ok(relation)) => (actor, relation),
        (Err(e), _) | (_, Err(e)) => {
            set_last_error(&e.to_string());
            return f32::NAN;
        }
    };

    handle
        .engine
        .relationship_value(player, actor, relation, &relative)
        .unwrap_or(f32::NAN)
}

/// Current progress of a gesture for a player.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `gesture` must be a valid null-terminated C string.
/// - Returns -1 on error.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_progress(
    handle: *mut SgEngineHandle,
    player: PlayerId,
    gesture: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return -1;
    };
    let Some(gesture) = required(gesture, "gesture name") else {
        return -1;
    };

    clamp_count(handle.engine.progress(player, &gesture))
}

/// Scaled joint position from the last frame as JSON `{player, tracked, position}`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - `joint` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sg_free_string`.
/// - Returns NULL when the joint is unavailable or on error; call `sg_last_error`.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_joint_position(
    handle: *mut SgEngineHandle,
    player: PlayerId,
    joint: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    };
    let Some(joint) = required(joint, "joint") else {
        return ptr::null_mut();
    };
    let joint = match joint.parse::<JointId>() {
        Ok(joint) => joint,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    position_to_cstr(handle.engine.joint_position(player, joint), || {
        format!("No {} position for player {}", joint.as_str(), player)
    })
}

/// Sensor position of a player from the last frame, in meters, as JSON.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - Returns a newly allocated string that must be freed with `sg_free_string`.
/// - Returns NULL when the position is unavailable or on error; call `sg_last_error`.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_player_position(
    handle: *mut SgEngineHandle,
    player: PlayerId,
) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    };

    position_to_cstr(handle.engine.player_position(player), || {
        format!("No position for player {}", player)
    })
}

/// Current gestures as a JSON array in the gesture file format.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `sg_engine_new`.
/// - Returns a newly allocated string that must be freed with `sg_free_string`.
/// - Returns NULL on error; call `sg_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sg_engine_gestures_json(handle: *mut SgEngineHandle) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle.as_ref() else {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    };

    match handle.engine.gestures_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by this library.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an `sg_` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sg_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next `sg_` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn sg_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn sg_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

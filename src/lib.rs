//! Skeletal Gestures - Sequential gesture recognition over live 3D skeleton streams
//!
//! A gesture is an ordered list of steps; each step is a set of geometric
//! conditions between a tracked joint and another joint or a fixed point in
//! space. Every frame runs a deterministic pipeline:
//! normalization → relationship evaluation → step rules → gesture state machine.
//!
//! ## Modules
//!
//! - **Configuration**: Build gestures and static references through [`GestureCatalog`]
//! - **Engine**: [`GestureEngine`] processes frames and enforces per-gesture timeouts
//! - **Persistence**: JSON gesture and reference files, NDJSON frame recordings
//! - **FFI**: C ABI for host applications

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod index;
pub mod machine;
pub mod normalizer;
pub mod persistence;
pub mod presence;
pub mod rules;
pub mod scheduler;
pub mod snapshot;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use catalog::{ConditionKind, GestureCatalog, ReferenceSet};
pub use config::{EngineConfig, ProgressScope};
pub use engine::{FrameReport, GestureEngine};
pub use error::GestureError;
pub use evaluator::RelationshipTable;
pub use events::{EngineEvent, EventLog, EventSink, NullSink, RecordedEvent, FRAME_MARKER};
pub use index::{RelationshipKey, UsedRelationships};
pub use presence::{PresenceEvent, PresenceTracker};
pub use types::{
    Condition, Frame, GestureDefinition, JointId, JointInfo, PlayerId, RawJoint, Relation,
    Skeleton, StaticReferencePoint, Step, TrackingState,
};

/// Engine version reported by the CLI and the C ABI
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

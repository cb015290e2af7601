//! Reelcut Playback Engine
//!
//! Maps wall-clock time to a timeline position and composites the
//! matching media onto a raster surface.
//!
//! # Architecture
//!
//! ```text
//!            host animation callback / scrub gestures / visibility
//!                                   │
//!                                   ▼
//! ┌──────────────────────── PlaybackEngine ───────────────────────┐
//! │  LoopController ──► Compositor ──► RasterSurface              │
//! │  (generation,        │  │                                      │
//! │   clock origin)      │  └──► AudioRouter (gain nodes)          │
//! │  SeekSession ────────┤                                         │
//! │  VisibilityState ────┘──► MediaRegistry (MediaHandle per src)  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one thread. Asynchronous continuations carry the
//! loop or seek generation they were issued under and become no-ops once
//! a newer generation is live.

pub mod audio;
pub mod compositor;
pub mod engine;
pub mod media;
pub mod seek;
pub mod surface;
pub mod transport;
pub mod visibility;

pub use audio::{sync_track_handles, AudioRouter, EnvelopeScheduler, GainNode, RouteTarget};
pub use compositor::{Compositor, FrameOutcome, HoldReason, RenderMode, Scene};
pub use engine::{EngineEvent, PlaybackEngine, StartOutcome};
pub use media::{
    MediaHandle, MediaRegistry, ReadyState, StallAction, StallWatchdog, SyntheticMedia,
    SyntheticSpec, VideoFrame,
};
pub use seek::SeekSession;
pub use surface::{Composite, DrawTransform, FrameBuffer, RasterSurface, TextRun};
pub use transport::{LoopController, LoopMode, LoopPhase, PlaybackState, TickOutcome};
pub use visibility::VisibilityState;

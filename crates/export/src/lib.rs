//! Reelcut Export
//!
//! Turns a timeline into one in-memory container at a fixed frame rate.
//!
//! # Pipeline
//!
//! ```text
//! Preparing ─► capability probe ─► VideoExportBackend (encoder+muxer | recorder)
//!           └► audio prerender (offline mix ─► real-time extraction ─► live capture)
//! Encoding  ─► frame pump (index/fps timestamps) ─► backend queue
//!           └► audio chunks paced to video time
//! Finalizing ─► flush, close container, verify ─► Done | Failed
//! ```
//!
//! A user abort at any stage ends in `Aborted` and discards the output.

pub mod analysis;
pub mod backend;
pub mod codec;
pub mod container;
pub mod control;
pub mod mixdown;
pub mod orchestrator;
pub mod session;

pub use analysis::{AnalysisSettings, FrameMetrics, Scope, SegmentReport, Summary};
pub use backend::{
    select_backend, Capabilities, EncodeParams, EncoderMuxBackend, RecorderBackend,
    VideoExportBackend,
};
pub use codec::{AudioCodec, CodecPair, VideoCodec};
pub use container::{ContainerError, ContainerFile, ContainerHeader, ContainerKind, Muxer};
pub use control::{ExportControl, ExportHandle, TokioClock, VisibilityGate};
pub use mixdown::{
    prerender_audio, AudioBuffer, AudioDecoder, AudioPlan, AudioSources, AudioTier, CaptureTap,
    OfflineMixer, RealtimeExtractor, SilentTap, SyntheticAudio,
};
pub use orchestrator::{ExportOrchestrator, ExportOutput, ExportReport};
pub use session::{ExportPhase, ExportProgress, ExportSession, ProgressCallback};

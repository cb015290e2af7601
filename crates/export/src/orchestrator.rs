//! Export orchestration.
//!
//! Drives one export from start to finish: picks a backend, prerenders
//! audio, switches the engine into export mode, pumps frames at a fixed
//! cadence, backfills to the expected frame count, finalizes the
//! container and verifies it before handing the host a URL.
//!
//! Frame timestamps are always `index / fps`. Wall-clock time only decides
//! *when* a frame is pumped, never where it lands in the output.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use reelcut_common::config::EngineConfig;
use reelcut_common::error::{EngineError, EngineResult};
use reelcut_playback::{FrameOutcome, HoldReason, PlaybackEngine, TickOutcome, VideoFrame};

use crate::analysis::{AnalysisSettings, FrameMetrics, Summary};
use crate::backend::{select_backend, Capabilities, EncodeParams, VideoExportBackend};
use crate::container::ContainerFile;
use crate::control::{ExportControl, ExportHandle, VisibilityGate};
use crate::mixdown::{
    prerender_audio, AudioBuffer, AudioPlan, AudioSources, AudioTier, CaptureTap, CHANNELS,
};
use crate::session::{ExportPhase, ExportSession, ProgressCallback};

/// How often a held frame is re-rendered while its source settles.
const HOLD_POLL: Duration = Duration::from_millis(10);

/// How often the pump re-checks abort and completion while hidden.
const HIDDEN_POLL: Duration = Duration::from_millis(50);

/// The finished container, kept until the host clears it.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub url: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Outcome of a successful export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub url: String,
    pub extension: String,
    pub frames: u64,
    pub backfilled: u64,
    pub duration_secs: f64,
    pub backend: String,
    pub audio_tier: AudioTier,
    pub summary: Summary,
}

/// How the frame pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    /// Reached the end of the timeline; backfill applies.
    Finished,
    /// The host asked to finish at the current position.
    Completed,
}

pub struct ExportOrchestrator {
    config: EngineConfig,
    capabilities: Capabilities,
    analysis: AnalysisSettings,
    control: ExportControl,
    visibility: Arc<VisibilityGate>,
    progress: Option<ProgressCallback>,
    session: Option<ExportSession>,
    output: Option<ExportOutput>,
    next_session_id: u64,
}

impl ExportOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let capabilities = Capabilities::probe(&config.platform);
        Self {
            config,
            capabilities,
            analysis: AnalysisSettings::default(),
            control: ExportControl::new(),
            visibility: Arc::new(VisibilityGate::new()),
            progress: None,
            session: None,
            output: None,
            next_session_id: 1,
        }
    }

    /// Override the probed capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_analysis(mut self, settings: AnalysisSettings) -> Self {
        self.analysis = settings;
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Signals for stopping, completing or reporting visibility while
    /// [`ExportOrchestrator::start_export`] runs.
    pub fn handle(&self) -> ExportHandle {
        ExportHandle::new(self.control.clone(), self.visibility.clone())
    }

    /// The last session, finished or not.
    pub fn session(&self) -> Option<&ExportSession> {
        self.session.as_ref()
    }

    pub fn output(&self) -> Option<&ExportOutput> {
        self.output.as_ref()
    }

    /// Release the last output.
    pub fn clear_export_url(&mut self) {
        if let Some(output) = self.output.take() {
            tracing::debug!(url = %output.url, "Export URL released");
        }
    }

    /// Run one export against `engine`.
    ///
    /// `on_complete` receives the output URL and file extension.
    /// `on_error` receives a user-facing message for failures; a user
    /// abort is returned as [`EngineError::SessionAborted`] without
    /// calling it.
    pub async fn start_export(
        &mut self,
        engine: &mut PlaybackEngine,
        sources: AudioSources,
        on_complete: impl FnOnce(&str, &str),
        on_error: impl FnOnce(String),
    ) -> EngineResult<ExportReport> {
        self.control.reset();
        self.clear_export_url();

        let total = engine.timeline().total_duration();
        let expected = self.config.output.expected_frames(total);
        let id = self.next_session_id;
        self.next_session_id += 1;
        let mut session = ExportSession::new(id, expected);

        tracing::info!(
            session = id,
            total_duration = total,
            fps = self.config.output.fps,
            expected_frames = expected,
            "Starting export"
        );

        let result = self.run(&mut session, engine, sources).await;
        let outcome = match result {
            Ok((report, bytes)) => {
                self.output = Some(ExportOutput {
                    url: report.url.clone(),
                    extension: report.extension.clone(),
                    bytes,
                });
                tracing::info!(
                    session = id,
                    url = %report.url,
                    frames = report.frames,
                    backfilled = report.backfilled,
                    "Export complete"
                );
                on_complete(&report.url, &report.extension);
                Ok(report)
            }
            Err(err) => {
                session.fail(&err);
                if err.is_abort() {
                    tracing::info!(session = id, "Export aborted");
                } else {
                    tracing::error!(session = id, error = %err, "Export failed");
                    on_error(err.user_message());
                }
                Err(err)
            }
        };
        self.report(&session);
        self.session = Some(session);
        outcome
    }

    async fn run(
        &self,
        session: &mut ExportSession,
        engine: &mut PlaybackEngine,
        sources: AudioSources,
    ) -> EngineResult<(ExportReport, Vec<u8>)> {
        session.transition(ExportPhase::Preparing)?;
        self.report(session);
        self.config.validate()?;

        let mut backend = select_backend(&self.capabilities, &self.config.tuning)?;
        let plan = prerender_audio(
            engine.timeline(),
            &sources,
            self.config.output.audio_sample_rate,
            &self.control,
        )
        .await?;
        let audio_tier = plan.tier();
        let feed = AudioFeed::new(plan, sources.capture_tap, &self.config)?;

        let params = EncodeParams::new(
            &self.config.output,
            engine.surface().width(),
            engine.surface().height(),
        );
        backend.configure(&params).await?;

        let generation = match engine.begin_export() {
            Ok(generation) => generation,
            Err(e) => {
                backend.abort().await;
                return Err(e);
            }
        };

        session.transition(ExportPhase::Encoding)?;
        self.report(session);

        let mut pump = Pump {
            engine: &mut *engine,
            backend: backend.as_mut(),
            session: &mut *session,
            audio: feed,
            metrics: FrameMetrics::new(),
            last_frame: None,
            fps: self.config.output.fps as f64,
            frame_wait: Duration::from_secs_f64(
                self.config.tuning.export_frame_wait_ms.max(0.0) / 1000.0,
            ),
            control: &self.control,
            visibility: self.visibility.subscribe(),
            progress: self.progress.as_ref(),
        };
        let pumped = if self.config.platform.deterministic_pump {
            pump.run_manual().await
        } else {
            pump.run_source_driven(generation).await
        };
        let pumped = match pumped {
            Ok(end) => pump.finish(end).await,
            Err(e) => Err(e),
        };
        let metrics = std::mem::take(&mut pump.metrics);
        drop(pump);
        engine.end_export();
        if let Err(e) = pumped {
            backend.abort().await;
            return Err(e);
        }

        session.transition(ExportPhase::Finalizing)?;
        self.report(session);
        let bytes = match backend.finalize().await {
            Ok(bytes) => bytes,
            Err(e) => {
                backend.abort().await;
                return Err(e);
            }
        };
        let file = verify_output(&bytes)?;

        let fps = self.config.output.fps as f64;
        let summary = metrics.summary(fps, &self.analysis);
        log_verification(&summary);

        session.transition(ExportPhase::Done)?;
        let report = ExportReport {
            url: format!("blob:reelcut/export-{}", session.id()),
            extension: backend.extension().to_string(),
            frames: file.frame_count() as u64,
            backfilled: session.frames_backfilled(),
            duration_secs: file.frame_count() as f64 / fps,
            backend: backend.name().to_string(),
            audio_tier,
            summary,
        };
        Ok((report, bytes))
    }

    fn report(&self, session: &ExportSession) {
        if let Some(cb) = &self.progress {
            cb(session.progress());
        }
    }
}

/// A finalized buffer must parse and hold at least one frame.
fn verify_output(bytes: &[u8]) -> EngineResult<ContainerFile> {
    match ContainerFile::parse(bytes) {
        Ok(file) if file.frame_count() > 0 => Ok(file),
        Ok(_) => Err(EngineError::EmptyOutput { bytes: bytes.len() }),
        Err(e) => {
            tracing::warn!(error = %e, bytes = bytes.len(), "Finalized output is unreadable");
            Err(EngineError::EmptyOutput { bytes: bytes.len() })
        }
    }
}

fn log_verification(summary: &Summary) {
    tracing::info!(
        frames = summary.total_frames,
        duration = summary.duration_sec_estimate,
        black_ratio = summary.black_frame_ratio,
        luma_p50 = summary.luma_stats.as_ref().map(|s| s.p50),
        "Export verification"
    );
    if summary.has_black_at_video_end {
        tracing::warn!(
            frames = summary.total_frames,
            "Export ends on black frames; the last frame was not held"
        );
    }
}

enum FeedSource {
    Buffer(AudioBuffer),
    Tap(Box<dyn CaptureTap>),
}

/// Feeds audio to the backend in fixed-size chunks, keeping pace with the
/// video timestamps.
struct AudioFeed {
    source: FeedSource,
    sample_rate: u32,
    chunk_frames: usize,
    cursor: usize,
}

impl AudioFeed {
    /// Live capture needs a host tap; without one the timeline's audio
    /// has no path into the output.
    fn new(
        plan: AudioPlan,
        tap: Option<Box<dyn CaptureTap>>,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let source = match (plan, tap) {
            (AudioPlan::Prerendered { buffer, .. }, _) => FeedSource::Buffer(buffer),
            (AudioPlan::LiveCapture, Some(tap)) => FeedSource::Tap(tap),
            (AudioPlan::LiveCapture, None) => {
                tracing::warn!("Audio needs live capture but no capture tap was provided");
                return Err(EngineError::encoder_unsupported(
                    "no audio capture path: sources cannot be decoded or extracted and no capture tap is available",
                ));
            }
        };
        Ok(Self {
            source,
            sample_rate: config.output.audio_sample_rate,
            chunk_frames: config.output.audio_chunk_frames.max(1),
            cursor: 0,
        })
    }

    /// Push chunks until the feed reaches `secs`.
    async fn advance_to(&mut self, backend: &mut dyn VideoExportBackend, secs: f64) -> EngineResult<()> {
        let target = (secs.max(0.0) * self.sample_rate as f64).round() as usize;
        while self.cursor < target {
            let frames = self.chunk_frames.min(target - self.cursor);
            let samples = match &mut self.source {
                FeedSource::Buffer(buffer) => {
                    let mut samples = buffer.slice_frames(self.cursor, frames).to_vec();
                    samples.resize(frames * CHANNELS, 0.0);
                    samples
                }
                FeedSource::Tap(tap) => {
                    let mut samples = tap.pull(frames);
                    samples.resize(frames * CHANNELS, 0.0);
                    samples
                }
            };
            let timestamp = self.cursor as f64 / self.sample_rate as f64;
            backend.push_audio(&samples, timestamp).await?;
            self.cursor += frames;
        }
        Ok(())
    }
}

/// State for one pass of the frame pump.
struct Pump<'a> {
    engine: &'a mut PlaybackEngine,
    backend: &'a mut dyn VideoExportBackend,
    session: &'a mut ExportSession,
    audio: AudioFeed,
    metrics: FrameMetrics,
    last_frame: Option<VideoFrame>,
    fps: f64,
    frame_wait: Duration,
    control: &'a ExportControl,
    visibility: watch::Receiver<bool>,
    progress: Option<&'a ProgressCallback>,
}

impl Pump<'_> {
    fn ticker(&self) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Fixed-cadence pump: one snapshot per frame index.
    async fn run_manual(&mut self) -> EngineResult<PumpEnd> {
        let expected = self.session.expected_frames();
        let mut ticker = self.ticker();
        while self.session.frames_emitted() < expected {
            ticker.tick().await;
            if self.pause_while_hidden().await? {
                ticker.reset();
            }
            if self.control.is_completing() {
                return Ok(PumpEnd::Completed);
            }
            let time = self.session.frames_emitted() as f64 / self.fps;
            self.render_settled(time).await?;
            let frame = self.engine.snapshot();
            self.emit(frame, false).await?;
        }
        Ok(PumpEnd::Finished)
    }

    /// Source-driven pump: the engine's export loop decides the timeline
    /// position and a frame is captured whenever it crosses the next
    /// frame boundary.
    async fn run_source_driven(&mut self, generation: u64) -> EngineResult<PumpEnd> {
        let expected = self.session.expected_frames();
        let mut ticker = self.ticker();
        loop {
            ticker.tick().await;
            if self.pause_while_hidden().await? {
                ticker.reset();
            }
            if self.control.is_completing() {
                return Ok(PumpEnd::Completed);
            }
            match self.engine.export_tick(generation) {
                TickOutcome::Render(time) => {
                    self.engine.render_export_frame(time);
                    let next = self.session.frames_emitted();
                    // Frame boundaries are compared with a small slack so
                    // float error does not skip a frame.
                    if next < expected && time + 1e-6 >= next as f64 / self.fps {
                        let frame = self.engine.snapshot();
                        self.emit(frame, false).await?;
                    }
                }
                TickOutcome::ExportHalted(total) => {
                    tracing::debug!(total, frames = self.session.frames_emitted(), "Export loop halted");
                    return Ok(PumpEnd::Finished);
                }
                TickOutcome::Stale => {
                    return Err(EngineError::invalid_state("export loop was superseded"));
                }
                TickOutcome::Idle | TickOutcome::Final(_) => {}
            }
        }
    }

    /// Render `time`, giving a held source up to `frame_wait` to settle.
    /// A frame still held after that keeps the previous picture.
    async fn render_settled(&mut self, time: f64) -> EngineResult<()> {
        let deadline = Instant::now() + self.frame_wait;
        let mut outcome = self.engine.render_export_frame(time);
        while let FrameOutcome::Held(reason) = &outcome {
            if !matches!(reason, HoldReason::MetadataPending | HoldReason::Seeking) {
                break;
            }
            if Instant::now() >= deadline {
                tracing::debug!(time, ?reason, "Source not settled, holding previous frame");
                break;
            }
            self.control.sleep(HOLD_POLL).await?;
            outcome = self.engine.render_export_frame(time);
        }
        Ok(())
    }

    /// Block while the document is hidden. Returns whether it was.
    async fn pause_while_hidden(&mut self) -> EngineResult<bool> {
        self.control.check()?;
        if *self.visibility.borrow_and_update() {
            return Ok(false);
        }
        self.engine.on_hide();
        while !*self.visibility.borrow_and_update() {
            self.control.check()?;
            if self.control.is_completing() {
                break;
            }
            let _ = tokio::time::timeout(HIDDEN_POLL, self.visibility.changed()).await;
        }
        self.control.check()?;
        let hidden_ms = self.engine.on_show();
        tracing::info!(
            hidden_ms,
            frames = self.session.frames_emitted(),
            "Export resumed after visibility loss"
        );
        Ok(true)
    }

    async fn emit(&mut self, frame: VideoFrame, backfill: bool) -> EngineResult<()> {
        let index = self.session.frames_emitted();
        self.backend.push_video(&frame, index as f64 / self.fps).await?;
        self.metrics.push(&frame);
        if backfill {
            self.session.record_backfill();
        } else {
            self.session.record_frame();
        }
        self.audio
            .advance_to(&mut *self.backend, (index + 1) as f64 / self.fps)
            .await?;
        self.last_frame = Some(frame);

        if let Some(cb) = self.progress {
            if (index + 1) % (self.fps.round().max(1.0) as u64) == 0 {
                cb(self.session.progress());
            }
        }
        Ok(())
    }

    /// Close out the pump. A run that reached the end is padded with
    /// copies of the last frame up to the expected count; a run completed
    /// early keeps exactly what it rendered.
    async fn finish(&mut self, end: PumpEnd) -> EngineResult<()> {
        if end == PumpEnd::Finished {
            let expected = self.session.expected_frames();
            let short = expected.saturating_sub(self.session.frames_emitted());
            if short > 0 {
                tracing::info!(short, expected, "Backfilling with the last frame");
            }
            while self.session.frames_emitted() < expected {
                self.control.check()?;
                let frame = match &self.last_frame {
                    Some(frame) => frame.clone(),
                    None => self.engine.snapshot(),
                };
                self.emit(frame, true).await?;
            }
        } else {
            tracing::info!(
                frames = self.session.frames_emitted(),
                expected = self.session.expected_frames(),
                "Export completed early"
            );
        }
        let end_secs = self.session.frames_emitted() as f64 / self.fps;
        self.audio.advance_to(&mut *self.backend, end_secs).await
    }
}

//! Video export backends.
//!
//! One capability interface covers both strategies: a frame encoder plus
//! muxer, and a container-level stream recorder for platforms without an
//! encoder/muxer primitive. The backend is chosen once per session from a
//! capability probe; the orchestrator never branches on which one it got.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use reelcut_common::config::{OutputConfig, PlatformProfile, TuningConfig};
use reelcut_common::error::{EngineError, EngineResult};
use reelcut_playback::VideoFrame;

use crate::codec::{AudioCodec, CodecPair, VideoCodec};
use crate::container::{secs_to_us, ContainerHeader, ContainerKind, Muxer};
use crate::mixdown::CHANNELS;

/// Jobs buffered between the pump and the encoder task.
const ENCODE_QUEUE_DEPTH: usize = 32;

/// Fixed encoder parameters for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl EncodeParams {
    /// Parameters for a surface of `width`×`height`.
    pub fn new(output: &OutputConfig, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fps: output.fps,
            sample_rate: output.audio_sample_rate,
            channels: CHANNELS as u16,
            video_bitrate_kbps: output.video_bitrate_kbps,
            audio_bitrate_kbps: output.audio_bitrate_kbps,
        }
    }

    fn header(&self, kind: ContainerKind, codecs: CodecPair) -> ContainerHeader {
        ContainerHeader {
            kind,
            width: self.width,
            height: self.height,
            fps: self.fps,
            sample_rate: self.sample_rate,
            channels: self.channels,
            codecs,
        }
    }

    fn check_frame(&self, frame: &VideoFrame) -> EngineResult<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(EngineError::encode_queue(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Sink for timestamped frames and audio chunks producing one in-memory
/// container.
#[async_trait::async_trait]
pub trait VideoExportBackend: Send {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// File extension of the produced container.
    fn extension(&self) -> &'static str;

    async fn configure(&mut self, params: &EncodeParams) -> EngineResult<()>;

    /// Queue a frame. `timestamp_secs` must increase strictly.
    async fn push_video(&mut self, frame: &VideoFrame, timestamp_secs: f64) -> EngineResult<()>;

    /// Queue interleaved samples starting at `timestamp_secs`.
    async fn push_audio(&mut self, samples: &[f32], timestamp_secs: f64) -> EngineResult<()>;

    /// Flush everything queued and close the container.
    async fn finalize(&mut self) -> EngineResult<Vec<u8>>;

    /// Drop queued work and partial output.
    async fn abort(&mut self);
}

/// What the platform can encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub video_codecs: Vec<VideoCodec>,
    pub audio_codecs: Vec<AudioCodec>,
    /// Frame encoder plus muxer primitives.
    pub muxer: bool,
    /// Container-level stream recorder.
    pub stream_recorder: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            video_codecs: vec![VideoCodec::RleRgba, VideoCodec::RawRgba],
            audio_codecs: vec![AudioCodec::PcmF32, AudioCodec::PcmS16],
            muxer: true,
            stream_recorder: true,
        }
    }

    pub fn recorder_only() -> Self {
        Self {
            video_codecs: Vec::new(),
            audio_codecs: Vec::new(),
            muxer: false,
            stream_recorder: true,
        }
    }

    pub fn none() -> Self {
        Self {
            stream_recorder: false,
            ..Self::recorder_only()
        }
    }

    /// Probe the host platform.
    pub fn probe(platform: &PlatformProfile) -> Self {
        if platform.capability_limited {
            // Restricted targets ship the secondary pair only.
            Self {
                video_codecs: vec![VideoCodec::RawRgba],
                audio_codecs: vec![AudioCodec::PcmS16],
                ..Self::full()
            }
        } else {
            Self::full()
        }
    }

    pub fn supports(&self, pair: CodecPair) -> bool {
        self.muxer && self.video_codecs.contains(&pair.video) && self.audio_codecs.contains(&pair.audio)
    }
}

/// Pick the backend for a session: primary pair, secondary pair, then the
/// stream recorder.
pub fn select_backend(
    caps: &Capabilities,
    tuning: &TuningConfig,
) -> EngineResult<Box<dyn VideoExportBackend>> {
    for pair in [CodecPair::PRIMARY, CodecPair::SECONDARY] {
        if caps.supports(pair) {
            tracing::info!(
                video = pair.video.name(),
                audio = pair.audio.name(),
                "Using encoder and muxer"
            );
            return Ok(Box::new(EncoderMuxBackend::new(pair)));
        }
    }
    if caps.stream_recorder {
        tracing::warn!("Encoder/muxer unsupported, falling back to stream recorder");
        return Ok(Box::new(RecorderBackend::new(
            tuning.keep_alive_tone_hz,
            tuning.keep_alive_tone_amplitude,
        )));
    }
    Err(EngineError::encoder_unsupported(
        "no encoder, muxer or stream recorder available",
    ))
}

enum EncodeJob {
    Video { frame: VideoFrame, timestamp_us: u64 },
    Audio { samples: Vec<f32>, timestamp_us: u64 },
}

/// Frame and audio encoders feeding a muxer on a separate task.
pub struct EncoderMuxBackend {
    pair: CodecPair,
    params: Option<EncodeParams>,
    tx: Option<mpsc::Sender<EncodeJob>>,
    task: Option<JoinHandle<EngineResult<Vec<u8>>>>,
}

impl EncoderMuxBackend {
    pub fn new(pair: CodecPair) -> Self {
        Self {
            pair,
            params: None,
            tx: None,
            task: None,
        }
    }

    pub fn codecs(&self) -> CodecPair {
        self.pair
    }

    async fn send(&mut self, job: EncodeJob) -> EngineResult<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(EngineError::invalid_state("encoder not configured"));
        };
        if tx.send(job).await.is_err() {
            return Err(self.task_error().await);
        }
        Ok(())
    }

    /// The reason the encoder task stopped accepting work.
    async fn task_error(&mut self) -> EngineError {
        self.tx = None;
        match self.task.take() {
            Some(task) => match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(_)) => EngineError::encode_queue("encoder stopped early"),
                Err(e) => EngineError::Other(anyhow::anyhow!("encoder task failed: {e}")),
            },
            None => EngineError::encode_queue("encoder queue closed"),
        }
    }
}

async fn run_encoder(
    mut rx: mpsc::Receiver<EncodeJob>,
    mut muxer: Muxer,
    pair: CodecPair,
) -> EngineResult<Vec<u8>> {
    while let Some(job) = rx.recv().await {
        match job {
            EncodeJob::Video {
                frame,
                timestamp_us,
            } => muxer.write_video(timestamp_us, &pair.video.encode(&frame))?,
            EncodeJob::Audio {
                samples,
                timestamp_us,
            } => muxer.write_audio(timestamp_us, &pair.audio.encode(&samples))?,
        }
    }
    tracing::debug!(
        video = muxer.video_chunks(),
        audio = muxer.audio_chunks(),
        bytes = muxer.bytes_written(),
        "Encoder drained"
    );
    Ok(muxer.finalize())
}

#[async_trait::async_trait]
impl VideoExportBackend for EncoderMuxBackend {
    fn name(&self) -> &'static str {
        "encoder-muxer"
    }

    fn extension(&self) -> &'static str {
        ContainerKind::Muxed.extension()
    }

    async fn configure(&mut self, params: &EncodeParams) -> EngineResult<()> {
        if self.task.is_some() {
            return Err(EngineError::invalid_state("encoder already configured"));
        }
        let muxer = Muxer::new(params.header(ContainerKind::Muxed, self.pair));
        let (tx, rx) = mpsc::channel(ENCODE_QUEUE_DEPTH);
        self.task = Some(tokio::spawn(run_encoder(rx, muxer, self.pair)));
        self.tx = Some(tx);
        self.params = Some(params.clone());
        tracing::debug!(?params, "Encoder configured");
        Ok(())
    }

    async fn push_video(&mut self, frame: &VideoFrame, timestamp_secs: f64) -> EngineResult<()> {
        if let Some(params) = &self.params {
            params.check_frame(frame)?;
        }
        self.send(EncodeJob::Video {
            frame: frame.clone(),
            timestamp_us: secs_to_us(timestamp_secs),
        })
        .await
    }

    async fn push_audio(&mut self, samples: &[f32], timestamp_secs: f64) -> EngineResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.send(EncodeJob::Audio {
            samples: samples.to_vec(),
            timestamp_us: secs_to_us(timestamp_secs),
        })
        .await
    }

    async fn finalize(&mut self) -> EngineResult<Vec<u8>> {
        // Closing the queue lets the task drain and write the trailer.
        self.tx = None;
        let task = self
            .task
            .take()
            .ok_or_else(|| EngineError::invalid_state("encoder not configured"))?;
        match task.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Other(anyhow::anyhow!("encoder task failed: {e}"))),
        }
    }

    async fn abort(&mut self) {
        self.tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::debug!("Encoder queue cancelled");
        }
    }
}

/// Records the combined surface and audio stream directly.
///
/// Some platforms mute a stream that looks silent, so an inaudible
/// keep-alive tone is mixed into every audio chunk.
pub struct RecorderBackend {
    muxer: Option<Muxer>,
    params: Option<EncodeParams>,
    tone_hz: f64,
    tone_amplitude: f32,
}

impl RecorderBackend {
    pub fn new(tone_hz: f64, tone_amplitude: f32) -> Self {
        Self {
            muxer: None,
            params: None,
            tone_hz,
            tone_amplitude,
        }
    }

    fn with_keep_alive(&self, samples: &[f32], timestamp_secs: f64, sample_rate: u32) -> Vec<f32> {
        let rate = sample_rate.max(1) as f64;
        let first = (timestamp_secs * rate).round();
        let omega = 2.0 * std::f64::consts::PI * self.tone_hz;
        let mut out = samples.to_vec();
        for (n, frame) in out.chunks_mut(CHANNELS).enumerate() {
            let t = (first + n as f64) / rate;
            let tone = self.tone_amplitude * (omega * t).sin() as f32;
            for s in frame {
                *s += tone;
            }
        }
        out
    }

    fn muxer(&mut self) -> EngineResult<&mut Muxer> {
        self.muxer
            .as_mut()
            .ok_or_else(|| EngineError::invalid_state("recorder not started"))
    }
}

#[async_trait::async_trait]
impl VideoExportBackend for RecorderBackend {
    fn name(&self) -> &'static str {
        "stream-recorder"
    }

    fn extension(&self) -> &'static str {
        ContainerKind::Recorded.extension()
    }

    async fn configure(&mut self, params: &EncodeParams) -> EngineResult<()> {
        self.muxer = Some(Muxer::new(
            params.header(ContainerKind::Recorded, CodecPair::SECONDARY),
        ));
        self.params = Some(params.clone());
        tracing::debug!(tone_hz = self.tone_hz, "Recorder started");
        Ok(())
    }

    async fn push_video(&mut self, frame: &VideoFrame, timestamp_secs: f64) -> EngineResult<()> {
        if let Some(params) = &self.params {
            params.check_frame(frame)?;
        }
        let payload = CodecPair::SECONDARY.video.encode(frame);
        self.muxer()?.write_video(secs_to_us(timestamp_secs), &payload)?;
        Ok(())
    }

    async fn push_audio(&mut self, samples: &[f32], timestamp_secs: f64) -> EngineResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let sample_rate = self.params.as_ref().map_or(48_000, |p| p.sample_rate);
        let mixed = self.with_keep_alive(samples, timestamp_secs, sample_rate);
        let payload = CodecPair::SECONDARY.audio.encode(&mixed);
        self.muxer()?.write_audio(secs_to_us(timestamp_secs), &payload)?;
        Ok(())
    }

    async fn finalize(&mut self) -> EngineResult<Vec<u8>> {
        let muxer = self
            .muxer
            .take()
            .ok_or_else(|| EngineError::invalid_state("recorder not started"))?;
        Ok(muxer.finalize())
    }

    async fn abort(&mut self) {
        self.muxer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerFile;

    fn params() -> EncodeParams {
        EncodeParams::new(&OutputConfig::default(), 4, 2)
    }

    fn frame() -> VideoFrame {
        VideoFrame::solid(4, 2, [50, 60, 70, 255])
    }

    #[test]
    fn test_selection_order() {
        let tuning = TuningConfig::default();
        let primary = select_backend(&Capabilities::full(), &tuning).unwrap();
        assert_eq!(primary.name(), "encoder-muxer");
        assert_eq!(primary.extension(), "rcv");

        let recorder = select_backend(&Capabilities::recorder_only(), &tuning).unwrap();
        assert_eq!(recorder.name(), "stream-recorder");
        assert_eq!(recorder.extension(), "rcr");

        assert!(matches!(
            select_backend(&Capabilities::none(), &tuning),
            Err(EngineError::EncoderUnsupported { .. })
        ));
    }

    #[test]
    fn test_limited_platform_gets_secondary_pair() {
        let platform = PlatformProfile {
            capability_limited: true,
            ..PlatformProfile::default()
        };
        let caps = Capabilities::probe(&platform);
        assert!(!caps.supports(CodecPair::PRIMARY));
        assert!(caps.supports(CodecPair::SECONDARY));
    }

    #[tokio::test]
    async fn test_encoder_muxes_in_order() {
        let mut backend = EncoderMuxBackend::new(CodecPair::PRIMARY);
        backend.configure(&params()).await.unwrap();
        for i in 0..3 {
            backend.push_video(&frame(), i as f64 / 30.0).await.unwrap();
        }
        backend.push_audio(&[0.1, 0.1, 0.2, 0.2], 0.0).await.unwrap();
        let bytes = backend.finalize().await.unwrap();

        let file = ContainerFile::parse(&bytes).unwrap();
        assert_eq!(file.frame_count(), 3);
        assert_eq!(file.header.codecs, CodecPair::PRIMARY);
        assert_eq!(file.decode_audio().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_encoder_surfaces_timestamp_errors() {
        let mut backend = EncoderMuxBackend::new(CodecPair::PRIMARY);
        backend.configure(&params()).await.unwrap();
        backend.push_video(&frame(), 1.0).await.unwrap();
        backend.push_video(&frame(), 0.5).await.unwrap();
        let err = backend.finalize().await.unwrap_err();
        assert!(matches!(err, EngineError::EncodeQueueError { .. }));
    }

    #[tokio::test]
    async fn test_wrong_frame_size_is_rejected() {
        let mut backend = EncoderMuxBackend::new(CodecPair::PRIMARY);
        backend.configure(&params()).await.unwrap();
        let big = VideoFrame::solid(8, 8, [0, 0, 0, 255]);
        assert!(backend.push_video(&big, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_abort_then_finalize_fails() {
        let mut backend = EncoderMuxBackend::new(CodecPair::PRIMARY);
        backend.configure(&params()).await.unwrap();
        backend.push_video(&frame(), 0.0).await.unwrap();
        backend.abort().await;
        assert!(backend.finalize().await.is_err());
        assert!(backend.push_video(&frame(), 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_recorder_injects_keep_alive_tone() {
        let mut backend = RecorderBackend::new(20.0, 1e-4);
        backend.configure(&params()).await.unwrap();
        backend.push_video(&frame(), 0.0).await.unwrap();
        let silence = vec![0.0f32; 4800 * CHANNELS];
        backend.push_audio(&silence, 0.0).await.unwrap();
        let bytes = backend.finalize().await.unwrap();

        let file = ContainerFile::parse(&bytes).unwrap();
        assert_eq!(file.header.kind, ContainerKind::Recorded);
        let samples = file.decode_audio().unwrap();
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.0);
        assert!(peak < 1e-3);
    }
}

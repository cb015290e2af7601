//! Audio prerender for export.
//!
//! The preferred path decodes every audio-bearing source once and mixes it
//! offline with the same gain automation live playback uses. A source
//! that will not decode offline is extracted in real time instead. When
//! neither works the session captures the live graph during encode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use reelcut_common::error::{EngineError, EngineResult};
use reelcut_playback::EnvelopeScheduler;
use reelcut_timeline::{AudioPlacement, GainAutomation, Timeline};

use crate::control::ExportControl;

/// Every buffer in the export path is interleaved stereo.
pub const CHANNELS: usize = 2;

/// Interleaved stereo samples at a fixed rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        debug_assert_eq!(samples.len() % CHANNELS, 0);
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn silent(sample_rate: u32, frames: usize) -> Self {
        Self::new(sample_rate, vec![0.0; frames * CHANNELS])
    }

    /// A sine tone, identical on both channels.
    pub fn tone(sample_rate: u32, hz: f64, amplitude: f32, frames: usize) -> Self {
        let mut samples = Vec::with_capacity(frames * CHANNELS);
        for i in 0..frames {
            let phase = 2.0 * std::f64::consts::PI * hz * i as f64 / sample_rate as f64;
            let v = amplitude * phase.sin() as f32;
            samples.push(v);
            samples.push(v);
        }
        Self::new(sample_rate, samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn frame(&self, index: usize) -> Option<[f32; 2]> {
        let i = index * CHANNELS;
        Some([*self.samples.get(i)?, *self.samples.get(i + 1)?])
    }

    /// Interleaved samples for frames `[start, start + len)`, clipped.
    pub fn slice_frames(&self, start: usize, len: usize) -> &[f32] {
        let begin = (start * CHANNELS).min(self.samples.len());
        let end = ((start + len) * CHANNELS).min(self.samples.len());
        &self.samples[begin..end]
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }
}

/// Offline decoder for a whole source.
#[async_trait::async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, source: &str, sample_rate: u32) -> EngineResult<AudioBuffer>;
}

/// Real-time extraction: plays a source through a live handle and records
/// it through a processing tap. Takes roughly the source's length.
#[async_trait::async_trait]
pub trait RealtimeExtractor: Send + Sync {
    async fn extract(
        &self,
        source: &str,
        sample_rate: u32,
        control: &ExportControl,
    ) -> EngineResult<AudioBuffer>;
}

/// Sample-processing tap on the combined live output.
pub trait CaptureTap: Send {
    /// Pull the next `frames` sample frames, interleaved stereo.
    fn pull(&mut self, frames: usize) -> Vec<f32>;
}

/// Tap for hosts that accept a silent soundtrack when live capture is
/// the only option left.
#[derive(Debug, Default)]
pub struct SilentTap;

impl CaptureTap for SilentTap {
    fn pull(&mut self, frames: usize) -> Vec<f32> {
        vec![0.0; frames * CHANNELS]
    }
}

/// Audio inputs the host hands to an export.
#[derive(Default)]
pub struct AudioSources {
    pub decoder: Option<Arc<dyn AudioDecoder>>,
    pub extractor: Option<Arc<dyn RealtimeExtractor>>,
    pub capture_tap: Option<Box<dyn CaptureTap>>,
}

impl AudioSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn RealtimeExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_capture_tap(mut self, tap: Box<dyn CaptureTap>) -> Self {
        self.capture_tap = Some(tap);
        self
    }
}

/// How the export's audio was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioTier {
    /// Every source decoded offline.
    Offline,
    /// At least one source needed real-time extraction.
    RealtimeExtraction,
    /// Captured from the live graph during encode.
    LiveCapture,
}

pub enum AudioPlan {
    Prerendered { buffer: AudioBuffer, tier: AudioTier },
    LiveCapture,
}

impl AudioPlan {
    pub fn tier(&self) -> AudioTier {
        match self {
            Self::Prerendered { tier, .. } => *tier,
            Self::LiveCapture => AudioTier::LiveCapture,
        }
    }
}

struct Voice {
    key: String,
    placement: AudioPlacement,
    buffer: Arc<AudioBuffer>,
}

/// Batch mixer sharing the live graph's envelope API.
pub struct OfflineMixer {
    sample_rate: u32,
    total_duration: f64,
    voices: Vec<Voice>,
    schedules: HashMap<String, GainAutomation>,
}

impl OfflineMixer {
    pub fn new(sample_rate: u32, total_duration: f64) -> Self {
        Self {
            sample_rate,
            total_duration: total_duration.max(0.0),
            voices: Vec::new(),
            schedules: HashMap::new(),
        }
    }

    /// Output length in sample frames.
    pub fn frames(&self) -> usize {
        (self.total_duration * self.sample_rate as f64).round() as usize
    }

    /// Register a decoded source at its placement. Gain comes from the
    /// automation scheduled under `key`.
    pub fn add_voice(&mut self, key: impl Into<String>, placement: AudioPlacement, buffer: Arc<AudioBuffer>) {
        self.voices.push(Voice {
            key: key.into(),
            placement,
            buffer,
        });
    }

    pub fn voices(&self) -> usize {
        self.voices.len()
    }

    /// Mix every voice, clipping anything past the total duration.
    pub fn render(&self) -> AudioBuffer {
        let frames = self.frames();
        let rate = self.sample_rate as f64;
        let mut out = vec![0.0f32; frames * CHANNELS];

        for voice in &self.voices {
            let Some(automation) = self.schedules.get(&voice.key) else {
                continue;
            };
            let placement = &voice.placement;
            let first = (placement.timeline_start * rate).round() as usize;
            let last = (placement.clipped_end(self.total_duration) * rate).round() as usize;
            let src_rate = voice.buffer.sample_rate() as f64;

            for i in first..last.min(frames) {
                let t = i as f64 / rate;
                let src_pos = placement.source_offset + (t - placement.timeline_start);
                let src_index = (src_pos * src_rate).floor() as usize;
                let Some([l, r]) = voice.buffer.frame(src_index) else {
                    break;
                };
                let gain = automation.value_at(t) as f32;
                out[i * CHANNELS] += l * gain;
                out[i * CHANNELS + 1] += r * gain;
            }
        }

        for s in &mut out {
            *s = s.clamp(-1.0, 1.0);
        }
        AudioBuffer::new(self.sample_rate, out)
    }
}

impl EnvelopeScheduler for OfflineMixer {
    fn schedule(&mut self, key: &str, automation: GainAutomation) {
        self.schedules.insert(key.to_string(), automation);
    }

    fn clear_schedule(&mut self, key: &str) {
        self.schedules.remove(key);
    }
}

/// Phase A: produce the export's audio.
///
/// Each distinct source is decoded once. Decode failures fall back to
/// real-time extraction per source; if that is unavailable or fails too,
/// the whole session switches to live capture.
pub async fn prerender_audio(
    timeline: &Timeline,
    sources: &AudioSources,
    sample_rate: u32,
    control: &ExportControl,
) -> EngineResult<AudioPlan> {
    let total = timeline.total_duration();
    let placements: Vec<AudioPlacement> = timeline
        .audio_placements()
        .into_iter()
        .filter(|p| p.clipped_length(total) > 0.0)
        .collect();

    let mut mixer = OfflineMixer::new(sample_rate, total);
    if placements.is_empty() {
        tracing::debug!("No audible sources, prerendering silence");
        return Ok(AudioPlan::Prerendered {
            buffer: mixer.render(),
            tier: AudioTier::Offline,
        });
    }

    let Some(decoder) = sources.decoder.as_ref() else {
        tracing::warn!("No offline decoder available, capturing audio live");
        return Ok(AudioPlan::LiveCapture);
    };

    let mut decoded: HashMap<String, Arc<AudioBuffer>> = HashMap::new();
    let mut extracted: HashSet<String> = HashSet::new();
    for placement in &placements {
        control.check()?;
        if decoded.contains_key(&placement.source) {
            continue;
        }
        let buffer = match decoder.decode(&placement.source, sample_rate).await {
            Ok(buffer) => buffer,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(source = %placement.source, error = %e, "Offline decode failed, extracting in real time");
                match extract(sources, &placement.source, sample_rate, control).await? {
                    Some(buffer) => {
                        extracted.insert(placement.source.clone());
                        buffer
                    }
                    None => {
                        tracing::warn!(source = %placement.source, "Extraction unavailable, capturing audio live");
                        return Ok(AudioPlan::LiveCapture);
                    }
                }
            }
            Err(e) => return Err(e),
        };
        decoded.insert(placement.source.clone(), Arc::new(buffer));
    }

    for (n, placement) in placements.iter().enumerate() {
        let Some(buffer) = decoded.get(&placement.source) else {
            continue;
        };
        let key = format!("{}#{n}", placement.source);
        mixer.schedule(&key, placement.automation(total));
        mixer.add_voice(key, placement.clone(), buffer.clone());
    }

    let buffer = mixer.render();
    let tier = if extracted.is_empty() {
        AudioTier::Offline
    } else {
        AudioTier::RealtimeExtraction
    };
    tracing::info!(
        voices = mixer.voices(),
        frames = buffer.frames(),
        peak = buffer.peak(),
        ?tier,
        "Audio prerendered"
    );
    Ok(AudioPlan::Prerendered { buffer, tier })
}

/// `Ok(None)` when extraction is unavailable or failed recoverably.
async fn extract(
    sources: &AudioSources,
    source: &str,
    sample_rate: u32,
    control: &ExportControl,
) -> EngineResult<Option<AudioBuffer>> {
    let Some(extractor) = sources.extractor.as_ref() else {
        return Ok(None);
    };
    match extractor.extract(source, sample_rate, control).await {
        Ok(buffer) => Ok(Some(buffer)),
        Err(e) if e.is_abort() => Err(e),
        Err(e) => {
            tracing::warn!(source = %source, error = %e, "Real-time extraction failed");
            Ok(None)
        }
    }
}

/// Tone-generating sources for the CLI and tests.
///
/// Each registered source decodes to a sine tone; sources marked
/// undecodable fail offline decode but still extract in real time.
#[derive(Debug, Clone, Default)]
pub struct SyntheticAudio {
    tones: HashMap<String, (f64, f32, f64)>,
    undecodable: HashSet<String>,
    extraction_step: Duration,
}

impl SyntheticAudio {
    pub fn new() -> Self {
        Self {
            extraction_step: Duration::from_millis(100),
            ..Self::default()
        }
    }

    pub fn with_tone(mut self, source: impl Into<String>, hz: f64, amplitude: f32, secs: f64) -> Self {
        self.tones.insert(source.into(), (hz, amplitude, secs));
        self
    }

    pub fn undecodable(mut self, source: impl Into<String>) -> Self {
        self.undecodable.insert(source.into());
        self
    }

    fn render(&self, source: &str, sample_rate: u32) -> EngineResult<AudioBuffer> {
        let (hz, amplitude, secs) = self
            .tones
            .get(source)
            .copied()
            .ok_or_else(|| EngineError::decode(source, "unknown source"))?;
        let frames = (secs * sample_rate as f64).round() as usize;
        Ok(AudioBuffer::tone(sample_rate, hz, amplitude, frames))
    }
}

#[async_trait::async_trait]
impl AudioDecoder for SyntheticAudio {
    async fn decode(&self, source: &str, sample_rate: u32) -> EngineResult<AudioBuffer> {
        if self.undecodable.contains(source) {
            return Err(EngineError::decode(source, "container not decodable offline"));
        }
        self.render(source, sample_rate)
    }
}

#[async_trait::async_trait]
impl RealtimeExtractor for SyntheticAudio {
    async fn extract(
        &self,
        source: &str,
        sample_rate: u32,
        control: &ExportControl,
    ) -> EngineResult<AudioBuffer> {
        let buffer = self.render(source, sample_rate)?;
        let length = Duration::from_secs_f64(buffer.duration_secs());
        let mut played = Duration::ZERO;
        while played < length {
            let step = self.extraction_step.min(length - played);
            control.sleep(step).await?;
            played += step;
        }
        Ok(buffer)
    }
}

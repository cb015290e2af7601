//! In-memory chunked container.
//!
//! Layout (little endian):
//!
//! ```text
//! magic[4] version:u16 width:u32 height:u32 fps:u32 sample_rate:u32 channels:u16
//! video_codec:(len:u8, utf8) audio_codec:(len:u8, utf8)
//! { tag:u8 ('V' | 'A') timestamp_us:u64 len:u32 payload[len] }*
//! 'E' video_chunks:u64 audio_chunks:u64
//! ```
//!
//! The trailer is written on finalize. A buffer without it is truncated.

use serde::{Deserialize, Serialize};

use reelcut_common::error::EngineError;
use reelcut_playback::VideoFrame;

use crate::codec::{AudioCodec, CodecPair, VideoCodec};

const VERSION: u16 = 1;
const TAG_VIDEO: u8 = b'V';
const TAG_AUDIO: u8 = b'A';
const TAG_END: u8 = b'E';

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Not a Reelcut container")]
    BadMagic,

    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u16),

    #[error("Unknown codec {0:?}")]
    UnknownCodec(String),

    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("Frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("{track} timestamp {timestamp_us}us is not after {previous_us}us")]
    NonMonotonic {
        track: &'static str,
        previous_us: u64,
        timestamp_us: u64,
    },

    #[error("Trailer counts ({video}, {audio}) do not match chunks")]
    CountMismatch { video: u64, audio: u64 },
}

impl From<ContainerError> for EngineError {
    fn from(err: ContainerError) -> Self {
        EngineError::encode_queue(err.to_string())
    }
}

/// Muxed encoder output or a stream recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    Muxed,
    Recorded,
}

impl ContainerKind {
    fn magic(self) -> &'static [u8; 4] {
        match self {
            Self::Muxed => b"RCV1",
            Self::Recorded => b"RCR1",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Muxed => "rcv",
            Self::Recorded => "rcr",
        }
    }

    fn from_magic(magic: &[u8]) -> Option<Self> {
        match magic {
            b"RCV1" => Some(Self::Muxed),
            b"RCR1" => Some(Self::Recorded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub kind: ContainerKind,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub codecs: CodecPair,
}

/// Seconds to container microseconds.
pub fn secs_to_us(secs: f64) -> u64 {
    (secs.max(0.0) * 1_000_000.0).round() as u64
}

/// Writes chunks into a growing buffer.
#[derive(Debug)]
pub struct Muxer {
    header: ContainerHeader,
    buf: Vec<u8>,
    video_chunks: u64,
    audio_chunks: u64,
    last_video_us: Option<u64>,
    last_audio_us: Option<u64>,
}

impl Muxer {
    pub fn new(header: ContainerHeader) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(header.kind.magic());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&header.width.to_le_bytes());
        buf.extend_from_slice(&header.height.to_le_bytes());
        buf.extend_from_slice(&header.fps.to_le_bytes());
        buf.extend_from_slice(&header.sample_rate.to_le_bytes());
        buf.extend_from_slice(&header.channels.to_le_bytes());
        for name in [header.codecs.video.name(), header.codecs.audio.name()] {
            buf.push(name.len() as u8);
            buf.extend_from_slice(name.as_bytes());
        }
        Self {
            header,
            buf,
            video_chunks: 0,
            audio_chunks: 0,
            last_video_us: None,
            last_audio_us: None,
        }
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn video_chunks(&self) -> u64 {
        self.video_chunks
    }

    pub fn audio_chunks(&self) -> u64 {
        self.audio_chunks
    }

    pub fn bytes_written(&self) -> usize {
        self.buf.len()
    }

    pub fn write_video(&mut self, timestamp_us: u64, payload: &[u8]) -> Result<(), ContainerError> {
        check_monotonic("video", self.last_video_us, timestamp_us)?;
        self.write_chunk(TAG_VIDEO, timestamp_us, payload);
        self.last_video_us = Some(timestamp_us);
        self.video_chunks += 1;
        Ok(())
    }

    pub fn write_audio(&mut self, timestamp_us: u64, payload: &[u8]) -> Result<(), ContainerError> {
        check_monotonic("audio", self.last_audio_us, timestamp_us)?;
        self.write_chunk(TAG_AUDIO, timestamp_us, payload);
        self.last_audio_us = Some(timestamp_us);
        self.audio_chunks += 1;
        Ok(())
    }

    fn write_chunk(&mut self, tag: u8, timestamp_us: u64, payload: &[u8]) {
        self.buf.push(tag);
        self.buf.extend_from_slice(&timestamp_us.to_le_bytes());
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    /// Write the trailer and hand back the finished buffer.
    pub fn finalize(mut self) -> Vec<u8> {
        self.buf.push(TAG_END);
        self.buf.extend_from_slice(&self.video_chunks.to_le_bytes());
        self.buf.extend_from_slice(&self.audio_chunks.to_le_bytes());
        self.buf
    }
}

fn check_monotonic(
    track: &'static str,
    previous: Option<u64>,
    timestamp_us: u64,
) -> Result<(), ContainerError> {
    match previous {
        Some(previous_us) if timestamp_us <= previous_us => Err(ContainerError::NonMonotonic {
            track,
            previous_us,
            timestamp_us,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub timestamp_us: u64,
    pub payload: Vec<u8>,
}

/// A parsed container.
#[derive(Debug, Clone)]
pub struct ContainerFile {
    pub header: ContainerHeader,
    pub video: Vec<Chunk>,
    pub audio: Vec<Chunk>,
}

impl ContainerFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ContainerError> {
        let mut r = Reader { buf: bytes, pos: 0 };
        let kind = ContainerKind::from_magic(r.take(4, "magic")?).ok_or(ContainerError::BadMagic)?;
        let version = r.u16("version")?;
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let width = r.u32("header")?;
        let height = r.u32("header")?;
        let fps = r.u32("header")?;
        let sample_rate = r.u32("header")?;
        let channels = r.u16("header")?;
        let video_name = r.name()?;
        let audio_name = r.name()?;
        let codecs = CodecPair {
            video: VideoCodec::from_name(&video_name)
                .ok_or(ContainerError::UnknownCodec(video_name))?,
            audio: AudioCodec::from_name(&audio_name)
                .ok_or(ContainerError::UnknownCodec(audio_name))?,
        };

        let mut video = Vec::new();
        let mut audio = Vec::new();
        loop {
            let tag = r.u8("trailer")?;
            if tag == TAG_END {
                let video_count = r.u64("trailer")?;
                let audio_count = r.u64("trailer")?;
                if video_count != video.len() as u64 || audio_count != audio.len() as u64 {
                    return Err(ContainerError::CountMismatch {
                        video: video_count,
                        audio: audio_count,
                    });
                }
                break;
            }
            let timestamp_us = r.u64("chunk")?;
            let len = r.u32("chunk")? as usize;
            let payload = r.take(len, "chunk payload")?.to_vec();
            let chunk = Chunk {
                timestamp_us,
                payload,
            };
            match tag {
                TAG_VIDEO => video.push(chunk),
                TAG_AUDIO => audio.push(chunk),
                _ => return Err(ContainerError::Truncated("chunk tag")),
            }
        }

        Ok(Self {
            header: ContainerHeader {
                kind,
                width,
                height,
                fps,
                sample_rate,
                channels,
                codecs,
            },
            video,
            audio,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.video.len()
    }

    /// Duration implied by the frame count at the container frame rate.
    pub fn duration_secs(&self) -> f64 {
        self.video.len() as f64 / self.header.fps.max(1) as f64
    }

    pub fn decode_frames(&self) -> Result<Vec<VideoFrame>, ContainerError> {
        self.video
            .iter()
            .map(|chunk| {
                self.header
                    .codecs
                    .video
                    .decode(self.header.width, self.header.height, &chunk.payload)
            })
            .collect()
    }

    /// Interleaved samples of every audio chunk, in order.
    pub fn decode_audio(&self) -> Result<Vec<f32>, ContainerError> {
        let mut samples = Vec::new();
        for chunk in &self.audio {
            samples.extend(self.header.codecs.audio.decode(&chunk.payload)?);
        }
        Ok(samples)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], ContainerError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ContainerError::Truncated(what))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ContainerError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ContainerError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, ContainerError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, ContainerError> {
        let b = self.take(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn name(&mut self) -> Result<String, ContainerError> {
        let len = self.u8("codec name")? as usize;
        let raw = self.take(len, "codec name")?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

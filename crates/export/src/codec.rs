//! Software frame and sample codecs.
//!
//! Two pairs are available. The primary pair run-length encodes RGBA and
//! stores float PCM; the secondary pair stores raw RGBA and 16-bit PCM for
//! targets that cannot take the primary formats.

use serde::{Deserialize, Serialize};

use reelcut_playback::VideoFrame;

use crate::container::ContainerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    RleRgba,
    RawRgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    PcmF32,
    PcmS16,
}

/// Video and audio codec used together in one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPair {
    pub video: VideoCodec,
    pub audio: AudioCodec,
}

impl CodecPair {
    pub const PRIMARY: CodecPair = CodecPair {
        video: VideoCodec::RleRgba,
        audio: AudioCodec::PcmF32,
    };

    pub const SECONDARY: CodecPair = CodecPair {
        video: VideoCodec::RawRgba,
        audio: AudioCodec::PcmS16,
    };
}

impl VideoCodec {
    pub fn name(self) -> &'static str {
        match self {
            Self::RleRgba => "rle-rgba",
            Self::RawRgba => "raw-rgba",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rle-rgba" => Some(Self::RleRgba),
            "raw-rgba" => Some(Self::RawRgba),
            _ => None,
        }
    }

    pub fn encode(self, frame: &VideoFrame) -> Vec<u8> {
        match self {
            Self::RawRgba => frame.data.as_ref().clone(),
            Self::RleRgba => rle_encode(&frame.data),
        }
    }

    pub fn decode(self, width: u32, height: u32, payload: &[u8]) -> Result<VideoFrame, ContainerError> {
        let expected = (width as usize) * (height as usize) * 4;
        let data = match self {
            Self::RawRgba => payload.to_vec(),
            Self::RleRgba => rle_decode(payload, expected)?,
        };
        if data.len() != expected {
            return Err(ContainerError::FrameSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(VideoFrame::new(width, height, data))
    }
}

impl AudioCodec {
    pub fn name(self) -> &'static str {
        match self {
            Self::PcmF32 => "pcm-f32",
            Self::PcmS16 => "pcm-s16",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pcm-f32" => Some(Self::PcmF32),
            "pcm-s16" => Some(Self::PcmS16),
            _ => None,
        }
    }

    pub fn encode(self, samples: &[f32]) -> Vec<u8> {
        match self {
            Self::PcmF32 => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            Self::PcmS16 => samples
                .iter()
                .flat_map(|s| {
                    let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                    v.to_le_bytes()
                })
                .collect(),
        }
    }

    pub fn decode(self, payload: &[u8]) -> Result<Vec<f32>, ContainerError> {
        match self {
            Self::PcmF32 => {
                if payload.len() % 4 != 0 {
                    return Err(ContainerError::Truncated("pcm-f32 payload"));
                }
                Ok(payload
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect())
            }
            Self::PcmS16 => {
                if payload.len() % 2 != 0 {
                    return Err(ContainerError::Truncated("pcm-s16 payload"));
                }
                Ok(payload
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
                    .collect())
            }
        }
    }
}

/// `[run length][r][g][b][a]` records, runs of at most 255 pixels.
fn rle_encode(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pixels = rgba.chunks_exact(4).peekable();
    while let Some(px) = pixels.next() {
        let mut run: u8 = 1;
        while run < u8::MAX && pixels.peek() == Some(&px) {
            pixels.next();
            run += 1;
        }
        out.push(run);
        out.extend_from_slice(px);
    }
    out
}

fn rle_decode(payload: &[u8], expected: usize) -> Result<Vec<u8>, ContainerError> {
    if payload.len() % 5 != 0 {
        return Err(ContainerError::Truncated("rle-rgba payload"));
    }
    let mut out = Vec::with_capacity(expected);
    for record in payload.chunks_exact(5) {
        for _ in 0..record[0] {
            out.extend_from_slice(&record[1..5]);
        }
        if out.len() > expected {
            break;
        }
    }
    Ok(out)
}

//! Check an exported file for black or frozen frames.

use std::path::PathBuf;

use reelcut_export::{AnalysisSettings, ContainerFile, FrameMetrics, Scope};

use crate::{AnalyzeMode, AnalyzeScope};

pub fn run(
    path: PathBuf,
    mode: AnalyzeMode,
    scope: AnalyzeScope,
    settings: AnalysisSettings,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let file = ContainerFile::parse(&bytes)
        .map_err(|e| anyhow::anyhow!("Not a Reelcut container: {e}"))?;
    let frames = file
        .decode_frames()
        .map_err(|e| anyhow::anyhow!("Failed to decode frames: {e}"))?;
    if frames.is_empty() {
        return Err(anyhow::anyhow!("No frames in {}", path.display()));
    }

    tracing::debug!(
        frames = frames.len(),
        width = file.header.width,
        height = file.header.height,
        "Decoded export"
    );

    let fps = file.header.fps.max(1) as f64;
    let metrics = FrameMetrics::from_frames(&frames);
    let scope = match scope {
        AnalyzeScope::Full => Scope::Full,
        AnalyzeScope::Tail => Scope::Tail,
    };

    let json = match mode {
        AnalyzeMode::Summary => serde_json::to_string_pretty(&metrics.summary(fps, &settings))?,
        AnalyzeMode::Black => {
            serde_json::to_string_pretty(&metrics.black_segments(fps, scope, &settings))?
        }
        AnalyzeMode::Freeze => {
            serde_json::to_string_pretty(&metrics.freeze_segments(fps, scope, &settings))?
        }
    };
    println!("{json}");

    Ok(())
}

pub mod analyze;
pub mod config;
pub mod export;
pub mod inspect;
pub mod resolve;

use std::path::Path;

use reelcut_timeline::Timeline;

/// Read a timeline JSON document.
pub fn load_timeline(path: &Path) -> anyhow::Result<Timeline> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read timeline {}: {e}", path.display()))?;
    let timeline: Timeline = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse timeline {}: {e}", path.display()))?;
    Ok(timeline)
}

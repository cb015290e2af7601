//! Export a timeline to a container file.
//!
//! Every source is stood in for by synthetic media: videos and images get
//! distinct solid colours, audio-bearing sources get distinct tones.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use reelcut_common::clock::SharedClock;
use reelcut_common::config::EngineConfig;
use reelcut_export::{
    AudioSources, Capabilities, ExportOrchestrator, ExportProgress, SyntheticAudio, TokioClock,
};
use reelcut_playback::{FrameBuffer, PlaybackEngine, SyntheticMedia, SyntheticSpec};
use reelcut_timeline::{Timeline, VisualKind};

use super::load_timeline;

const PALETTE: [[u8; 3]; 6] = [
    [200, 60, 60],
    [60, 160, 200],
    [90, 190, 80],
    [210, 170, 50],
    [150, 80, 190],
    [220, 120, 170],
];

pub async fn run(
    path: PathBuf,
    output: Option<PathBuf>,
    fps: Option<u32>,
    source_driven: bool,
    recorder: bool,
) -> anyhow::Result<()> {
    println!("Exporting timeline: {}", path.display());

    let timeline = load_timeline(&path)?;
    let mut config = EngineConfig::load();
    if let Some(fps) = fps {
        config.output.fps = fps;
    }
    if source_driven {
        config.platform.deterministic_pump = false;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let total = timeline.total_duration();
    println!(
        "  Duration: {total:.3}s ({} frames @ {}fps)",
        config.output.expected_frames(total),
        config.output.fps
    );
    println!(
        "  Resolution: {}x{}",
        config.output.width, config.output.height
    );

    let clock: SharedClock = Arc::new(TokioClock::new());
    let mut engine = PlaybackEngine::new(
        config.clone(),
        clock.clone(),
        Box::new(
            FrameBuffer::new(config.output.width, config.output.height)
                .with_native_blur(config.platform.native_blur),
        ),
    );
    bind_synthetic_media(&mut engine, &timeline, &clock);
    engine.set_timeline(timeline);
    let sources = synthetic_audio(engine.timeline());

    let mut orchestrator = ExportOrchestrator::new(config).with_progress(progress_printer());
    if recorder {
        orchestrator = orchestrator.with_capabilities(Capabilities::recorder_only());
    }

    let result = orchestrator
        .start_export(
            &mut engine,
            sources,
            |url, ext| println!("\n  Ready: {url} (.{ext})"),
            |message| println!("\n  {message}"),
        )
        .await;

    let report = match result {
        Ok(report) => report,
        Err(e) if e.is_abort() => {
            println!("Export cancelled.");
            return Ok(());
        }
        Err(e) => return Err(anyhow::anyhow!("Export failed: {e}")),
    };

    let output_path = output.unwrap_or_else(|| path.with_extension(&report.extension));
    let Some(out) = orchestrator.output() else {
        return Err(anyhow::anyhow!("Export finished without an output buffer"));
    };
    std::fs::write(&output_path, &out.bytes)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", output_path.display()))?;
    orchestrator.clear_export_url();

    println!("Export complete: {}", output_path.display());
    println!("  Backend: {}", report.backend);
    println!("  Audio: {:?}", report.audio_tier);
    println!(
        "  Frames: {} ({} backfilled), {:.3}s",
        report.frames, report.backfilled, report.duration_secs
    );
    if report.summary.has_black_at_video_end {
        println!("  [WARN] Output ends on black frames");
    }

    Ok(())
}

fn bind_synthetic_media(engine: &mut PlaybackEngine, timeline: &Timeline, clock: &SharedClock) {
    let mut bound = HashSet::new();
    for (n, item) in timeline.items.iter().enumerate() {
        if !bound.insert(item.source.clone()) {
            continue;
        }
        let color = PALETTE[n % PALETTE.len()];
        let spec = match item.kind {
            VisualKind::Video => SyntheticSpec::video(item.original_duration.max(item.duration)),
            VisualKind::Image => SyntheticSpec::image(),
        };
        engine.bind_source(Box::new(SyntheticMedia::new(
            item.source.clone(),
            spec.with_color(color),
            clock.clone(),
        )));
    }

    let tracks = timeline
        .background
        .iter()
        .map(|bgm| (bgm.source.clone(), bgm.duration))
        .chain(timeline.narrations.iter().map(|n| (n.source.clone(), n.duration)));
    for (source, duration) in tracks {
        if bound.insert(source.clone()) {
            engine.bind_source(Box::new(SyntheticMedia::new(
                source,
                SyntheticSpec::video(duration),
                clock.clone(),
            )));
        }
    }
}

fn synthetic_audio(timeline: &Timeline) -> AudioSources {
    let mut audio = SyntheticAudio::new();
    let mut seen = HashSet::new();
    for (n, placement) in timeline.audio_placements().into_iter().enumerate() {
        if !seen.insert(placement.source.clone()) {
            continue;
        }
        let hz = 220.0 * (1.0 + n as f64 * 0.25);
        let secs = placement.source_offset + placement.length;
        audio = audio.with_tone(placement.source, hz, 0.2, secs);
    }
    let audio = Arc::new(audio);
    AudioSources::new()
        .with_decoder(audio.clone())
        .with_extractor(audio)
}

fn progress_printer() -> Box<dyn Fn(ExportProgress) + Send> {
    Box::new(|p| {
        print!(
            "\r  Progress: {:.1}% ({}/{} frames, {:?})  ",
            p.progress * 100.0,
            p.frames_rendered,
            p.total_frames,
            p.phase,
        );
        let _ = std::io::stdout().flush();
    })
}

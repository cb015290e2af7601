//! Show what is active at a timeline instant.

use std::path::PathBuf;

use reelcut_common::config::EngineConfig;

use super::load_timeline;

pub fn run(path: PathBuf, time: f64) -> anyhow::Result<()> {
    let timeline = load_timeline(&path)?;
    let config = EngineConfig::load();
    let total = timeline.total_duration();

    println!("At {time:.3}s of {total:.3}s:");
    match timeline.resolve_active(time, config.tuning.end_epsilon_secs) {
        Some(active) => {
            let item = &timeline.items[active.index];
            println!(
                "  Visual: [{}] {} ({:?}) local {:.3}s",
                active.index, active.id, item.kind, active.local_time
            );
            if item.is_video() {
                println!(
                    "    Source position: {:.3}s of {}",
                    item.source_position(active.local_time),
                    item.source
                );
            }
            println!("    Alpha: {:.3}", item.envelope().alpha(active.local_time));
        }
        None => println!("  Visual: none"),
    }

    let mut any_audio = false;
    for placement in timeline.audio_placements() {
        if !placement.is_active_at(time, total) {
            continue;
        }
        any_audio = true;
        println!(
            "  Audio: {} at {:.3}s, gain {:.3}",
            placement.source,
            placement.source_position_at(time).unwrap_or(0.0),
            placement.gain_at(time, total)
        );
    }
    if !any_audio {
        println!("  Audio: silent");
    }

    let captions: Vec<_> = timeline.captions_at(time).collect();
    for caption in captions {
        let style = caption.resolve_style(&timeline.caption_settings);
        println!(
            "  Caption: \"{}\" alpha {:.3}",
            caption.text,
            caption.alpha_at(time, &style)
        );
    }

    Ok(())
}

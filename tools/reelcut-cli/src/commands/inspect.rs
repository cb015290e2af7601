//! Show timeline information.

use std::path::PathBuf;

use reelcut_timeline::Fade;

use super::load_timeline;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let timeline = load_timeline(&path)?;
    let total = timeline.total_duration();

    println!("Timeline: {}", path.display());
    println!("  Total duration: {total:.3}s");
    println!();

    println!("Items ({}):", timeline.items.len());
    for span in timeline.spans() {
        let item = &timeline.items[span.index];
        let mut notes = Vec::new();
        if item.is_pending() {
            notes.push("pending metadata".to_string());
        }
        if item.is_video() && (item.trim_start > 0.0 || item.trim_end < item.original_duration) {
            notes.push(format!("trim {:.2}..{:.2}", item.trim_start, item.trim_end));
        }
        if item.muted {
            notes.push("muted".to_string());
        }
        if item.locked {
            notes.push("locked".to_string());
        }
        println!(
            "  [{}] {:<12} {:?} {:>8.3}s .. {:>8.3}s  ({:.3}s, fade {}/{}) {}",
            span.index,
            item.id,
            item.kind,
            span.start,
            span.end,
            item.duration,
            fade_label(&item.fade_in),
            fade_label(&item.fade_out),
            notes.join(", ")
        );
    }
    println!();

    println!("Audio:");
    match &timeline.background {
        Some(bgm) => println!(
            "  Background: {} (delay {:.2}s, start point {:.2}s, volume {:.2}, fade {}/{})",
            bgm.source,
            bgm.delay,
            bgm.start_point,
            bgm.volume,
            fade_label(&bgm.fade_in),
            fade_label(&bgm.fade_out)
        ),
        None => println!("  Background: none"),
    }
    for clip in &timeline.narrations {
        println!(
            "  Narration {}: {} at {:.2}s ({:.2}s, volume {:.2})",
            clip.id,
            clip.source,
            clip.start_time,
            clip.playable(),
            clip.volume
        );
    }
    let audible = timeline
        .audio_placements()
        .iter()
        .filter(|p| p.clipped_length(total) > 0.0)
        .count();
    println!("  Audible placements: {audible}");
    println!();

    println!("Captions: {}", timeline.captions.len());
    for caption in &timeline.captions {
        println!(
            "  {:>8.3}s .. {:>8.3}s  {}",
            caption.start_time, caption.end_time, caption.text
        );
    }

    Ok(())
}

fn fade_label(fade: &Fade) -> String {
    match fade.active_duration() {
        Some(d) => format!("{d:.2}s"),
        None => "off".to_string(),
    }
}

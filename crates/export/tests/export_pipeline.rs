use std::sync::{Arc, Mutex};
use std::time::Duration;

use reelcut_common::clock::SharedClock;
use reelcut_common::config::EngineConfig;
use reelcut_common::error::EngineError;
use reelcut_export::{
    AudioSources, AudioTier, Capabilities, CaptureTap, ContainerFile, ContainerKind,
    ExportOrchestrator, ExportPhase, ExportProgress, SilentTap, SyntheticAudio, TokioClock,
};
use reelcut_playback::{FrameBuffer, PlaybackEngine, SyntheticMedia, SyntheticSpec};
use reelcut_timeline::{BackgroundTrack, VisualItem};

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.output.width = 64;
    config.output.height = 36;
    config
}

/// [video a 4s][image b 3s][video c 2s] = 9s, with a background track.
fn engine(config: &EngineConfig) -> PlaybackEngine {
    let clock: SharedClock = Arc::new(TokioClock::new());
    let mut engine = PlaybackEngine::new(
        config.clone(),
        clock.clone(),
        Box::new(FrameBuffer::new(64, 36)),
    );
    let items = [
        (VisualItem::video("a", "src-a", 4.0), SyntheticSpec::video(4.0)),
        (VisualItem::image("b", "src-b", 3.0), SyntheticSpec::image()),
        (
            VisualItem::video("c", "src-c", 2.0),
            SyntheticSpec::video(2.0).with_color([40, 180, 90]),
        ),
    ];
    for (item, spec) in items {
        let media = SyntheticMedia::new(item.source.clone(), spec, clock.clone());
        engine.add_item(item, Some(Box::new(media))).unwrap();
    }
    engine.timeline_mut().background = Some(BackgroundTrack::new("bgm", 12.0));
    engine
}

fn tone_sources() -> AudioSources {
    let audio = Arc::new(
        SyntheticAudio::new()
            .with_tone("src-a", 440.0, 0.2, 4.0)
            .with_tone("src-c", 330.0, 0.2, 2.0)
            .with_tone("bgm", 220.0, 0.1, 12.0),
    );
    AudioSources::new()
        .with_decoder(audio.clone())
        .with_extractor(audio)
}

#[tokio::test(start_paused = true)]
async fn test_nine_second_export_has_270_frames_across_hide_and_show() {
    let config = config();
    let mut engine = engine(&config);
    let progress: Arc<Mutex<Vec<ExportProgress>>> = Arc::default();
    let sink = progress.clone();
    let mut orchestrator = ExportOrchestrator::new(config)
        .with_progress(Box::new(move |p| sink.lock().unwrap().push(p)));

    let handle = orchestrator.handle();
    let toggler = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.set_visible(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.set_visible(true);
    });

    let mut completed = None;
    let report = orchestrator
        .start_export(
            &mut engine,
            tone_sources(),
            |url, ext| completed = Some((url.to_string(), ext.to_string())),
            |msg| panic!("export failed: {msg}"),
        )
        .await
        .unwrap();
    toggler.await.unwrap();

    assert_eq!(report.frames, 270);
    assert_eq!(report.audio_tier, AudioTier::Offline);
    assert!(!report.summary.has_black_at_video_end);
    assert_eq!(completed, Some((report.url.clone(), "rcv".to_string())));
    assert!(!engine.is_exporting());

    let output = orchestrator.output().unwrap();
    let file = ContainerFile::parse(&output.bytes).unwrap();
    assert_eq!(file.frame_count(), 270);
    assert!((file.duration_secs() - 9.0).abs() < 1e-9);
    assert_eq!(file.decode_audio().unwrap().len(), 9 * 48_000 * 2);

    let progress = progress.lock().unwrap();
    let last = progress.last().unwrap();
    assert_eq!(last.phase, ExportPhase::Done);
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.total_frames, 270);
}

#[tokio::test(start_paused = true)]
async fn test_source_driven_pump_reaches_expected_count() {
    let mut config = config();
    config.platform.deterministic_pump = false;
    let mut engine = engine(&config);
    let mut orchestrator = ExportOrchestrator::new(config);

    let handle = orchestrator.handle();
    let toggler = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.set_visible(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.set_visible(true);
    });

    let report = orchestrator
        .start_export(&mut engine, tone_sources(), |_, _| {}, |msg| panic!("{msg}"))
        .await
        .unwrap();
    toggler.await.unwrap();

    assert_eq!(report.frames, 270);
    assert_eq!(report.backfilled, 0);
    let session = orchestrator.session().unwrap();
    assert_eq!(session.phase(), ExportPhase::Done);
    assert_eq!(session.frames_emitted(), 270);

    // Hidden time is excised: frame 180 is still the image, 240 the last clip.
    let file = ContainerFile::parse(&orchestrator.output().unwrap().bytes).unwrap();
    let frames = file.decode_frames().unwrap();
    assert_eq!(frames.len(), 270);
    assert_eq!(frames[180].pixel(32, 18)[0], 60);
    assert_eq!(frames[240].pixel(32, 18)[0], 40);
}

#[tokio::test(start_paused = true)]
async fn test_abort_after_two_seconds_discards_output() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator = ExportOrchestrator::new(config);

    let handle = orchestrator.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.stop_export();
    });

    let mut completed = false;
    let mut errored = false;
    let result = orchestrator
        .start_export(
            &mut engine,
            tone_sources(),
            |_, _| completed = true,
            |_| errored = true,
        )
        .await;

    assert!(matches!(result, Err(EngineError::SessionAborted)));
    assert!(!completed);
    assert!(!errored);
    assert!(orchestrator.output().is_none());
    let session = orchestrator.session().unwrap();
    assert_eq!(session.phase(), ExportPhase::Aborted);
    assert!(session.frames_emitted() > 0 && session.frames_emitted() < 270);
    assert!(session.error().is_none());
    assert!(!engine.is_exporting());
}

#[tokio::test(start_paused = true)]
async fn test_recorder_fallback_keeps_stream_audible() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator =
        ExportOrchestrator::new(config).with_capabilities(Capabilities::recorder_only());

    let sources = AudioSources::new().with_capture_tap(Box::new(SilentTap));
    let report = orchestrator
        .start_export(&mut engine, sources, |_, _| {}, |msg| panic!("{msg}"))
        .await
        .unwrap();

    assert_eq!(report.extension, "rcr");
    assert_eq!(report.backend, "stream-recorder");
    assert_eq!(report.audio_tier, AudioTier::LiveCapture);

    let file = ContainerFile::parse(&orchestrator.output().unwrap().bytes).unwrap();
    assert_eq!(file.header.kind, ContainerKind::Recorded);
    assert_eq!(file.frame_count(), 270);
    let audio = file.decode_audio().unwrap();
    assert!(audio.iter().any(|s| *s != 0.0));
    assert!(audio.iter().all(|s| s.abs() < 1e-3));
}

#[tokio::test(start_paused = true)]
async fn test_no_backend_fails_with_message() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator =
        ExportOrchestrator::new(config).with_capabilities(Capabilities::none());

    let mut message = None;
    let result = orchestrator
        .start_export(
            &mut engine,
            tone_sources(),
            |_, _| panic!("no backend should not complete"),
            |msg| message = Some(msg),
        )
        .await;

    assert!(matches!(result, Err(EngineError::EncoderUnsupported { .. })));
    assert_eq!(
        message.as_deref(),
        Some("Video export is not supported on this device.")
    );
    let session = orchestrator.session().unwrap();
    assert_eq!(session.phase(), ExportPhase::Failed);
    assert!(session.error().is_some());
    assert!(!engine.is_exporting());
}

#[tokio::test(start_paused = true)]
async fn test_complete_export_keeps_rendered_prefix() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator = ExportOrchestrator::new(config);

    let handle = orchestrator.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.complete_export();
    });

    let report = orchestrator
        .start_export(&mut engine, tone_sources(), |_, _| {}, |msg| panic!("{msg}"))
        .await
        .unwrap();

    assert!(report.frames > 0 && report.frames < 270);
    assert_eq!(report.backfilled, 0);
    let file = ContainerFile::parse(&orchestrator.output().unwrap().bytes).unwrap();
    assert_eq!(file.frame_count() as u64, report.frames);
    assert_eq!(
        file.decode_audio().unwrap().len(),
        report.frames as usize * 1_600 * 2
    );
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_source_is_extracted_in_real_time() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator = ExportOrchestrator::new(config);
    let audio = Arc::new(
        SyntheticAudio::new()
            .with_tone("src-a", 440.0, 0.2, 4.0)
            .with_tone("src-c", 330.0, 0.2, 2.0)
            .with_tone("bgm", 220.0, 0.1, 12.0)
            .undecodable("bgm"),
    );
    let sources = AudioSources::new()
        .with_decoder(audio.clone())
        .with_extractor(audio);

    let report = orchestrator
        .start_export(&mut engine, sources, |_, _| {}, |msg| panic!("{msg}"))
        .await
        .unwrap();

    assert_eq!(report.audio_tier, AudioTier::RealtimeExtraction);
    assert_eq!(report.frames, 270);
}

#[tokio::test(start_paused = true)]
async fn test_clear_export_url_releases_output() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator = ExportOrchestrator::new(config);

    orchestrator
        .start_export(&mut engine, tone_sources(), |_, _| {}, |msg| panic!("{msg}"))
        .await
        .unwrap();
    assert!(orchestrator.output().is_some());

    orchestrator.clear_export_url();
    assert!(orchestrator.output().is_none());
}

/// Live tap yielding a constant level.
struct LevelTap(f32);

impl CaptureTap for LevelTap {
    fn pull(&mut self, frames: usize) -> Vec<f32> {
        vec![self.0; frames * 2]
    }
}

#[tokio::test(start_paused = true)]
async fn test_live_capture_records_host_tap() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator = ExportOrchestrator::new(config);

    let sources = AudioSources::new().with_capture_tap(Box::new(LevelTap(0.25)));
    let report = orchestrator
        .start_export(&mut engine, sources, |_, _| {}, |msg| panic!("{msg}"))
        .await
        .unwrap();

    assert_eq!(report.audio_tier, AudioTier::LiveCapture);
    let file = ContainerFile::parse(&orchestrator.output().unwrap().bytes).unwrap();
    let audio = file.decode_audio().unwrap();
    assert_eq!(audio.len(), 9 * 48_000 * 2);
    assert!(audio.iter().all(|s| (s - 0.25).abs() < 1e-6));
}

#[tokio::test(start_paused = true)]
async fn test_live_capture_without_tap_fails_instead_of_going_silent() {
    let config = config();
    let mut engine = engine(&config);
    let mut orchestrator = ExportOrchestrator::new(config);

    let mut message = None;
    let result = orchestrator
        .start_export(
            &mut engine,
            AudioSources::new(),
            |_, _| panic!("audible sources with no capture path must not complete"),
            |msg| message = Some(msg),
        )
        .await;

    assert!(matches!(result, Err(EngineError::EncoderUnsupported { .. })));
    assert!(message.is_some());
    assert!(orchestrator.output().is_none());
    let session = orchestrator.session().unwrap();
    assert_eq!(session.phase(), ExportPhase::Failed);
    assert!(!engine.is_exporting());
}

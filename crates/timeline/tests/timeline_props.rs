use proptest::prelude::*;

use reelcut_timeline::{Fade, FadeEnvelope, Timeline, VisualItem, DEFAULT_END_EPSILON};

fn timeline_from(durations: &[(bool, f64)]) -> Timeline {
    let items = durations
        .iter()
        .enumerate()
        .map(|(i, (is_video, d))| {
            if *is_video {
                VisualItem::video(format!("item-{i}"), format!("src-{i}"), *d)
            } else {
                VisualItem::image(format!("item-{i}"), format!("src-{i}"), *d)
            }
        })
        .collect();
    Timeline::with_items(items)
}

fn durations() -> impl Strategy<Value = Vec<(bool, f64)>> {
    prop::collection::vec((any::<bool>(), 0.1f64..20.0), 1..12)
}

proptest! {
    #[test]
    fn total_duration_is_sum_of_items(durs in durations()) {
        let timeline = timeline_from(&durs);
        let expected: f64 = durs.iter().map(|(_, d)| d).sum();
        prop_assert!((timeline.total_duration() - expected).abs() < 1e-9);
    }

    #[test]
    fn resolve_active_defined_across_timeline(durs in durations(), frac in 0.0f64..1.0) {
        let timeline = timeline_from(&durs);
        let total = timeline.total_duration();
        let time = total * frac;
        let active = timeline.resolve_active(time, DEFAULT_END_EPSILON);
        prop_assert!(active.is_some());
        let active = active.unwrap();
        let item = &timeline.items[active.index];
        prop_assert!(active.local_time >= 0.0);
        prop_assert!(active.local_time <= item.duration);
        let offset = timeline.offset_of(active.index).unwrap();
        prop_assert!((offset + active.local_time - time).abs() < 1e-6);
    }

    #[test]
    fn exact_boundaries_resolve_to_next_item(durs in durations()) {
        let timeline = timeline_from(&durs);
        for span in timeline.spans().iter().skip(1) {
            let active = timeline.resolve_active(span.start, DEFAULT_END_EPSILON).unwrap();
            prop_assert_eq!(active.index, span.index);
            prop_assert_eq!(active.local_time, 0.0);
        }
    }

    #[test]
    fn fade_envelope_hits_zero_and_base(base in 0.0f64..1.0, ramp in 0.05f64..5.0) {
        let env = FadeEnvelope::new(Fade::on(ramp), Fade::OFF, ramp * 3.0);
        prop_assert_eq!(env.level(0.0, base), 0.0);
        prop_assert!((env.level(ramp, base) - base).abs() < 1e-12);
    }
}

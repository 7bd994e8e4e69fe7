//! Property-based tests for wind-track building.

use proptest::prelude::*;
use windsync_track::{MIN_EVENT_SPACING_MS, Offsets, TrackWarning, WindTrack, format_position};

// Strategy for generating offsets in the ranges users actually configure
fn offsets() -> impl Strategy<Value = Offsets> {
    (0i64..5_000, 0i64..3_000, -1_000i64..1_000).prop_map(|(global, spinup, spindown)| {
        Offsets {
            global_ms: global,
            spinup_ms: spinup,
            spindown_ms: spindown,
            special_enabled: false,
        }
    })
}

// Strategy for generating fan command names
fn command() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("OFF"), Just("LOW"), Just("MED"), Just("HIGH"), Just("LOW,SWING")]
}

// Strategy for generating an ordered list of (gap_ms, command) lines
fn ordered_lines() -> impl Strategy<Value = Vec<(u64, &'static str)>> {
    prop::collection::vec((0u64..20_000, command()), 1..40)
}

fn render(lines: &[(u64, &str)]) -> (String, Vec<u64>) {
    let mut at = 0u64;
    let mut text = String::new();
    let mut times = Vec::new();
    for (gap, cmd) in lines {
        at += gap;
        times.push(at);
        text.push_str(&format!(
            "{},{}\n",
            format_position(std::time::Duration::from_millis(at)),
            cmd
        ));
    }
    (text, times)
}

proptest! {
    #[test]
    fn positions_strictly_increase_with_min_spacing(
        lines in ordered_lines(),
        offsets in offsets(),
    ) {
        let (text, _) = render(&lines);
        let track = WindTrack::parse(&text, &offsets);

        prop_assert!(track.warning.is_none());
        prop_assert_eq!(track.events.len(), lines.len());
        for pair in track.events.windows(2) {
            let gap = pair[1].position.as_millis() as i64 - pair[0].position.as_millis() as i64;
            prop_assert!(gap >= MIN_EVENT_SPACING_MS, "gap {} too small", gap);
        }
    }

    #[test]
    fn only_one_event_at_zero(
        lines in ordered_lines(),
        offsets in offsets(),
    ) {
        let (text, _) = render(&lines);
        let track = WindTrack::parse(&text, &offsets);

        let zeros = track.events.iter().filter(|e| e.position.is_zero()).count();
        prop_assert!(zeros <= 1);
        if zeros == 1 {
            prop_assert!(track.events[0].position.is_zero());
        }
    }

    #[test]
    fn out_of_order_keeps_prefix(
        lines in ordered_lines(),
        back in 1u64..10_000,
        offsets in offsets(),
    ) {
        let (mut text, times) = render(&lines);
        let last = *times.last().unwrap();
        prop_assume!(last >= back);
        text.push_str(&format!(
            "{},HIGH\n",
            format_position(std::time::Duration::from_millis(last - back))
        ));
        text.push_str(&format!(
            "{},OFF\n",
            format_position(std::time::Duration::from_millis(last + 60_000))
        ));

        let track = WindTrack::parse(&text, &offsets);

        prop_assert_eq!(track.events.len(), lines.len());
        prop_assert_eq!(
            track.warning,
            Some(TrackWarning::OutOfOrder { line: lines.len() + 1 })
        );
    }
}

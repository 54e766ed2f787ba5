//! Event timing over a breach mask.
//!
//! Given a breach mask and the offsets of the samples it was computed from,
//! finds the first episode of the condition, how long it lasts, and the next
//! episode after it ends.
//!
//! # Duration semantics
//! Each sample is an instantaneous reading. An episode's duration runs from
//! its first breaching sample to the first sample at which the condition is
//! known not to hold. An episode that runs to the end of the series is
//! measured to the last available offset, never extrapolated; a single
//! breaching sample at the very end therefore has a duration of zero.
//!
//! The engine is pure: identical `(mask, offsets)` inputs always produce
//! identical results, which is what keeps batch and on-demand output equal.

use crate::model::{EngineError, Episode, EventTiming, Offset};

/// Computes first/next breach timing for one series.
///
/// Requires `mask.len() == offsets.len() >= 1` and strictly increasing
/// offsets of a single kind.
pub fn compute(mask: &[bool], offsets: &[Offset]) -> Result<EventTiming, EngineError> {
    if mask.len() != offsets.len() {
        return Err(EngineError::LengthMismatch {
            mask: mask.len(),
            offsets: offsets.len(),
        });
    }
    if mask.is_empty() {
        return Err(EngineError::EmptySeries);
    }
    check_ordered(offsets)?;

    let Some(first) = find_episode(mask, 0) else {
        return Ok(EventTiming::never());
    };
    let first_duration = episode_hours(&first, offsets)?;

    let (next_breach, next_duration_hours) = match find_episode(mask, first.end) {
        Some(next) => (Some(offsets[next.start]), Some(episode_hours(&next, offsets)?)),
        None => (None, None),
    };

    Ok(EventTiming {
        first_breach: Some(offsets[first.start]),
        first_duration_hours: Some(first_duration),
        next_breach,
        next_duration_hours,
    })
}

/// Finds the first episode starting at or after index `from`.
pub fn find_episode(mask: &[bool], from: usize) -> Option<Episode> {
    let start = from + mask.get(from..)?.iter().position(|b| *b)?;
    let end = mask[start + 1..]
        .iter()
        .position(|b| !*b)
        .map_or(mask.len(), |i| start + 1 + i);
    Some(Episode { start, end })
}

/// Elapsed hours of an episode, measured to its end sample or, if it runs to
/// the end of the series, to the last sample.
fn episode_hours(episode: &Episode, offsets: &[Offset]) -> Result<f64, EngineError> {
    let stop = episode.end.min(offsets.len() - 1);
    offsets[episode.start]
        .hours_until(&offsets[stop])
        .ok_or(EngineError::MixedOffsetKinds { index: stop })
}

fn check_ordered(offsets: &[Offset]) -> Result<(), EngineError> {
    for (i, pair) in offsets.windows(2).enumerate() {
        let increasing = match (pair[0], pair[1]) {
            (Offset::Lead(a), Offset::Lead(b)) => b > a,
            (Offset::Valid(a), Offset::Valid(b)) => b > a,
            _ => return Err(EngineError::MixedOffsetKinds { index: i + 1 }),
        };
        if !increasing {
            return Err(EngineError::UnorderedSeries { index: i + 1 });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::condition::evaluate;
    use crate::model::{Condition, Operator};
    use chrono::{Duration, TimeZone, Utc};

    const F: bool = false;
    const T: bool = true;

    fn hourly(n: usize) -> Vec<Offset> {
        (0..n).map(|h| Offset::lead_hours(h as f64)).collect()
    }

    fn lead(hours: f64) -> Option<Offset> {
        Some(Offset::lead_hours(hours))
    }

    // --- Scenarios ----------------------------------------------------------

    #[test]
    fn test_two_episodes_with_hourly_offsets() {
        let mask = [F, F, T, T, F, F, T, F];
        let timing = compute(&mask, &hourly(8)).unwrap();
        assert_eq!(timing.first_breach, lead(2.0));
        assert_eq!(timing.first_duration_hours, Some(2.0));
        assert_eq!(timing.next_breach, lead(6.0));
        assert_eq!(timing.next_duration_hours, Some(1.0));
    }

    #[test]
    fn test_single_breaching_sample() {
        let timing = compute(&[T], &hourly(1)).unwrap();
        assert_eq!(timing.first_breach, lead(0.0));
        assert_eq!(timing.first_duration_hours, Some(0.0));
        assert_eq!(timing.next_breach, None);
        assert_eq!(timing.next_duration_hours, None);
    }

    #[test]
    fn test_cold_snap_from_kelvin_values() {
        let values = [Some(265.0), Some(260.0), Some(261.0), Some(270.0)];
        let mask = evaluate(&values, &Condition::new(263.15, Operator::Lt));
        let timing = compute(&mask, &hourly(4)).unwrap();
        assert_eq!(timing.first_breach, lead(1.0));
        assert_eq!(timing.first_duration_hours, Some(2.0));
        assert_eq!(timing.next_breach, None);
    }

    #[test]
    fn test_isolated_breach_measured_to_following_sample() {
        // Three-hourly data: one breaching sample followed by a clear one.
        let offsets: Vec<_> = (0..4).map(|i| Offset::lead_hours(3.0 * i as f64)).collect();
        let timing = compute(&[F, T, F, F], &offsets).unwrap();
        assert_eq!(timing.first_breach, lead(3.0));
        assert_eq!(timing.first_duration_hours, Some(3.0));
    }

    #[test]
    fn test_second_episode_running_to_end_of_series() {
        let timing = compute(&[T, F, F, T, T, T], &hourly(6)).unwrap();
        assert_eq!(timing.first_duration_hours, Some(1.0));
        assert_eq!(timing.next_breach, lead(3.0));
        assert_eq!(timing.next_duration_hours, Some(2.0));
    }

    #[test]
    fn test_irregular_offsets_use_offset_values_not_counts() {
        // Hourly for the first day, then 3-hourly, as in IFS HRES output.
        let offsets = vec![
            Offset::lead_hours(22.0),
            Offset::lead_hours(23.0),
            Offset::lead_hours(24.0),
            Offset::lead_hours(27.0),
            Offset::lead_hours(30.0),
        ];
        let timing = compute(&[F, T, T, T, F], &offsets).unwrap();
        assert_eq!(timing.first_breach, lead(23.0));
        assert_eq!(timing.first_duration_hours, Some(7.0));
    }

    #[test]
    fn test_absolute_timestamps() {
        let start = Utc.with_ymd_and_hms(2025, 1, 28, 0, 0, 0).unwrap();
        let offsets: Vec<_> = (0..5)
            .map(|i| Offset::Valid(start + Duration::minutes(30 * i)))
            .collect();
        let timing = compute(&[F, T, T, F, T], &offsets).unwrap();
        assert_eq!(timing.first_breach, Some(Offset::Valid(start + Duration::minutes(30))));
        assert_eq!(timing.first_duration_hours, Some(1.0));
        assert_eq!(timing.next_breach, Some(Offset::Valid(start + Duration::minutes(120))));
        assert_eq!(timing.next_duration_hours, Some(0.0));
    }

    // --- Boundaries ---------------------------------------------------------

    #[test]
    fn test_all_false_mask_is_all_null_for_any_length() {
        for n in 1..=12 {
            let timing = compute(&vec![F; n], &hourly(n)).unwrap();
            assert_eq!(timing, EventTiming::never(), "length {}", n);
        }
    }

    #[test]
    fn test_all_true_mask_spans_whole_series() {
        for n in 1..=12 {
            let offsets = hourly(n);
            let timing = compute(&vec![T; n], &offsets).unwrap();
            assert_eq!(timing.first_breach, Some(offsets[0]));
            assert_eq!(timing.first_duration_hours, Some((n - 1) as f64));
            assert_eq!(timing.next_breach, None, "length {}", n);
        }
    }

    // --- Properties over every mask up to length 10 -------------------------

    fn all_masks(n: usize) -> impl Iterator<Item = Vec<bool>> {
        (0u32..(1 << n)).map(move |bits| (0..n).map(|i| bits & (1 << i) != 0).collect())
    }

    #[test]
    fn test_first_breach_present_iff_any_breach() {
        for n in 1..=10 {
            let offsets = hourly(n);
            for mask in all_masks(n) {
                let timing = compute(&mask, &offsets).unwrap();
                assert_eq!(timing.first_breach.is_some(), mask.contains(&true), "{:?}", mask);
                assert_eq!(timing.first_breach.is_some(), timing.first_duration_hours.is_some());
                assert_eq!(timing.next_breach.is_some(), timing.next_duration_hours.is_some());
            }
        }
    }

    #[test]
    fn test_next_breach_strictly_after_first_episode_end() {
        for n in 1..=10 {
            let offsets = hourly(n);
            for mask in all_masks(n) {
                let timing = compute(&mask, &offsets).unwrap();
                if let Some(next) = timing.next_breach {
                    let first = find_episode(&mask, 0).unwrap();
                    assert!(first.end < n, "a next episode implies the first one ended");
                    let gap = offsets[first.end].hours_until(&next).unwrap();
                    assert!(gap > 0.0, "{:?}: next breach not after first end", mask);
                }
            }
        }
    }

    #[test]
    fn test_durations_bounded_by_series_span() {
        for n in 1..=10 {
            let offsets = hourly(n);
            let span = (n - 1) as f64;
            for mask in all_masks(n) {
                let timing = compute(&mask, &offsets).unwrap();
                for d in [timing.first_duration_hours, timing.next_duration_hours]
                    .into_iter()
                    .flatten()
                {
                    assert!((0.0..=span).contains(&d), "{:?}: duration {}", mask, d);
                }
            }
        }
    }

    #[test]
    fn test_compute_is_idempotent() {
        let mask = [F, T, T, F, T, F, F, T, T, T];
        let offsets = hourly(mask.len());
        let a = compute(&mask, &offsets).unwrap();
        let b = compute(&mask, &offsets).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.first_duration_hours.map(f64::to_bits),
            b.first_duration_hours.map(f64::to_bits)
        );
    }

    // --- Contract violations ------------------------------------------------

    #[test]
    fn test_empty_series_is_rejected() {
        assert_eq!(compute(&[], &[]), Err(EngineError::EmptySeries));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        assert_eq!(
            compute(&[T, F], &hourly(3)),
            Err(EngineError::LengthMismatch { mask: 2, offsets: 3 })
        );
    }

    #[test]
    fn test_unordered_offsets_fail_fast() {
        let offsets = vec![
            Offset::lead_hours(0.0),
            Offset::lead_hours(2.0),
            Offset::lead_hours(1.0),
        ];
        assert_eq!(
            compute(&[F, F, T], &offsets),
            Err(EngineError::UnorderedSeries { index: 2 })
        );
        let repeated = vec![Offset::lead_hours(0.0), Offset::lead_hours(0.0)];
        assert_eq!(
            compute(&[F, F], &repeated),
            Err(EngineError::UnorderedSeries { index: 1 })
        );
    }

    #[test]
    fn test_mixed_offset_kinds_are_rejected() {
        let t = Utc.with_ymd_and_hms(2025, 1, 28, 0, 0, 0).unwrap();
        let offsets = vec![Offset::lead_hours(0.0), Offset::Valid(t)];
        assert_eq!(
            compute(&[T, T], &offsets),
            Err(EngineError::MixedOffsetKinds { index: 1 })
        );
    }

    #[test]
    fn test_find_episode_from_past_end_is_none() {
        assert_eq!(find_episode(&[T, T], 2), None);
        assert_eq!(find_episode(&[T, T], 5), None);
        assert_eq!(find_episode(&[F, T, T], 0), Some(Episode { start: 1, end: 3 }));
    }
}

//! Aggregate statistic shapes shared by several repositories.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Number of rows per status value (result of a `GROUP BY status`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount<S> {
    pub status: S,
    pub count: u64,
}

/// Number of rows per calendar day (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

/// Insert zero-count days so that every day in `[start, end]` is present.
///
/// `counts` may be in any order and may contain days outside the range; those
/// are dropped. The result is sorted by date.
pub fn fill_daily_gaps(counts: &[DailyCount], start: NaiveDate, end: NaiveDate) -> Vec<DailyCount> {
    if start > end {
        return Vec::new();
    }

    let days = (end - start).num_days() as usize + 1;
    let mut filled = Vec::with_capacity(days);
    let mut day = start;
    while day <= end {
        let count = counts
            .iter()
            .filter(|c| c.date == day)
            .map(|c| c.count)
            .sum();
        filled.push(DailyCount { date: day, count });
        day += Duration::days(1);
    }
    filled
}

/// `part / whole` as a percentage rounded to two decimals; 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let raw = part as f64 * 100.0 / whole as f64;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_fill_daily_gaps_inserts_zero_days() {
        let counts = vec![
            DailyCount { date: day(4), count: 7 },
            DailyCount { date: day(2), count: 3 },
        ];
        let filled = fill_daily_gaps(&counts, day(1), day(5));

        assert_eq!(filled.len(), 5);
        assert_eq!(filled[0], DailyCount { date: day(1), count: 0 });
        assert_eq!(filled[1], DailyCount { date: day(2), count: 3 });
        assert_eq!(filled[3], DailyCount { date: day(4), count: 7 });
        assert_eq!(filled[4].count, 0);
    }

    #[test]
    fn test_fill_daily_gaps_drops_out_of_range() {
        let counts = vec![DailyCount { date: day(20), count: 9 }];
        let filled = fill_daily_gaps(&counts, day(1), day(2));
        assert!(filled.iter().all(|c| c.count == 0));
    }

    #[test]
    fn test_fill_daily_gaps_inverted_range() {
        assert!(fill_daily_gaps(&[], day(5), day(1)).is_empty());
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(5, 5), 100.0);
        assert_eq!(percentage(3, 0), 0.0);
    }

    proptest! {
        #[test]
        fn filled_range_covers_every_day(offset in 0i64..365, span in 0i64..60, hits in proptest::collection::vec((0i64..90, 0u64..50), 0..20)) {
            let start = day(1) + Duration::days(offset);
            let end = start + Duration::days(span);
            let counts: Vec<DailyCount> = hits
                .iter()
                .map(|(d, n)| DailyCount { date: start + Duration::days(*d), count: *n })
                .collect();

            let filled = fill_daily_gaps(&counts, start, end);
            prop_assert_eq!(filled.len() as i64, span + 1);
            prop_assert!(filled.windows(2).all(|w| w[1].date - w[0].date == Duration::days(1)));

            let in_range: u64 = counts.iter().filter(|c| c.date <= end).map(|c| c.count).sum();
            prop_assert_eq!(filled.iter().map(|c| c.count).sum::<u64>(), in_range);
        }

        #[test]
        fn percentage_stays_in_bounds(whole in 0u64..10_000, part_seed in 0u64..10_000) {
            let part = if whole == 0 { 0 } else { part_seed % (whole + 1) };
            let pct = percentage(part, whole);
            prop_assert!((0.0..=100.0).contains(&pct));
        }
    }
}

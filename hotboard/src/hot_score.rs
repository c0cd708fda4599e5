// Copyright (C) 2026 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of hotboard.
//
// hotboard is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// hotboard is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with hotboard.  If not,
// see <http://www.gnu.org/licenses/>.

//! # hot_score
//!
//! The ranking function.
//!
//! This is the well-known Reddit "hot" formula: the base-ten log of the net vote count (floored at
//! one), plus a time term. The time term is *not* the post's age; it's the post's creation time
//! measured from a fixed epoch, divided by 45000 seconds (12.5 hours). A post therefore never
//! "cools off"; rather, each newer post starts out a little hotter than every older one, and it
//! takes ten times the net votes to buy another 12.5 hours of standing.
//!
//! The function is pure & deterministic: re-scoring the same tallies always yields the same
//! value, which is what lets reconciliation & repeated votes overwrite scores without fear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 2025-01-01T00:00:00Z
pub const DEFAULT_EPOCH: i64 = 1_735_689_600;

const SECONDS_PER_ORDER: f64 = 45000.0;

/// The fixed reference instant for the time term, as seconds since the Unix epoch
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HotScoreEpoch(i64);

impl HotScoreEpoch {
    pub const fn new(unix_seconds: i64) -> HotScoreEpoch {
        HotScoreEpoch(unix_seconds)
    }
    pub fn as_unix_seconds(&self) -> i64 {
        self.0
    }
}

impl Default for HotScoreEpoch {
    fn default() -> Self {
        HotScoreEpoch(DEFAULT_EPOCH)
    }
}

/// Compute the hot score for a post with `ups` up-votes & `downs` down-votes, created at `created`
pub fn hot_score(ups: u64, downs: u64, created: DateTime<Utc>, epoch: HotScoreEpoch) -> f64 {
    let magnitude = (ups as i128 - downs as i128).max(1) as f64;
    let seconds = (created.timestamp() - epoch.0) as f64;
    magnitude.log10() + seconds / SECONDS_PER_ORDER
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap(/* known good */)
    }

    #[test]
    fn one_order_per_45000_seconds() {
        let epoch = HotScoreEpoch::default();
        let score = hot_score(1, 0, at(DEFAULT_EPOCH + 45000), epoch);
        assert!((score - 1.0).abs() < 1e-12);
        // Ten net votes buy one more unit:
        let score = hot_score(10, 0, at(DEFAULT_EPOCH + 45000), epoch);
        assert!((score - 2.0).abs() < 1e-12);
        // Posts from before the epoch go negative:
        let score = hot_score(0, 0, at(DEFAULT_EPOCH - 90000), epoch);
        assert!((score + 2.0).abs() < 1e-12);
    }

    #[test]
    fn net_votes_floor_at_one() {
        let epoch = HotScoreEpoch::new(0);
        let created = at(0);
        assert_eq!(hot_score(0, 0, created, epoch), 0.0);
        assert_eq!(hot_score(1, 0, created, epoch), 0.0);
        assert_eq!(hot_score(0, 25, created, epoch), 0.0);
        assert_eq!(hot_score(3, 7, created, epoch), 0.0);
    }

    #[test]
    fn monotone_in_net_votes() {
        let epoch = HotScoreEpoch::default();
        let created = at(DEFAULT_EPOCH + 123_456);
        let mut last = f64::NEG_INFINITY;
        for ups in 0..200u64 {
            let score = hot_score(ups, 17, created, epoch);
            assert!(score >= last);
            assert_eq!(score, hot_score(ups, 17, created, epoch));
            last = score;
        }
    }

    // The time term grows with the creation time itself; it does not decay with age, and the
    // current time plays no part. Pin that down.
    #[test]
    fn time_term_is_absolute_creation_time() {
        let epoch = HotScoreEpoch::default();
        let older = hot_score(100, 0, at(DEFAULT_EPOCH + 1000), epoch);
        let newer = hot_score(100, 0, at(DEFAULT_EPOCH + 46000), epoch);
        assert!((newer - older - 1.0).abs() < 1e-12);
        // A newer post with a tenth of the net votes ties the older one:
        let newer_fewer = hot_score(10, 0, at(DEFAULT_EPOCH + 46000), epoch);
        assert!((newer_fewer - older).abs() < 1e-12);
    }
}

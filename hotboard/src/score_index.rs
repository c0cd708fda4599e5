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

//! # score_index
//!
//! The cache-resident indices over posts:
//!
//! - post → hot score, for ranking by "hotness"
//! - post → creation time, for ranking by recency
//! - community → member posts, for filtered rankings
//! - post → time of last vote (the "update-time markers"), which reconciliation uses to find
//!   posts whose durable state is stale
//!
//! Scores are written here & nowhere else, but they're never *computed* here; see [votes].
//!
//! [votes]: crate::votes

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use snafu::{Backtrace, prelude::*};
use tap::Pipe;
use tracing::debug;

use crate::{
    entities::{CommunityId, ListOrder, Post, PostId},
    ordered_set::{self, Backend as OrderedSets, Keys},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to index post {post}: {source}"))]
    Index {
        post: PostId,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to list posts: {source}"))]
    List {
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to query update-time markers: {source}"))]
    Markers {
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Cache member {member} is not a post id: {source}"))]
    Member {
        member: String,
        source: crate::entities::Error,
    },
    #[snafu(display("Update-time marker {score} for post {post} is not a valid timestamp"))]
    MarkerTime {
        post: PostId,
        score: f64,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to prune update-time markers: {source}"))]
    Prune {
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read the hot score for post {post}: {source}"))]
    ReadScore {
        post: PostId,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to stamp post {post}'s update-time marker: {source}"))]
    Stamp {
        post: PostId,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to write the hot score for post {post}: {source}"))]
    WriteScore {
        post: PostId,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// A page of a ranked listing
///
/// `offset` is a one-based page number (zero is taken to mean one) and `limit` the page size; page
/// `n` covers ranks `[(n-1)*limit, n*limit)`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            offset: 1,
            limit: 10,
        }
    }
}

impl Page {
    /// The zero-based, inclusive rank range this page covers; `None` for an empty page
    fn ranks(&self) -> Option<(usize, usize)> {
        if self.limit == 0 {
            return None;
        }
        let start = self.offset.max(1).saturating_sub(1).saturating_mul(self.limit);
        let stop = start.saturating_add(self.limit - 1);
        Some((
            usize::try_from(start).unwrap_or(usize::MAX),
            usize::try_from(stop).unwrap_or(usize::MAX),
        ))
    }
}

fn to_timestamp(at: &DateTime<Utc>) -> f64 {
    at.timestamp() as f64
}

fn parse_member(member: &str) -> Result<PostId> {
    member.parse::<PostId>().context(MemberSnafu { member })
}

pub struct ScoreIndex {
    sets: Arc<dyn OrderedSets + Send + Sync>,
    keys: Keys,
    ranking_ttl: Duration,
}

impl ScoreIndex {
    /// `ranking_ttl` governs how long a community-filtered ranking is reused before being rebuilt
    pub fn new(
        sets: Arc<dyn OrderedSets + Send + Sync>,
        keys: Keys,
        ranking_ttl: Duration,
    ) -> ScoreIndex {
        ScoreIndex {
            sets,
            keys,
            ranking_ttl,
        }
    }

    /// Make a freshly-created post visible to listings
    pub async fn index_post(&self, post: &Post, initial_score: f64) -> Result<()> {
        let member = post.id().to_string();
        let id = post.id();
        self.sets
            .insert(&self.keys.post_time(), &member, to_timestamp(&post.created()))
            .await
            .context(IndexSnafu { post: id })?;
        self.sets
            .insert(&self.keys.post_score(), &member, initial_score)
            .await
            .context(IndexSnafu { post: id })?;
        // Community members contribute nothing to a filtered ranking's score; see `list()`.
        self.sets
            .insert(&self.keys.community(post.community()), &member, 0.0)
            .await
            .context(IndexSnafu { post: id })
    }

    pub async fn set_score(&self, post: PostId, score: f64) -> Result<()> {
        self.sets
            .insert(&self.keys.post_score(), &post.to_string(), score)
            .await
            .context(WriteScoreSnafu { post })
    }

    pub async fn score(&self, post: PostId) -> Result<Option<f64>> {
        self.sets
            .score(&self.keys.post_score(), &post.to_string())
            .await
            .context(ReadScoreSnafu { post })
    }

    /// Record that `post` was voted on at `at`
    pub async fn stamp_update(&self, post: PostId, at: &DateTime<Utc>) -> Result<()> {
        self.sets
            .insert(
                &self.keys.post_update_time(),
                &post.to_string(),
                to_timestamp(at),
            )
            .await
            .context(StampSnafu { post })
    }

    /// Find at most `cap` posts voted on during `[from, to]` (to the second), earliest first
    pub async fn updated_between(
        &self,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
        cap: usize,
    ) -> Result<Vec<(PostId, DateTime<Utc>)>> {
        self.sets
            .range_by_score(
                &self.keys.post_update_time(),
                to_timestamp(from),
                to_timestamp(to),
                cap,
            )
            .await
            .context(MarkersSnafu)?
            .into_iter()
            .map(|(member, score)| {
                let post = parse_member(&member)?;
                Utc.timestamp_opt(score as i64, 0)
                    .single()
                    .context(MarkerTimeSnafu { post, score })
                    .map(|at| (post, at))
            })
            .collect::<Result<Vec<(PostId, DateTime<Utc>)>>>()
    }

    /// Drop update-time markers stamped strictly before `cutoff`; return the number dropped
    pub async fn prune_markers_before(&self, cutoff: &DateTime<Utc>) -> Result<u64> {
        // Markers are whole seconds, so this excludes `cutoff` itself.
        self.sets
            .remove_range_by_score(
                &self.keys.post_update_time(),
                f64::NEG_INFINITY,
                to_timestamp(cutoff) - 1.0,
            )
            .await
            .context(PruneSnafu)
    }

    /// List post ids in descending `order`, optionally restricted to one community
    ///
    /// Community-filtered listings are served from an intersection of the community's member set
    /// with the ordering set. The intersection is cached for a short while; the member set is
    /// weighted zero so that the intersection carries the ordering scores unchanged.
    pub async fn list(
        &self,
        order: ListOrder,
        page: Page,
        community: Option<CommunityId>,
    ) -> Result<Vec<PostId>> {
        let Some((start, stop)) = page.ranks() else {
            return Ok(vec![]);
        };
        let ordering = match order {
            ListOrder::Time => self.keys.post_time(),
            ListOrder::Score => self.keys.post_score(),
        };
        let key = match community {
            None => ordering,
            Some(community) => {
                let ranking = self.keys.ranking(order, community);
                if !self.sets.exists(&ranking).await.context(ListSnafu)? {
                    debug!("Rebuilding the {order} ranking for community {community}");
                    self.sets
                        .intersect_store(
                            &ranking,
                            &[(self.keys.community(community), 0.0), (ordering, 1.0)],
                            self.ranking_ttl,
                        )
                        .await
                        .context(ListSnafu)?;
                }
                ranking
            }
        };
        self.sets
            .range_by_rank_rev(&key, start, stop)
            .await
            .context(ListSnafu)?
            .iter()
            .map(|member| parse_member(member))
            .collect::<Result<Vec<PostId>>>()?
            .pipe(Ok)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        clock::ManualClock,
        entities::UserId,
        memory::OrderedSets as InMemory,
    };

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap(/* known good */)
    }

    fn index() -> (Arc<ManualClock>, ScoreIndex) {
        let clock = Arc::new(ManualClock::new(at(1_750_000_000)));
        let sets = Arc::new(InMemory::new(clock.clone()));
        (
            clock,
            ScoreIndex::new(sets, Keys::default(), Duration::from_secs(60)),
        )
    }

    fn post(id: i64, community: i64, created: i64) -> Post {
        Post::new(
            PostId::new(id),
            UserId::new(1),
            CommunityId::new(community),
            "title",
            "content",
            at(created),
        )
    }

    #[test]
    fn pages() {
        assert_eq!(Page { offset: 1, limit: 10 }.ranks(), Some((0, 9)));
        assert_eq!(Page { offset: 0, limit: 10 }.ranks(), Some((0, 9)));
        assert_eq!(Page { offset: 3, limit: 5 }.ranks(), Some((10, 14)));
        assert_eq!(Page { offset: 3, limit: 0 }.ranks(), None);
        assert_eq!(
            Page {
                offset: u64::MAX,
                limit: 10
            }
            .ranks(),
            Some((usize::MAX, usize::MAX))
        );
    }

    #[tokio::test]
    async fn pages_past_the_end_are_empty() {
        let (_, index) = index();
        index.index_post(&post(1, 7, 1000), 0.1).await.unwrap();
        index.index_post(&post(2, 7, 2000), 0.2).await.unwrap();
        for page in [
            Page { offset: 2, limit: 2 },
            Page {
                offset: u64::MAX,
                limit: 10,
            },
            Page {
                offset: 2,
                limit: u64::MAX,
            },
        ] {
            assert!(
                index
                    .list(ListOrder::Time, page, None)
                    .await
                    .unwrap()
                    .is_empty()
            );
            assert!(
                index
                    .list(ListOrder::Score, page, Some(CommunityId::new(7)))
                    .await
                    .unwrap()
                    .is_empty()
            );
        }
    }

    #[tokio::test]
    async fn listings() {
        let (_, index) = index();
        index.index_post(&post(1, 7, 1000), 0.1).await.unwrap();
        index.index_post(&post(2, 7, 3000), 0.3).await.unwrap();
        index.index_post(&post(3, 8, 2000), -0.2).await.unwrap();
        index.set_score(PostId::new(1), 5.0).await.unwrap();
        assert_eq!(index.score(PostId::new(1)).await.unwrap(), Some(5.0));
        assert_eq!(index.score(PostId::new(9)).await.unwrap(), None);

        let ids = |v: &[i64]| v.iter().map(|n| PostId::new(*n)).collect::<Vec<PostId>>();
        assert_eq!(
            index
                .list(ListOrder::Time, Page::default(), None)
                .await
                .unwrap(),
            ids(&[2, 3, 1])
        );
        assert_eq!(
            index
                .list(ListOrder::Score, Page::default(), None)
                .await
                .unwrap(),
            ids(&[1, 2, 3])
        );
        assert_eq!(
            index
                .list(ListOrder::Score, Page { offset: 2, limit: 2 }, None)
                .await
                .unwrap(),
            ids(&[3])
        );
        assert_eq!(
            index
                .list(ListOrder::Score, Page::default(), Some(CommunityId::new(7)))
                .await
                .unwrap(),
            ids(&[1, 2])
        );
        // Negative scores survive the intersection:
        assert_eq!(
            index
                .list(ListOrder::Score, Page::default(), Some(CommunityId::new(8)))
                .await
                .unwrap(),
            ids(&[3])
        );
        assert!(
            index
                .list(ListOrder::Time, Page::default(), Some(CommunityId::new(99)))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn community_rankings_are_cached_briefly() {
        let (clock, index) = index();
        index.index_post(&post(1, 7, 1000), 1.0).await.unwrap();
        index.index_post(&post(2, 7, 2000), 2.0).await.unwrap();
        let community = Some(CommunityId::new(7));
        assert_eq!(
            index
                .list(ListOrder::Score, Page::default(), community)
                .await
                .unwrap(),
            vec![PostId::new(2), PostId::new(1)]
        );
        index.set_score(PostId::new(1), 3.0).await.unwrap();
        // Still served from the cached intersection...
        assert_eq!(
            index
                .list(ListOrder::Score, Page::default(), community)
                .await
                .unwrap(),
            vec![PostId::new(2), PostId::new(1)]
        );
        // until it expires.
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(
            index
                .list(ListOrder::Score, Page::default(), community)
                .await
                .unwrap(),
            vec![PostId::new(1), PostId::new(2)]
        );
    }

    #[tokio::test]
    async fn markers() {
        let (_, index) = index();
        index.stamp_update(PostId::new(1), &at(100)).await.unwrap();
        index.stamp_update(PostId::new(2), &at(200)).await.unwrap();
        index.stamp_update(PostId::new(3), &at(300)).await.unwrap();
        // Re-stamping overwrites:
        index.stamp_update(PostId::new(1), &at(250)).await.unwrap();

        assert_eq!(
            index.updated_between(&at(200), &at(300), 10).await.unwrap(),
            vec![
                (PostId::new(2), at(200)),
                (PostId::new(1), at(250)),
                (PostId::new(3), at(300))
            ]
        );
        assert_eq!(
            index.updated_between(&at(200), &at(300), 2).await.unwrap(),
            vec![(PostId::new(2), at(200)), (PostId::new(1), at(250))]
        );
        assert_eq!(index.prune_markers_before(&at(250)).await.unwrap(), 1);
        assert_eq!(
            index.updated_between(&at(0), &at(1000), 10).await.unwrap(),
            vec![(PostId::new(1), at(250)), (PostId::new(3), at(300))]
        );
    }
}

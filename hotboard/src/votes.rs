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

//! # votes
//!
//! Casting a vote.
//!
//! A vote touches three things in the cache: the post's ledger, its entry in the score index & its
//! update-time marker. They're written in that order with no attempt at rolling back on failure. A
//! vote that fails part-way leaves, at worst, a ledger that's ahead of the score; the next vote on
//! that post (or the next reconciliation run) re-derives the score from the ledger regardless.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::Serialize;
use snafu::prelude::*;
use tracing::debug;

use crate::{
    clock::Clock,
    counter_add,
    creation_times::{self, CreationTimes},
    entities::{PostId, UserId, VoteDirection},
    hot_score::{HotScoreEpoch, hot_score},
    metrics::{self, Instruments, Sort},
    score_index::{self, ScoreIndex},
    vote_ledger::{self, Outcome, VoteLedger},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("While resolving the creation time of post {post}: {source}"))]
    CreationTime {
        post: PostId,
        source: creation_times::Error,
    },
    #[snafu(display("While recording the vote: {source}"))]
    Ledger { source: vote_ledger::Error },
    #[snafu(display("While tallying votes: {source}"))]
    Tally { source: vote_ledger::Error },
    #[snafu(display("While updating the score index: {source}"))]
    Index { source: score_index::Error },
}

impl Error {
    /// True if this error stems from the post not existing, rather than an I/O failure
    pub fn is_unknown_post(&self) -> bool {
        matches!(
            self,
            Error::CreationTime {
                source: creation_times::Error::NoSuchPost { .. },
                ..
            }
        )
    }
}

type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("votes.recorded", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("votes.unchanged", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("votes.retracted", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("votes.failures", Sort::IntegralCounter) }

/// The state of a post immediately after a vote
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VoteReceipt {
    #[serde(skip)]
    pub outcome: Outcome,
    pub ups: u64,
    pub downs: u64,
    pub score: f64,
}

pub struct Votes {
    ledger: VoteLedger,
    index: Arc<ScoreIndex>,
    creation_times: Arc<CreationTimes>,
    clock: Arc<dyn Clock>,
    epoch: HotScoreEpoch,
    instruments: Arc<Instruments>,
}

impl Votes {
    pub fn new(
        ledger: VoteLedger,
        index: Arc<ScoreIndex>,
        creation_times: Arc<CreationTimes>,
        clock: Arc<dyn Clock>,
        epoch: HotScoreEpoch,
        instruments: Arc<Instruments>,
    ) -> Votes {
        Votes {
            ledger,
            index,
            creation_times,
            clock,
            epoch,
            instruments,
        }
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    /// Cast `user`'s vote on `post` & re-score the post
    #[tracing::instrument(skip(self))]
    pub async fn vote(
        &self,
        user: UserId,
        post: PostId,
        direction: VoteDirection,
    ) -> Result<VoteReceipt> {
        let result = self.vote1(user, post, direction).await;
        match &result {
            Ok(receipt) => {
                let name = match receipt.outcome {
                    Outcome::Recorded => "votes.recorded",
                    Outcome::Unchanged => "votes.unchanged",
                    Outcome::Retracted => "votes.retracted",
                };
                counter_add!(self.instruments, name, 1, &[]);
            }
            Err(err) => {
                counter_add!(
                    self.instruments,
                    "votes.failures",
                    1,
                    &[KeyValue::new("unknown_post", err.is_unknown_post())]
                );
            }
        }
        result
    }

    async fn vote1(
        &self,
        user: UserId,
        post: PostId,
        direction: VoteDirection,
    ) -> Result<VoteReceipt> {
        let outcome = self
            .ledger
            .set_vote(post, user, direction)
            .await
            .context(LedgerSnafu)?;
        let ups = self.ledger.count_up(post).await.context(TallySnafu)?;
        let downs = self.ledger.count_down(post).await.context(TallySnafu)?;
        let created = self
            .creation_times
            .resolve(post)
            .await
            .context(CreationTimeSnafu { post })?;
        let score = hot_score(ups, downs, created, self.epoch);
        debug!("Post {post} now has {ups} up & {downs} down; re-scored to {score}");
        self.index
            .set_score(post, score)
            .await
            .context(IndexSnafu)?;
        self.index
            .stamp_update(post, &self.clock.now())
            .await
            .context(IndexSnafu)?;
        Ok(VoteReceipt {
            outcome,
            ups,
            downs,
            score,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use crate::{
        clock::ManualClock,
        entities::{CommunityId, Post},
        memory::{OrderedSets as InMemory, Storage},
        ordered_set::{Backend as OrderedSets, Keys},
        storage::Backend as StorageBackend,
    };

    const EPOCH: i64 = 1_735_689_600;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap(/* known good */)
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        sets: Arc<InMemory>,
        index: Arc<ScoreIndex>,
        votes: Votes,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(at(1_750_000_000)));
        let sets = Arc::new(InMemory::new(clock.clone()));
        let storage = Arc::new(Storage::new());
        let instruments = Arc::new(Instruments::new("hotboard"));
        let post = Post::new(
            PostId::new(1),
            UserId::new(10),
            CommunityId::new(3),
            "first post",
            "",
            at(EPOCH + 45000),
        );
        storage.add_post(&post).await.unwrap();
        let index = Arc::new(ScoreIndex::new(
            sets.clone(),
            Keys::default(),
            Duration::from_secs(60),
        ));
        index.index_post(&post, 0.0).await.unwrap();
        let creation_times = Arc::new(CreationTimes::new(
            sets.clone(),
            storage,
            Keys::default(),
            Duration::from_secs(86400),
            instruments.clone(),
        ));
        let votes = Votes::new(
            VoteLedger::new(sets.clone(), Keys::default()),
            index.clone(),
            creation_times,
            clock.clone(),
            HotScoreEpoch::new(EPOCH),
            instruments,
        );
        Fixture {
            clock,
            sets,
            index,
            votes,
        }
    }

    #[tokio::test]
    async fn single_up_vote() {
        let f = fixture().await;
        let receipt = f
            .votes
            .vote(UserId::new(100), PostId::new(1), VoteDirection::Up)
            .await
            .unwrap();
        assert_eq!(receipt.outcome, Outcome::Recorded);
        assert_eq!((receipt.ups, receipt.downs), (1, 0));
        assert!((receipt.score - 1.0).abs() < 1e-9);
        assert_eq!(
            f.index.score(PostId::new(1)).await.unwrap(),
            Some(receipt.score)
        );
        // The update-time marker carries the wall-clock time of the vote:
        assert_eq!(
            f.index
                .updated_between(&at(1_750_000_000), &at(1_750_000_000), 10)
                .await
                .unwrap(),
            vec![(PostId::new(1), at(1_750_000_000))]
        );
    }

    #[tokio::test]
    async fn repeated_votes_are_harmless() {
        let f = fixture().await;
        let (user, post) = (UserId::new(100), PostId::new(1));
        f.votes.vote(user, post, VoteDirection::Up).await.unwrap();
        f.clock.advance(chrono::Duration::seconds(5));
        let receipt = f.votes.vote(user, post, VoteDirection::Up).await.unwrap();
        assert_eq!(receipt.outcome, Outcome::Unchanged);
        assert_eq!((receipt.ups, receipt.downs), (1, 0));
        assert_eq!(
            f.sets
                .range_by_score(&Keys::default().post_voted(post), -1.0, 1.0, 10)
                .await
                .unwrap(),
            vec![("100".to_owned(), 1.0)]
        );
    }

    #[tokio::test]
    async fn flipped_votes_are_rescored() {
        let f = fixture().await;
        let (user, post) = (UserId::new(100), PostId::new(1));
        f.votes.vote(user, post, VoteDirection::Up).await.unwrap();
        let receipt = f.votes.vote(user, post, VoteDirection::Down).await.unwrap();
        assert_eq!((receipt.ups, receipt.downs), (0, 1));
        assert_eq!(
            receipt.score,
            hot_score(0, 1, at(EPOCH + 45000), HotScoreEpoch::new(EPOCH))
        );
        assert_eq!(
            f.votes.ledger().direction(post, user).await.unwrap(),
            VoteDirection::Down
        );

        let receipt = f
            .votes
            .vote(user, post, VoteDirection::Retract)
            .await
            .unwrap();
        assert_eq!(receipt.outcome, Outcome::Retracted);
        assert_eq!((receipt.ups, receipt.downs), (0, 0));
    }

    #[tokio::test]
    async fn votes_on_unknown_posts_fail_after_the_ledger() {
        let f = fixture().await;
        let err = f
            .votes
            .vote(UserId::new(100), PostId::new(2), VoteDirection::Up)
            .await
            .unwrap_err();
        assert!(err.is_unknown_post());
        // No rollback; the ledger entry remains but the post was never scored:
        assert_eq!(f.votes.ledger().count_up(PostId::new(2)).await.unwrap(), 1);
        assert_eq!(f.index.score(PostId::new(2)).await.unwrap(), None);
    }
}

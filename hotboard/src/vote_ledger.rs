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

//! # vote_ledger
//!
//! Who voted which way on what.
//!
//! Each post gets its own ordered set mapping user id to +1 or -1. A retracted vote is the absence
//! of a member, never a stored zero, so a user has at most one entry per post by construction &
//! the tallies are just counts by score.
//!
//! Re-casting an identical vote is not an error; it's silently a no-op, so clients can retry
//! freely. The read-then-write that detects that case is not atomic: should a user race themselves,
//! the last write wins, which still leaves a single, valid entry.

use std::sync::Arc;

use snafu::{Backtrace, prelude::*};
use tracing::debug;

use crate::{
    entities::{PostId, UserId, VoteDirection},
    ordered_set::{self, Backend as OrderedSets, Keys},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to count votes on post {post}: {source}"))]
    Count {
        post: PostId,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("User {user} has a corrupt vote ({score}) recorded on post {post}"))]
    CorruptVote {
        post: PostId,
        user: UserId,
        score: f64,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read user {user}'s vote on post {post}: {source}"))]
    Read {
        post: PostId,
        user: UserId,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to record user {user}'s vote on post {post}: {source}"))]
    Write {
        post: PostId,
        user: UserId,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// What [VoteLedger::set_vote] actually did
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// A new or changed vote was written
    Recorded,
    /// The user had already voted this way; nothing was written
    Unchanged,
    /// Any existing vote was removed
    Retracted,
}

pub struct VoteLedger {
    sets: Arc<dyn OrderedSets + Send + Sync>,
    keys: Keys,
}

impl VoteLedger {
    pub fn new(sets: Arc<dyn OrderedSets + Send + Sync>, keys: Keys) -> VoteLedger {
        VoteLedger { sets, keys }
    }

    /// Record `user`'s vote on `post`
    pub async fn set_vote(
        &self,
        post: PostId,
        user: UserId,
        direction: VoteDirection,
    ) -> Result<Outcome> {
        let key = self.keys.post_voted(post);
        let member = user.to_string();
        match direction.as_score() {
            None => {
                self.sets
                    .remove(&key, &member)
                    .await
                    .context(WriteSnafu { post, user })?;
                Ok(Outcome::Retracted)
            }
            Some(score) => {
                let current = self
                    .sets
                    .score(&key, &member)
                    .await
                    .context(ReadSnafu { post, user })?;
                if current == Some(score) {
                    debug!("User {user} re-cast a {direction} vote on post {post}; ignoring");
                    return Ok(Outcome::Unchanged);
                }
                self.sets
                    .insert(&key, &member, score)
                    .await
                    .context(WriteSnafu { post, user })?;
                Ok(Outcome::Recorded)
            }
        }
    }

    /// The number of up-votes currently recorded for `post`
    pub async fn count_up(&self, post: PostId) -> Result<u64> {
        self.sets
            .count_by_score(&self.keys.post_voted(post), 1.0, 1.0)
            .await
            .context(CountSnafu { post })
    }

    /// The number of down-votes currently recorded for `post`
    pub async fn count_down(&self, post: PostId) -> Result<u64> {
        self.sets
            .count_by_score(&self.keys.post_voted(post), -1.0, -1.0)
            .await
            .context(CountSnafu { post })
    }

    /// `user`'s current stance on `post`; [VoteDirection::Retract] if they have none
    pub async fn direction(&self, post: PostId, user: UserId) -> Result<VoteDirection> {
        match self
            .sets
            .score(&self.keys.post_voted(post), &user.to_string())
            .await
            .context(ReadSnafu { post, user })?
        {
            None => Ok(VoteDirection::Retract),
            Some(score) if score == 1.0 => Ok(VoteDirection::Up),
            Some(score) if score == -1.0 => Ok(VoteDirection::Down),
            Some(score) => CorruptVoteSnafu { post, user, score }.fail(),
        }
    }
}

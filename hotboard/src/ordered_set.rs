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

//! # ordered_set
//!
//! Abstractions for the hotboard cache layer.
//!
//! The "live" half of hotboard's state lives in a key-value engine offering sorted-set semantics:
//! members mapped to floating-point scores, queried by rank or by score. Redis is the obvious
//! choice, but I want the business logic written against a small trait so that tests (and anyone
//! running hotboard on a laptop) can use the in-process implementation in [memory].
//!
//! [memory]: crate::memory
//!
//! This module also owns the key scheme; every key hotboard touches is minted by [Keys].

use std::time::Duration;

use async_trait::async_trait;

use crate::entities::{CommunityId, ListOrder, PostId};

#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

/// A single read to be issued as part of a pipelined batch; see [Backend::probe]
#[derive(Clone, Debug, PartialEq)]
pub enum Probe {
    /// The score of `member` in the set at `key`
    Score { key: String, member: String },
    /// The number of members in the set at `key` whose scores lie in `[min, max]`
    Count { key: String, min: f64, max: f64 },
}

/// The answer to a [Probe]; [Backend::probe] returns these in the same order as its input
#[derive(Clone, Debug, PartialEq)]
pub enum Reading {
    Score(Option<f64>),
    Count(u64),
}

/// Ordered-set store operations required by hotboard
///
/// All ranges are inclusive at both ends. Ties in score are broken by member, lexicographically,
/// in the direction of the range.
#[async_trait]
pub trait Backend {
    /// Insert `member` into the set at `key` with `score`, replacing any prior score
    async fn insert(&self, key: &str, member: &str, score: f64) -> Result<(), Error>;
    /// Look-up the score of `member`; `None` if either the set or the member is absent
    async fn score(&self, key: &str, member: &str) -> Result<Option<f64>, Error>;
    /// Remove `member` from the set at `key`; removing an absent member is not an error
    async fn remove(&self, key: &str, member: &str) -> Result<(), Error>;
    /// Count the members whose scores lie in `[min, max]`
    async fn count_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, Error>;
    /// Retrieve members by rank, highest score first; `start` & `stop` are zero-based ranks
    async fn range_by_rank_rev(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, Error>;
    /// Retrieve at most `limit` (member, score) pairs with scores in `[min, max]`, lowest first
    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, Error>;
    /// Remove all members with scores in `[min, max]`; return the number removed
    async fn remove_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, Error>;
    /// Store the intersection of `sources` at `dest`, expiring after `ttl`
    ///
    /// Each source is paired with a weight; a member's score in `dest` is the weighted sum of its
    /// scores in the sources.
    async fn intersect_store(
        &self,
        dest: &str,
        sources: &[(String, f64)],
        ttl: Duration,
    ) -> Result<(), Error>;
    async fn exists(&self, key: &str) -> Result<bool, Error>;
    /// Read a plain integer value
    async fn get(&self, key: &str) -> Result<Option<i64>, Error>;
    /// Write a plain integer value that will expire after `ttl`
    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), Error>;
    /// Issue a batch of reads in one round-trip
    ///
    /// The readings are not required to be mutually consistent; implementations may pipeline them
    /// without a transaction.
    async fn probe(&self, probes: &[Probe]) -> Result<Vec<Reading>, Error>;
}

/// The default prefix for all hotboard keys
pub const DEFAULT_KEY_PREFIX: &str = "hotboard:";

/// Mint hotboard cache keys
///
/// Every key is namespaced by a configurable prefix so that more than one deployment can share a
/// Redis instance.
#[derive(Clone, Debug)]
pub struct Keys {
    prefix: String,
}

impl Default for Keys {
    fn default() -> Self {
        Keys::new(DEFAULT_KEY_PREFIX)
    }
}

impl Keys {
    pub fn new(prefix: &str) -> Keys {
        Keys {
            prefix: prefix.to_owned(),
        }
    }
    /// post → creation time (Unix seconds)
    pub fn post_time(&self) -> String {
        format!("{}post:time", self.prefix)
    }
    /// post → hot score
    pub fn post_score(&self) -> String {
        format!("{}post:score", self.prefix)
    }
    /// user → vote direction, for one post
    pub fn post_voted(&self, post: PostId) -> String {
        format!("{}post:voted:{}", self.prefix, post)
    }
    /// post → time of the last vote (Unix seconds)
    pub fn post_update_time(&self) -> String {
        format!("{}post:update_time", self.prefix)
    }
    /// Cached creation time for one post
    pub fn post_created(&self, post: PostId) -> String {
        format!("{}post:created:{}", self.prefix, post)
    }
    /// The posts belonging to a community
    pub fn community(&self, community: CommunityId) -> String {
        format!("{}community:{}", self.prefix, community)
    }
    /// The short-lived, community-filtered ranking for `order`
    pub fn ranking(&self, order: ListOrder, community: CommunityId) -> String {
        format!("{}{}:{}", self.prefix, order, community)
    }
}

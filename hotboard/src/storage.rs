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

//! # storage
//!
//! Abstractions for the hotboard durable storage layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{Post, PostId};

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

/// A post's hot score as of some instant; unique on `post`
#[derive(Clone, Debug, PartialEq)]
pub struct HotScoreRecord {
    pub post: PostId,
    pub hot_score: f64,
    pub updated_at: DateTime<Utc>,
}

/// The durable post fields reconciliation may overwrite
///
/// This is the complete list; there is no way to ask the storage layer to update an arbitrary
/// column by name.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CounterUpdate {
    Likes(u64),
    Dislikes(u64),
}

#[async_trait]
pub trait Backend {
    /// Record a new post
    async fn add_post(&self, post: &Post) -> Result<(), Error>;
    /// Look-up a post's creation time; `None` means there is no such post
    async fn post_created_at(&self, post: PostId) -> Result<Option<DateTime<Utc>>, Error>;
    /// Insert or overwrite hot-score records, keyed on post
    ///
    /// Either every record is written or an error is returned; in the latter case some records
    /// may have been written, which is fine since re-applying them is harmless.
    async fn upsert_hot_scores(&self, records: &[HotScoreRecord]) -> Result<(), Error>;
    /// Overwrite like & dislike counters; same contract as `upsert_hot_scores`
    async fn apply_counter_updates(&self, updates: &[(PostId, CounterUpdate)])
    -> Result<(), Error>;
    /// Retrieve the watermark for reconciliation job `job`, if one has been recorded
    async fn watermark(&self, job: &str) -> Result<Option<DateTime<Utc>>, Error>;
    /// Record the watermark for reconciliation job `job`
    async fn set_watermark(&self, job: &str, at: &DateTime<Utc>) -> Result<(), Error>;
}

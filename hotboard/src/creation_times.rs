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

//! # creation_times
//!
//! A read-through cache of post creation times.
//!
//! Every vote needs the post's creation time to re-score it. Creation times never change, so
//! they're cached with a generous TTL; a miss falls back to the durable store & repopulates the
//! cache. The cache is strictly an optimization: failing to read it, or to repopulate it, is logged
//! & otherwise ignored. Only a failure of the durable fallback is an error.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use snafu::{Backtrace, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::PostId,
    metrics::{self, Instruments, Sort},
    ordered_set::{Backend as OrderedSets, Keys},
    storage::{self, Backend as StorageBackend},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read the creation time of post {post}: {source}"))]
    Durable {
        post: PostId,
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No such post: {post}"))]
    NoSuchPost { post: PostId, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

inventory::submit! { metrics::Registration::new("creation_times.hits", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("creation_times.misses", Sort::IntegralCounter) }

pub struct CreationTimes {
    sets: Arc<dyn OrderedSets + Send + Sync>,
    storage: Arc<dyn StorageBackend + Send + Sync>,
    keys: Keys,
    ttl: Duration,
    instruments: Arc<Instruments>,
}

impl CreationTimes {
    pub fn new(
        sets: Arc<dyn OrderedSets + Send + Sync>,
        storage: Arc<dyn StorageBackend + Send + Sync>,
        keys: Keys,
        ttl: Duration,
        instruments: Arc<Instruments>,
    ) -> CreationTimes {
        CreationTimes {
            sets,
            storage,
            keys,
            ttl,
            instruments,
        }
    }

    /// Seed the cache for a post whose creation time is already in hand
    pub async fn prime(&self, post: PostId, created: &DateTime<Utc>) {
        if let Err(err) = self
            .sets
            .set_with_ttl(&self.keys.post_created(post), created.timestamp(), self.ttl)
            .await
        {
            warn!("Failed to cache the creation time for post {post}: {err}");
        }
    }

    /// Resolve `post`'s creation time
    pub async fn resolve(&self, post: PostId) -> Result<DateTime<Utc>> {
        match self.sets.get(&self.keys.post_created(post)).await {
            Ok(Some(secs)) => match Utc.timestamp_opt(secs, 0).single() {
                Some(created) => {
                    counter_add!(self.instruments, "creation_times.hits", 1, &[]);
                    return Ok(created);
                }
                None => warn!("Cached creation time {secs} for post {post} is invalid"),
            },
            Ok(None) => debug!("Creation time for post {post} not cached"),
            Err(err) => warn!("Failed to read the cached creation time for post {post}: {err}"),
        }

        counter_add!(self.instruments, "creation_times.misses", 1, &[]);
        let created = self
            .storage
            .post_created_at(post)
            .await
            .context(DurableSnafu { post })?
            .context(NoSuchPostSnafu { post })?;
        self.prime(post, &created).await;
        Ok(created)
    }
}

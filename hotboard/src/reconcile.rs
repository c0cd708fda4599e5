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

//! # reconcile
//!
//! Flushing the cache into durable storage.
//!
//! # Introduction
//!
//! Votes only ever touch the cache. Periodically, we need to copy the results (each post's hot
//! score, and its like & dislike counts) into the durable store. Every vote stamps the post's
//! update-time marker, so the set of posts needing attention is "every post whose marker lies
//! between the last time we did this & now".
//!
//! "The last time we did this" is a watermark, kept in the durable store per job. A run:
//!
//! 1. reads the watermark `W` (defaulting to a few minutes ago if there is none, or it can't be
//!    read)
//! 2. collects every marker in `[W, now]`, up to a cap
//! 3. reads the current score & vote tallies for each of those posts in one pipelined round-trip
//! 4. upserts hot-score records & overwrites the counters
//! 5. advances the watermark
//!
//! Any failure in steps 2-5 abandons the run *without* advancing the watermark; the next run
//! simply covers a wider window. Since every durable write is an idempotent overwrite of
//! values re-derived from the cache, re-processing a post is harmless. The inclusive bounds mean
//! posts stamped exactly at `W` are re-processed, for the same reason.
//!
//! If the cap is hit, the watermark only advances as far as the last marker processed, so the
//! remainder of the window is picked up next time. Should more than `batch-cap` markers share a
//! single second, the watermark can't advance past that second; the cap must be sized well above
//! the peak per-second vote rate.
//!
//! # Scheduling
//!
//! Runs are driven by a [Scheduler], a spawned task firing the sync job & the marker pruning job
//! on their own intervals. Each job holds a lock for the duration of a run; an attempt to start a
//! run while one is underway (from an operator request, say) is skipped rather than queued.

use std::{future::Future, pin::Pin, sync::Arc, task::Poll, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use pin_project::pin_project;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tokio::{
    sync::{Mutex, Notify},
    task::{JoinError, JoinHandle},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    counter_add,
    entities::PostId,
    gauge_setf,
    gauge_setu,
    metrics::{self, Instruments, Sort},
    ordered_set::{self, Backend as OrderedSets, Keys, Probe, Reading},
    score_index::{self, ScoreIndex},
    storage::{self, Backend as StorageBackend, CounterUpdate, HotScoreRecord},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("A batch cap of zero would never make progress"))]
    BatchCap { backtrace: Backtrace },
    #[snafu(display("Failed to collect update-time markers: {source}"))]
    Candidates { source: score_index::Error },
    #[snafu(display("Failed to write {count} like/dislike counters: {source}"))]
    Counters {
        count: usize,
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to write {count} hot-score records: {source}"))]
    HotScores {
        count: usize,
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The {name} interval may not be zero"))]
    Interval { name: String, backtrace: Backtrace },
    #[snafu(display("Reconciliation failed to run to completion: {source}"))]
    Join {
        source: JoinError,
        backtrace: Backtrace,
    },
    #[snafu(display("The default lookback {lookback:?} is out of range: {source}"))]
    Lookback {
        lookback: Duration,
        source: chrono::OutOfRangeError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to prune update-time markers: {source}"))]
    Prune { source: score_index::Error },
    #[snafu(display("Failed to read scores & tallies for {count} posts: {source}"))]
    Readings {
        count: usize,
        source: ordered_set::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("A retention period of {days} days is out of range"))]
    Retention { days: u32, backtrace: Backtrace },
    #[snafu(display("Timeout shutting-down the reconciliation scheduler: {source}"))]
    ShutdownTimeout {
        source: tokio::time::error::Elapsed,
        backtrace: Backtrace,
    },
    #[snafu(display("Expected {expected} readings but got {got}"))]
    ShortReadings {
        expected: usize,
        got: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Expected a {expected} reading for post {post}, got {got:?}"))]
    UnexpectedReading {
        post: PostId,
        expected: &'static str,
        got: Reading,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to advance the {job} watermark to {at}: {source}"))]
    Watermark {
        job: String,
        at: DateTime<Utc>,
        source: storage::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          configuration                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The watermark key for the hot-score & counters job
pub const HOT_SCORE_SYNC: &str = "hot-score-sync";

/// Reconciliation configuration parameters
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Time between hot-score sync runs
    #[serde(rename = "sync-interval")]
    pub sync_interval: Duration,
    /// Time between marker pruning runs
    #[serde(rename = "prune-interval")]
    pub prune_interval: Duration,
    /// Update-time markers older than this many days are pruned
    #[serde(rename = "retention-days")]
    pub retention_days: u32,
    /// The maximum number of posts a single sync run will process
    #[serde(rename = "batch-cap")]
    pub batch_cap: usize,
    /// How far back the first sync run (or any run that can't read its watermark) looks
    #[serde(rename = "default-lookback")]
    pub default_lookback: Duration,
    /// Amount of time to wait for an in-flight run on shutdown
    #[serde(rename = "shutdown-timeout")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(600),
            prune_interval: Duration::from_secs(86400),
            retention_days: 30,
            batch_cap: 10000,
            default_lookback: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

inventory::submit! { metrics::Registration::new("reconcile.sync.runs", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("reconcile.sync.posts", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("reconcile.sync.failures", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("reconcile.sync.skipped", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("reconcile.sync.watermark", Sort::IntegralGauge) }
inventory::submit! { metrics::Registration::new("reconcile.sync.window_seconds", Sort::FloatGauge) }
inventory::submit! { metrics::Registration::new("reconcile.prune.markers", Sort::IntegralCounter) }

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Reconciler                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What a sync run did
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SyncOutcome {
    /// Another run was underway
    Skipped,
    /// No posts had been voted on; the watermark was advanced
    Idle { watermark: DateTime<Utc> },
    /// `posts` posts were written; the watermark was advanced
    Synced {
        posts: usize,
        watermark: DateTime<Utc>,
    },
}

/// What a prune run did
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PruneOutcome {
    Skipped,
    Pruned { markers: u64 },
}

// Posts per pipelined read
const PROBE_CHUNK: usize = 512;

pub struct Reconciler {
    storage: Arc<dyn StorageBackend + Send + Sync>,
    sets: Arc<dyn OrderedSets + Send + Sync>,
    keys: Keys,
    index: Arc<ScoreIndex>,
    clock: Arc<dyn Clock>,
    batch_cap: usize,
    lookback: TimeDelta,
    retention: TimeDelta,
    sync_lock: Mutex<()>,
    prune_lock: Mutex<()>,
    instruments: Arc<Instruments>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn StorageBackend + Send + Sync>,
        sets: Arc<dyn OrderedSets + Send + Sync>,
        keys: Keys,
        index: Arc<ScoreIndex>,
        clock: Arc<dyn Clock>,
        config: &Config,
        instruments: Arc<Instruments>,
    ) -> Result<Reconciler> {
        ensure!(config.batch_cap > 0, BatchCapSnafu);
        let lookback = TimeDelta::from_std(config.default_lookback).context(LookbackSnafu {
            lookback: config.default_lookback,
        })?;
        let retention = TimeDelta::try_days(config.retention_days as i64).context(RetentionSnafu {
            days: config.retention_days,
        })?;
        Ok(Reconciler {
            storage,
            sets,
            keys,
            index,
            clock,
            batch_cap: config.batch_cap,
            lookback,
            retention,
            sync_lock: Mutex::new(()),
            prune_lock: Mutex::new(()),
            instruments,
        })
    }

    /// Copy the hot scores & vote tallies of every post voted on since the last run into durable
    /// storage
    #[tracing::instrument(skip(self))]
    pub async fn sync_hot_scores(&self) -> Result<SyncOutcome> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            info!("A hot-score sync is already underway; skipping");
            counter_add!(self.instruments, "reconcile.sync.skipped", 1, &[]);
            return Ok(SyncOutcome::Skipped);
        };
        let result = self.sync_hot_scores1().await;
        match &result {
            Ok(outcome) => {
                counter_add!(self.instruments, "reconcile.sync.runs", 1, &[]);
                if let SyncOutcome::Idle { watermark } | SyncOutcome::Synced { watermark, .. } =
                    outcome
                {
                    gauge_setu!(
                        self.instruments,
                        "reconcile.sync.watermark",
                        watermark.timestamp().max(0) as u64,
                        &[]
                    );
                }
            }
            Err(err) => {
                warn!("Hot-score sync failed; the watermark was left in place: {err}");
                counter_add!(
                    self.instruments,
                    "reconcile.sync.failures",
                    1,
                    &[KeyValue::new("job", HOT_SCORE_SYNC)]
                );
            }
        }
        result
    }

    async fn sync_hot_scores1(&self) -> Result<SyncOutcome> {
        let now = self.clock.now();
        let from = match self.storage.watermark(HOT_SCORE_SYNC).await {
            Ok(Some(watermark)) => watermark,
            Ok(None) => {
                info!("No {HOT_SCORE_SYNC} watermark; starting from {:?} ago", self.lookback);
                now - self.lookback
            }
            Err(err) => {
                warn!(
                    "Failed to read the {HOT_SCORE_SYNC} watermark ({err}); starting from {:?} ago",
                    self.lookback
                );
                now - self.lookback
            }
        };

        gauge_setf!(
            self.instruments,
            "reconcile.sync.window_seconds",
            (now - from).num_milliseconds() as f64 / 1000.0,
            &[]
        );

        let candidates = self
            .index
            .updated_between(&from, &now, self.batch_cap)
            .await
            .context(CandidatesSnafu)?;
        debug!("{} posts updated in [{from}, {now}]", candidates.len());

        if candidates.is_empty() {
            let watermark = now.max(from);
            self.advance(watermark).await?;
            return Ok(SyncOutcome::Idle { watermark });
        }

        let mut records = Vec::with_capacity(candidates.len());
        let mut counters = Vec::with_capacity(2 * candidates.len());
        for chunk in candidates.chunks(PROBE_CHUNK) {
            self.read_chunk(chunk, &now, &mut records, &mut counters)
                .await?;
        }

        if !records.is_empty() {
            self.storage
                .upsert_hot_scores(&records)
                .await
                .context(HotScoresSnafu {
                    count: records.len(),
                })?;
            self.storage
                .apply_counter_updates(&counters)
                .await
                .context(CountersSnafu {
                    count: counters.len(),
                })?;
        }

        // If we hit the cap, there may be more markers in the window than we processed
        let watermark = if candidates.len() == self.batch_cap {
            candidates.last().map(|(_, at)| *at).unwrap_or(now)
        } else {
            now
        }
        .max(from);
        self.advance(watermark).await?;
        counter_add!(
            self.instruments,
            "reconcile.sync.posts",
            records.len() as u64,
            &[]
        );
        Ok(SyncOutcome::Synced {
            posts: records.len(),
            watermark,
        })
    }

    // Read the score, ups & downs for each post in `chunk` in one round-trip
    async fn read_chunk(
        &self,
        chunk: &[(PostId, DateTime<Utc>)],
        now: &DateTime<Utc>,
        records: &mut Vec<HotScoreRecord>,
        counters: &mut Vec<(PostId, CounterUpdate)>,
    ) -> Result<()> {
        let probes = chunk
            .iter()
            .flat_map(|(post, _)| {
                let voted = self.keys.post_voted(*post);
                [
                    Probe::Score {
                        key: self.keys.post_score(),
                        member: post.to_string(),
                    },
                    Probe::Count {
                        key: voted.clone(),
                        min: 1.0,
                        max: 1.0,
                    },
                    Probe::Count {
                        key: voted,
                        min: -1.0,
                        max: -1.0,
                    },
                ]
            })
            .collect::<Vec<Probe>>();
        let readings = self.sets.probe(&probes).await.context(ReadingsSnafu {
            count: chunk.len(),
        })?;
        ensure!(
            readings.len() == probes.len(),
            ShortReadingsSnafu {
                expected: probes.len(),
                got: readings.len(),
            }
        );

        for ((post, _), triple) in chunk.iter().zip(readings.chunks(3)) {
            let post = *post;
            let score = match &triple[0] {
                Reading::Score(Some(score)) => *score,
                Reading::Score(None) => {
                    warn!("Post {post} has an update-time marker but no score; skipping");
                    continue;
                }
                got => {
                    return UnexpectedReadingSnafu {
                        post,
                        expected: "score",
                        got: got.clone(),
                    }
                    .fail();
                }
            };
            let (ups, downs) = match (&triple[1], &triple[2]) {
                (Reading::Count(ups), Reading::Count(downs)) => (*ups, *downs),
                (got, _) => {
                    return UnexpectedReadingSnafu {
                        post,
                        expected: "count",
                        got: got.clone(),
                    }
                    .fail();
                }
            };
            records.push(HotScoreRecord {
                post,
                hot_score: score,
                updated_at: *now,
            });
            counters.push((post, CounterUpdate::Likes(ups)));
            counters.push((post, CounterUpdate::Dislikes(downs)));
        }
        Ok(())
    }

    async fn advance(&self, watermark: DateTime<Utc>) -> Result<()> {
        self.storage
            .set_watermark(HOT_SCORE_SYNC, &watermark)
            .await
            .context(WatermarkSnafu {
                job: HOT_SCORE_SYNC,
                at: watermark,
            })
    }

    /// Remove update-time markers older than the retention period
    #[tracing::instrument(skip(self))]
    pub async fn prune_markers(&self) -> Result<PruneOutcome> {
        let Ok(_guard) = self.prune_lock.try_lock() else {
            info!("Marker pruning is already underway; skipping");
            return Ok(PruneOutcome::Skipped);
        };
        let cutoff = self.clock.now() - self.retention;
        let markers = self
            .index
            .prune_markers_before(&cutoff)
            .await
            .context(PruneSnafu)?;
        info!("Pruned {markers} update-time markers older than {cutoff}");
        counter_add!(self.instruments, "reconcile.prune.markers", markers, &[]);
        Ok(PruneOutcome::Pruned { markers })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Scheduler                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The recurring reconciliation task
///
/// Resolves to the result of the scheduling loop once shut down. The loop itself only exits on
/// shutdown: a failed run is logged & retried at the next tick.
#[pin_project]
pub struct Scheduler {
    #[pin]
    task: JoinHandle<Result<()>>,
    shutdown: Arc<Notify>,
}

impl Future for Scheduler {
    type Output = std::result::Result<Result<()>, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.task.poll(cx)
    }
}

impl Scheduler {
    /// Start firing `reconciler`'s jobs on the intervals given in `config`
    ///
    /// The first run of each job happens one interval from now.
    pub fn spawn(reconciler: Arc<Reconciler>, config: &Config) -> Result<Scheduler> {
        ensure!(
            !config.sync_interval.is_zero(),
            IntervalSnafu {
                name: "sync-interval"
            }
        );
        ensure!(
            !config.prune_interval.is_zero(),
            IntervalSnafu {
                name: "prune-interval"
            }
        );
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(schedule(
            reconciler,
            config.sync_interval,
            config.prune_interval,
            shutdown.clone(),
        ));
        Ok(Scheduler { task, shutdown })
    }
    /// Signal the scheduler to stop & wait up to `timeout` for any in-flight run to finish
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        self.shutdown.notify_one();
        tokio::time::timeout(timeout, self.task)
            .await
            .context(ShutdownTimeoutSnafu)?
            .context(JoinSnafu)?
    }
    /// Split the instance back into its parts
    pub fn into_parts(self) -> (JoinHandle<Result<()>>, Arc<Notify>) {
        (self.task, self.shutdown)
    }
}

async fn schedule(
    reconciler: Arc<Reconciler>,
    sync_every: Duration,
    prune_every: Duration,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let mut sync = tokio::time::interval_at(Instant::now() + sync_every, sync_every);
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut prune = tokio::time::interval_at(Instant::now() + prune_every, prune_every);
    prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sync.tick() => {
                match reconciler.sync_hot_scores().await {
                    Ok(outcome) => debug!("Scheduled sync: {outcome:?}"),
                    Err(err) => error!("Scheduled sync failed: {err:#?}"),
                }
            },
            _ = prune.tick() => {
                if let Err(err) = reconciler.prune_markers().await {
                    error!("Scheduled marker prune failed: {err:#?}");
                }
            },
            _ = shutdown.notified() => {
                info!("Reconciliation scheduler shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::{
        clock::ManualClock,
        entities::{CommunityId, Post, UserId, VoteDirection},
        memory::{OrderedSets as InMemory, Storage},
        vote_ledger::VoteLedger,
    };

    const T0: i64 = 1_750_000_000;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap(/* known good */)
    }

    /// Delegates to an in-memory store, but can be told to fail hot-score upserts part-way through
    /// any batch containing a given post
    struct Flaky {
        inner: Storage,
        poison: PostId,
        failing: AtomicBool,
    }

    #[derive(Debug)]
    struct Refused(PostId);

    impl std::fmt::Display for Refused {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "upsert of post {} refused", self.0)
        }
    }

    impl std::error::Error for Refused {}

    type StorageResult<T> = std::result::Result<T, storage::Error>;

    #[async_trait]
    impl StorageBackend for Flaky {
        async fn add_post(&self, post: &Post) -> StorageResult<()> {
            self.inner.add_post(post).await
        }
        async fn post_created_at(&self, post: PostId) -> StorageResult<Option<DateTime<Utc>>> {
            self.inner.post_created_at(post).await
        }
        async fn upsert_hot_scores(&self, records: &[HotScoreRecord]) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                if let Some(idx) = records.iter().position(|r| r.post == self.poison) {
                    // Everything ahead of the poisoned record lands
                    self.inner.upsert_hot_scores(&records[..idx]).await?;
                    return Err(storage::Error::new(Refused(self.poison)));
                }
            }
            self.inner.upsert_hot_scores(records).await
        }
        async fn apply_counter_updates(
            &self,
            updates: &[(PostId, CounterUpdate)],
        ) -> StorageResult<()> {
            self.inner.apply_counter_updates(updates).await
        }
        async fn watermark(&self, job: &str) -> StorageResult<Option<DateTime<Utc>>> {
            self.inner.watermark(job).await
        }
        async fn set_watermark(&self, job: &str, at: &DateTime<Utc>) -> StorageResult<()> {
            self.inner.set_watermark(job, at).await
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        storage: Arc<Flaky>,
        index: Arc<ScoreIndex>,
        ledger: VoteLedger,
        reconciler: Arc<Reconciler>,
    }

    fn fixture(config: Config) -> Fixture {
        let clock = Arc::new(ManualClock::new(at(T0)));
        let sets = Arc::new(InMemory::new(clock.clone()));
        let storage = Arc::new(Flaky {
            inner: Storage::new(),
            poison: PostId::new(3),
            failing: AtomicBool::new(false),
        });
        let index = Arc::new(ScoreIndex::new(
            sets.clone(),
            Keys::default(),
            Duration::from_secs(60),
        ));
        let reconciler = Arc::new(
            Reconciler::new(
                storage.clone(),
                sets.clone(),
                Keys::default(),
                index.clone(),
                clock.clone(),
                &config,
                Arc::new(Instruments::new("hotboard")),
            )
            .unwrap(),
        );
        Fixture {
            clock,
            storage,
            index,
            ledger: VoteLedger::new(sets, Keys::default()),
            reconciler,
        }
    }

    impl Fixture {
        // Simulate a vote on `post`: ledger, score & marker, at the current time
        async fn vote(&self, post: i64, user: i64, direction: VoteDirection) {
            let post = PostId::new(post);
            self.ledger
                .set_vote(post, UserId::new(user), direction)
                .await
                .unwrap();
            let ups = self.ledger.count_up(post).await.unwrap();
            let downs = self.ledger.count_down(post).await.unwrap();
            self.index
                .set_score(post, ups as f64 - downs as f64)
                .await
                .unwrap();
            self.index
                .stamp_update(post, &self.clock.now())
                .await
                .unwrap();
        }
        async fn watermark(&self) -> Option<DateTime<Utc>> {
            self.storage.watermark(HOT_SCORE_SYNC).await.unwrap()
        }
        fn durable(&self, post: i64) -> Option<(f64, u64, u64)> {
            let post = PostId::new(post);
            self.storage.inner.hot_score(post).and_then(|record| {
                self.storage
                    .inner
                    .counters(post)
                    .map(|(likes, dislikes)| (record.hot_score, likes, dislikes))
            })
        }
    }

    #[tokio::test]
    async fn idle_runs_only_advance_the_watermark() {
        let f = fixture(Config::default());
        f.storage
            .set_watermark(HOT_SCORE_SYNC, &at(T0 - 60))
            .await
            .unwrap();
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Idle { watermark: at(T0) }
        );
        assert_eq!(f.watermark().await, Some(at(T0)));
        assert_eq!(f.storage.inner.writes(), 0);
    }

    #[tokio::test]
    async fn first_run_looks_back() {
        let f = fixture(Config::default());
        // Ten minutes & one second ago; just out of reach:
        f.clock.set(at(T0 - 601));
        f.vote(1, 100, VoteDirection::Up).await;
        // Exactly ten minutes ago; inclusive:
        f.clock.set(at(T0 - 600));
        f.vote(2, 100, VoteDirection::Down).await;
        f.clock.set(at(T0));

        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 1,
                watermark: at(T0)
            }
        );
        assert_eq!(f.durable(1), None);
        assert_eq!(f.durable(2), Some((-1.0, 0, 1)));
        assert_eq!(
            f.storage.inner.hot_score(PostId::new(2)).unwrap().updated_at,
            at(T0)
        );
    }

    #[tokio::test]
    async fn repeated_runs_are_idempotent() {
        let f = fixture(Config::default());
        f.vote(1, 100, VoteDirection::Up).await;
        f.vote(1, 101, VoteDirection::Up).await;
        f.vote(2, 100, VoteDirection::Down).await;
        f.reconciler.sync_hot_scores().await.unwrap();
        let first = (f.durable(1), f.durable(2));
        assert_eq!(first, (Some((2.0, 2, 0)), Some((-1.0, 0, 1))));

        // Markers stamped in the watermark's own second are re-read, to the same effect
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 2,
                watermark: at(T0)
            }
        );
        assert_eq!((f.durable(1), f.durable(2)), first);

        f.clock.advance(TimeDelta::seconds(600));
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 2,
                watermark: at(T0 + 600)
            }
        );
        assert_eq!((f.durable(1), f.durable(2)), first);

        // Once the watermark has moved past them, they're left alone
        f.clock.advance(TimeDelta::seconds(600));
        let writes = f.storage.inner.writes();
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Idle {
                watermark: at(T0 + 1200)
            }
        );
        assert_eq!(f.storage.inner.writes(), writes);
        assert_eq!((f.durable(1), f.durable(2)), first);
    }

    #[tokio::test]
    async fn votes_before_the_watermark_are_not_resynced() {
        let f = fixture(Config::default());
        f.clock.set(at(T0 - 30));
        f.vote(1, 100, VoteDirection::Up).await;
        f.vote(2, 100, VoteDirection::Down).await;
        f.clock.set(at(T0));
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 2,
                watermark: at(T0)
            }
        );
        let writes = f.storage.inner.writes();

        // Same instant, & later: nothing voted on since the watermark
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Idle { watermark: at(T0) }
        );
        f.clock.advance(TimeDelta::seconds(600));
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Idle {
                watermark: at(T0 + 600)
            }
        );
        assert_eq!(f.storage.inner.writes(), writes);
        assert_eq!(f.watermark().await, Some(at(T0 + 600)));
    }

    #[tokio::test]
    async fn failed_batches_leave_the_watermark() {
        let f = fixture(Config::default());
        f.storage
            .set_watermark(HOT_SCORE_SYNC, &at(T0 - 300))
            .await
            .unwrap();
        for post in 1..=5 {
            f.clock.set(at(T0 + post));
            f.vote(post, 100, VoteDirection::Up).await;
        }
        f.clock.set(at(T0 + 10));
        f.storage.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            f.reconciler.sync_hot_scores().await,
            Err(Error::HotScores { count: 5, .. })
        ));
        assert_eq!(f.watermark().await, Some(at(T0 - 300)));
        // The first two made it; the rest didn't
        assert!(f.storage.inner.hot_score(PostId::new(2)).is_some());
        assert!(f.storage.inner.hot_score(PostId::new(3)).is_none());

        // One more vote arrives, & the store recovers; the next run covers everything
        f.clock.set(at(T0 + 20));
        f.vote(4, 101, VoteDirection::Up).await;
        f.clock.set(at(T0 + 30));
        f.storage.failing.store(false, Ordering::SeqCst);
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 5,
                watermark: at(T0 + 30)
            }
        );
        for post in [1, 2, 3, 5] {
            assert_eq!(f.durable(post), Some((1.0, 1, 0)));
        }
        assert_eq!(f.durable(4), Some((2.0, 2, 0)));
    }

    #[tokio::test]
    async fn capped_runs_advance_to_the_last_marker() {
        let f = fixture(Config {
            batch_cap: 2,
            ..Default::default()
        });
        for post in 1..=3 {
            f.clock.set(at(T0 + 10 * post));
            f.vote(post, 100, VoteDirection::Up).await;
        }
        f.clock.set(at(T0 + 100));
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 2,
                watermark: at(T0 + 20)
            }
        );
        assert!(f.durable(3).is_none());
        // Post 2 sits on the boundary & is re-processed, which fills the cap once more:
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 2,
                watermark: at(T0 + 30)
            }
        );
        assert_eq!(f.durable(3), Some((1.0, 1, 0)));
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced {
                posts: 1,
                watermark: at(T0 + 100)
            }
        );
    }

    #[tokio::test]
    async fn watermarks_never_retreat() {
        let f = fixture(Config::default());
        // A watermark from the future (clock skew between nodes, say)
        f.storage
            .set_watermark(HOT_SCORE_SYNC, &at(T0 + 3600))
            .await
            .unwrap();
        f.vote(1, 100, VoteDirection::Up).await;
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Idle {
                watermark: at(T0 + 3600)
            }
        );
    }

    #[tokio::test]
    async fn overlapping_runs_are_skipped() {
        let f = fixture(Config::default());
        f.vote(1, 100, VoteDirection::Up).await;
        let guard = f.reconciler.sync_lock.lock().await;
        assert_eq!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Skipped
        );
        assert_eq!(f.watermark().await, None);
        drop(guard);
        assert!(matches!(
            f.reconciler.sync_hot_scores().await.unwrap(),
            SyncOutcome::Synced { posts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn markers_are_pruned_after_retention() {
        let f = fixture(Config::default());
        f.clock.set(at(T0 - 31 * 86400));
        f.vote(1, 100, VoteDirection::Up).await;
        f.clock.set(at(T0 - 29 * 86400));
        f.vote(2, 100, VoteDirection::Up).await;
        f.clock.set(at(T0));
        assert_eq!(
            f.reconciler.prune_markers().await.unwrap(),
            PruneOutcome::Pruned { markers: 1 }
        );
        assert_eq!(
            f.index
                .updated_between(&at(0), &at(T0), 10)
                .await
                .unwrap()
                .into_iter()
                .map(|(post, _)| post)
                .collect::<Vec<PostId>>(),
            vec![PostId::new(2)]
        );
    }

    #[test]
    fn bad_configurations() {
        let clock = Arc::new(ManualClock::new(at(T0)));
        let sets = Arc::new(InMemory::new(clock.clone()));
        let index = Arc::new(ScoreIndex::new(
            sets.clone(),
            Keys::default(),
            Duration::from_secs(60),
        ));
        assert!(matches!(
            Reconciler::new(
                Arc::new(Storage::new()),
                sets,
                Keys::default(),
                index,
                clock,
                &Config {
                    batch_cap: 0,
                    ..Default::default()
                },
                Arc::new(Instruments::new("hotboard")),
            ),
            Err(Error::BatchCap { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_runs() {
        let f = fixture(Config::default());
        f.vote(1, 100, VoteDirection::Up).await;
        let scheduler = Scheduler::spawn(f.reconciler.clone(), &Config::default()).unwrap();

        // Nothing happens until the first interval elapses...
        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(f.watermark().await, None);
        // then the sync job fires.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.durable(1), Some((1.0, 1, 0)));
        assert_eq!(f.watermark().await, Some(at(T0)));

        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn schedulers_reject_zero_intervals() {
        let f = fixture(Config::default());
        assert!(matches!(
            Scheduler::spawn(
                f.reconciler.clone(),
                &Config {
                    sync_interval: Duration::ZERO,
                    ..Default::default()
                }
            ),
            Err(Error::Interval { .. })
        ));
    }
}

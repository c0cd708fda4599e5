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

//! # memory
//!
//! In-process implementations of both the [ordered-set] & [storage] backends.
//!
//! [ordered-set]: crate::ordered_set
//! [storage]: crate::storage
//!
//! These exist so that hotboard can be exercised (by unit tests, by the end-to-end scenarios, or
//! by an operator just kicking the tires) without standing-up Redis & ScyllaDB. They try to be
//! faithful to the semantics of the real thing where hotboard depends on them: empty sorted sets
//! cease to exist, expiry is driven by the injected [Clock], and ties are broken by member.
//!
//! Neither holds a lock across an `.await`.

use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{self, AtomicUsize},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::{Backtrace, prelude::*};

use crate::{
    clock::Clock,
    entities::{Post, PostId},
    ordered_set::{self, Probe, Reading},
    storage::{self, CounterUpdate, HotScoreRecord},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The in-memory store's lock was poisoned"))]
    Poisoned { backtrace: Backtrace },
    #[snafu(display("A TTL of {ttl:?} is out of range: {source}"))]
    TtlOor {
        ttl: Duration,
        source: chrono::OutOfRangeError,
        backtrace: Backtrace,
    },
    #[snafu(display("{key} holds the wrong kind of value for this operation"))]
    WrongType { key: String, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

impl std::convert::From<Error> for ordered_set::Error {
    fn from(value: Error) -> Self {
        ordered_set::Error::new(value)
    }
}

impl std::convert::From<Error> for storage::Error {
    fn from(value: Error) -> Self {
        storage::Error::new(value)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     in-memory ordered sets                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
enum Value {
    Sorted(HashMap<String, f64>),
    Integer(i64),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires: Option<DateTime<Utc>>,
}

type Entries = HashMap<String, Entry>;

/// An in-process ordered-set store
pub struct OrderedSets {
    clock: Arc<dyn Clock>,
    entries: Mutex<Entries>,
}

impl OrderedSets {
    pub fn new(clock: Arc<dyn Clock>) -> OrderedSets {
        OrderedSets {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }
    /// Lock the store, first evicting everything that's expired
    fn lock(&self) -> Result<MutexGuard<'_, Entries>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| PoisonedSnafu.build())?;
        entries.retain(|_, entry| entry.expires.is_none_or(|at| at > now));
        Ok(entries)
    }
    fn expiry(&self, ttl: Duration) -> Result<DateTime<Utc>> {
        chrono::Duration::from_std(ttl)
            .context(TtlOorSnafu { ttl })
            .map(|ttl| self.clock.now() + ttl)
    }
}

fn sorted<'a>(entries: &'a Entries, key: &str) -> Result<Option<&'a HashMap<String, f64>>> {
    match entries.get(key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Sorted(set),
            ..
        }) => Ok(Some(set)),
        Some(_) => WrongTypeSnafu { key }.fail(),
    }
}

fn sorted_mut<'a>(entries: &'a mut Entries, key: &str) -> Result<&'a mut HashMap<String, f64>> {
    let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
        value: Value::Sorted(HashMap::new()),
        expires: None,
    });
    match &mut entry.value {
        Value::Sorted(set) => Ok(set),
        Value::Integer(_) => WrongTypeSnafu { key }.fail(),
    }
}

// Sorted sets cease to exist when their last member is removed
fn drop_if_empty(entries: &mut Entries, key: &str) {
    if let Some(Entry {
        value: Value::Sorted(set),
        ..
    }) = entries.get(key)
    {
        if set.is_empty() {
            entries.remove(key);
        }
    }
}

fn by_score(lhs: &(String, f64), rhs: &(String, f64)) -> Ordering {
    lhs.1.total_cmp(&rhs.1).then_with(|| lhs.0.cmp(&rhs.0))
}

fn count_in(set: Option<&HashMap<String, f64>>, min: f64, max: f64) -> u64 {
    set.map(|set| {
        set.values()
            .filter(|score| min <= **score && **score <= max)
            .count() as u64
    })
    .unwrap_or(0)
}

#[async_trait]
impl ordered_set::Backend for OrderedSets {
    async fn insert(&self, key: &str, member: &str, score: f64) -> StdResult<(), ordered_set::Error> {
        let mut entries = self.lock()?;
        sorted_mut(&mut entries, key)?.insert(member.to_owned(), score);
        Ok(())
    }

    async fn score(&self, key: &str, member: &str) -> StdResult<Option<f64>, ordered_set::Error> {
        let entries = self.lock()?;
        Ok(sorted(&entries, key)?.and_then(|set| set.get(member).copied()))
    }

    async fn remove(&self, key: &str, member: &str) -> StdResult<(), ordered_set::Error> {
        let mut entries = self.lock()?;
        if sorted(&entries, key)?.is_some() {
            sorted_mut(&mut entries, key)?.remove(member);
            drop_if_empty(&mut entries, key);
        }
        Ok(())
    }

    async fn count_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StdResult<u64, ordered_set::Error> {
        let entries = self.lock()?;
        Ok(count_in(sorted(&entries, key)?, min, max))
    }

    async fn range_by_rank_rev(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> StdResult<Vec<String>, ordered_set::Error> {
        let entries = self.lock()?;
        let mut members = sorted(&entries, key)?
            .map(|set| {
                set.iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect::<Vec<(String, f64)>>()
            })
            .unwrap_or_default();
        members.sort_by(|lhs, rhs| by_score(rhs, lhs));
        Ok(members
            .into_iter()
            .skip(start)
            .take(stop.saturating_add(1).saturating_sub(start))
            .map(|(member, _)| member)
            .collect())
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StdResult<Vec<(String, f64)>, ordered_set::Error> {
        let entries = self.lock()?;
        let mut members = sorted(&entries, key)?
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| min <= **score && **score <= max)
                    .map(|(member, score)| (member.clone(), *score))
                    .collect::<Vec<(String, f64)>>()
            })
            .unwrap_or_default();
        members.sort_by(by_score);
        members.truncate(limit);
        Ok(members)
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StdResult<u64, ordered_set::Error> {
        let mut entries = self.lock()?;
        if sorted(&entries, key)?.is_none() {
            return Ok(0);
        }
        let set = sorted_mut(&mut entries, key)?;
        let before = set.len();
        set.retain(|_, score| !(min <= *score && *score <= max));
        let removed = (before - set.len()) as u64;
        drop_if_empty(&mut entries, key);
        Ok(removed)
    }

    async fn intersect_store(
        &self,
        dest: &str,
        sources: &[(String, f64)],
        ttl: Duration,
    ) -> StdResult<(), ordered_set::Error> {
        let expires = self.expiry(ttl)?;
        let mut entries = self.lock()?;
        let mut result: Option<HashMap<String, f64>> = None;
        for (key, weight) in sources {
            let set = sorted(&entries, key)?;
            result = Some(match (result, set) {
                (_, None) => HashMap::new(),
                (None, Some(set)) => set
                    .iter()
                    .map(|(member, score)| (member.clone(), score * weight))
                    .collect(),
                (Some(acc), Some(set)) => acc
                    .into_iter()
                    .filter_map(|(member, score)| {
                        set.get(&member).map(|other| (member, score + other * weight))
                    })
                    .collect(),
            });
        }
        let result = result.unwrap_or_default();
        // As with Redis, an empty intersection leaves no key behind
        entries.remove(dest);
        if !result.is_empty() {
            entries.insert(
                dest.to_owned(),
                Entry {
                    value: Value::Sorted(result),
                    expires: Some(expires),
                },
            );
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StdResult<bool, ordered_set::Error> {
        Ok(self.lock()?.contains_key(key))
    }

    async fn get(&self, key: &str) -> StdResult<Option<i64>, ordered_set::Error> {
        let entries = self.lock()?;
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Integer(n),
                ..
            }) => Ok(Some(*n)),
            Some(_) => Err(WrongTypeSnafu { key }.build().into()),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> StdResult<(), ordered_set::Error> {
        let expires = self.expiry(ttl)?;
        self.lock()?.insert(
            key.to_owned(),
            Entry {
                value: Value::Integer(value),
                expires: Some(expires),
            },
        );
        Ok(())
    }

    async fn probe(&self, probes: &[Probe]) -> StdResult<Vec<Reading>, ordered_set::Error> {
        let entries = self.lock()?;
        probes
            .iter()
            .map(|probe| match probe {
                Probe::Score { key, member } => sorted(&entries, key)
                    .map(|set| Reading::Score(set.and_then(|set| set.get(member).copied()))),
                Probe::Count { key, min, max } => {
                    sorted(&entries, key).map(|set| Reading::Count(count_in(set, *min, *max)))
                }
            })
            .collect::<Result<Vec<Reading>>>()
            .map_err(ordered_set::Error::new)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     in-memory durable store                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct Tables {
    posts: HashMap<PostId, Post>,
    hot_scores: HashMap<PostId, HotScoreRecord>,
    // (likes, dislikes)
    counters: HashMap<PostId, (u64, u64)>,
    watermarks: HashMap<String, DateTime<Utc>>,
}

/// An in-process durable store
///
/// "Durable" in the sense that it plays that role for hotboard; it's gone when the process exits.
/// Beyond the [storage::Backend] interface, it offers a few read accessors & a write counter for
/// the benefit of tests.
#[derive(Debug, Default)]
pub struct Storage {
    tables: Mutex<Tables>,
    writes: AtomicUsize,
}

impl Storage {
    pub fn new() -> Storage {
        Storage::default()
    }
    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| PoisonedSnafu.build())
    }
    /// The durable hot-score record for `post`, if any
    pub fn hot_score(&self, post: PostId) -> Option<HotScoreRecord> {
        self.lock()
            .ok()
            .and_then(|tables| tables.hot_scores.get(&post).cloned())
    }
    /// The durable (likes, dislikes) for `post`, if any have been written
    pub fn counters(&self, post: PostId) -> Option<(u64, u64)> {
        self.lock()
            .ok()
            .and_then(|tables| tables.counters.get(&post).copied())
    }
    /// The number of hot-score & counter batches written so far
    pub fn writes(&self) -> usize {
        self.writes.load(atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl storage::Backend for Storage {
    async fn add_post(&self, post: &Post) -> StdResult<(), storage::Error> {
        self.lock()?.posts.insert(post.id(), post.clone());
        Ok(())
    }

    async fn post_created_at(
        &self,
        post: PostId,
    ) -> StdResult<Option<DateTime<Utc>>, storage::Error> {
        Ok(self.lock()?.posts.get(&post).map(|post| post.created()))
    }

    async fn upsert_hot_scores(&self, records: &[HotScoreRecord]) -> StdResult<(), storage::Error> {
        let mut tables = self.lock()?;
        records.iter().for_each(|record| {
            tables.hot_scores.insert(record.post, record.clone());
        });
        self.writes.fetch_add(1, atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn apply_counter_updates(
        &self,
        updates: &[(PostId, CounterUpdate)],
    ) -> StdResult<(), storage::Error> {
        let mut tables = self.lock()?;
        updates.iter().for_each(|(post, update)| {
            let counters = tables.counters.entry(*post).or_default();
            match update {
                CounterUpdate::Likes(n) => counters.0 = *n,
                CounterUpdate::Dislikes(n) => counters.1 = *n,
            }
        });
        self.writes.fetch_add(1, atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn watermark(&self, job: &str) -> StdResult<Option<DateTime<Utc>>, storage::Error> {
        Ok(self.lock()?.watermarks.get(job).copied())
    }

    async fn set_watermark(&self, job: &str, at: &DateTime<Utc>) -> StdResult<(), storage::Error> {
        self.lock()?.watermarks.insert(job.to_owned(), *at);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::TimeZone;

    use crate::{clock::ManualClock, ordered_set::Backend};

    fn sets() -> (Arc<ManualClock>, OrderedSets) {
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_750_000_000, 0).unwrap(),
        ));
        (clock.clone(), OrderedSets::new(clock))
    }

    #[tokio::test]
    async fn sorted_set_basics() {
        let (_, sets) = sets();
        sets.insert("z", "a", 1.0).await.unwrap();
        sets.insert("z", "b", 2.0).await.unwrap();
        sets.insert("z", "c", 2.0).await.unwrap();
        sets.insert("z", "a", 3.0).await.unwrap();
        assert_eq!(sets.score("z", "a").await.unwrap(), Some(3.0));
        assert_eq!(sets.score("z", "nope").await.unwrap(), None);
        assert_eq!(sets.score("nope", "a").await.unwrap(), None);
        assert_eq!(sets.count_by_score("z", 2.0, 2.0).await.unwrap(), 2);
        assert_eq!(
            sets.range_by_rank_rev("z", 0, 1).await.unwrap(),
            vec!["a".to_owned(), "c".to_owned()]
        );
        assert_eq!(
            sets.range_by_rank_rev("z", 2, 10).await.unwrap(),
            vec!["b".to_owned()]
        );
        assert_eq!(
            sets.range_by_score("z", 2.0, 3.0, 2).await.unwrap(),
            vec![("b".to_owned(), 2.0), ("c".to_owned(), 2.0)]
        );
        assert_eq!(sets.remove_range_by_score("z", 0.0, 2.0).await.unwrap(), 2);
        sets.remove("z", "a").await.unwrap();
        sets.remove("z", "a").await.unwrap();
        assert!(!sets.exists("z").await.unwrap());
    }

    #[tokio::test]
    async fn weighted_intersection_expires() {
        let (clock, sets) = sets();
        sets.insert("scores", "1", -4.5).await.unwrap();
        sets.insert("scores", "2", 7.25).await.unwrap();
        sets.insert("scores", "3", 1.0).await.unwrap();
        sets.insert("community", "1", 0.0).await.unwrap();
        sets.insert("community", "2", 0.0).await.unwrap();
        sets.intersect_store(
            "ranked",
            &[("community".to_owned(), 0.0), ("scores".to_owned(), 1.0)],
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert_eq!(
            sets.range_by_rank_rev("ranked", 0, 10).await.unwrap(),
            vec!["2".to_owned(), "1".to_owned()]
        );
        assert_eq!(sets.score("ranked", "1").await.unwrap(), Some(-4.5));
        clock.advance(chrono::Duration::seconds(61));
        assert!(!sets.exists("ranked").await.unwrap());
        assert!(sets.exists("scores").await.unwrap());
    }

    #[tokio::test]
    async fn plain_values() {
        let (clock, sets) = sets();
        sets.set_with_ttl("n", 42, Duration::from_secs(10)).await.unwrap();
        assert_eq!(sets.get("n").await.unwrap(), Some(42));
        assert!(sets.insert("n", "a", 1.0).await.is_err());
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(sets.get("n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn probes() {
        let (_, sets) = sets();
        sets.insert("v", "u1", 1.0).await.unwrap();
        sets.insert("v", "u2", -1.0).await.unwrap();
        sets.insert("v", "u3", 1.0).await.unwrap();
        sets.insert("s", "p", 0.5).await.unwrap();
        let readings = sets
            .probe(&[
                Probe::Score {
                    key: "s".to_owned(),
                    member: "p".to_owned(),
                },
                Probe::Count {
                    key: "v".to_owned(),
                    min: 1.0,
                    max: 1.0,
                },
                Probe::Count {
                    key: "v".to_owned(),
                    min: -1.0,
                    max: -1.0,
                },
                Probe::Count {
                    key: "missing".to_owned(),
                    min: 1.0,
                    max: 1.0,
                },
            ])
            .await
            .unwrap();
        assert_eq!(
            readings,
            vec![
                Reading::Score(Some(0.5)),
                Reading::Count(2),
                Reading::Count(1),
                Reading::Count(0)
            ]
        );
    }
}

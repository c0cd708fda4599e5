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

//! # Redis
//!
//! [ordered_set::Backend] implemented on Redis sorted sets.
//!
//! A single [ConnectionManager] is shared by all callers; it multiplexes commands over one
//! connection & reconnects on failure. Cloning it is cheap, and every operation works on its own
//! clone.

use std::{result::Result as StdResult, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, RedisError, Value,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use secrecy::{ExposeSecret, SecretString};
use snafu::{Backtrace, prelude::*};
use tracing::debug;

use crate::ordered_set::{self, Probe, Reading};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to create a Redis client: {source}"))]
    Client {
        source: RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("{op} on {key} failed: {source}"))]
    Command {
        op: &'static str,
        key: String,
        source: RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to connect to Redis: {source}"))]
    Connect {
        source: RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse the reply to a pipelined {op}: {source}"))]
    Reply {
        op: &'static str,
        source: RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("Expected {expected} replies to a pipeline; got {got}"))]
    ReplyCount {
        expected: usize,
        got: usize,
        backtrace: Backtrace,
    },
}

impl std::convert::From<Error> for ordered_set::Error {
    fn from(value: Error) -> Self {
        ordered_set::Error::new(value)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Connection parameters
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub connection_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
    pub retries: Option<usize>,
}

pub struct Redis {
    con: ConnectionManager,
}

impl Redis {
    /// Connect to the Redis instance at `url` (which may carry credentials)
    pub async fn new(url: &SecretString, options: &Options) -> Result<Redis> {
        let mut config = ConnectionManagerConfig::new();
        if let Some(retries) = options.retries {
            config = config.set_number_of_retries(retries);
        }
        if let Some(timeout) = options.connection_timeout {
            config = config.set_connection_timeout(timeout);
        }
        if let Some(timeout) = options.response_timeout {
            config = config.set_response_timeout(timeout);
        }
        let client = Client::open(url.expose_secret()).context(ClientSnafu)?;
        let con = client
            .get_connection_manager_with_config(config)
            .await
            .context(ConnectSnafu)?;
        debug!("Connected to Redis");
        Ok(Redis { con })
    }
}

// Redis ranks are signed
fn rank(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}

#[async_trait]
impl ordered_set::Backend for Redis {
    async fn insert(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> StdResult<(), ordered_set::Error> {
        let mut con = self.con.clone();
        con.zadd::<_, _, _, ()>(key, member, score)
            .await
            .context(CommandSnafu { op: "ZADD", key })?;
        Ok(())
    }

    async fn score(&self, key: &str, member: &str) -> StdResult<Option<f64>, ordered_set::Error> {
        let mut con = self.con.clone();
        let score: Option<f64> = con
            .zscore(key, member)
            .await
            .context(CommandSnafu { op: "ZSCORE", key })?;
        Ok(score)
    }

    async fn remove(&self, key: &str, member: &str) -> StdResult<(), ordered_set::Error> {
        let mut con = self.con.clone();
        con.zrem::<_, _, ()>(key, member)
            .await
            .context(CommandSnafu { op: "ZREM", key })?;
        Ok(())
    }

    async fn count_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StdResult<u64, ordered_set::Error> {
        let mut con = self.con.clone();
        let count: u64 = con
            .zcount(key, min, max)
            .await
            .context(CommandSnafu { op: "ZCOUNT", key })?;
        Ok(count)
    }

    async fn range_by_rank_rev(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> StdResult<Vec<String>, ordered_set::Error> {
        let mut con = self.con.clone();
        let members: Vec<String> = con
            .zrevrange(key, rank(start), rank(stop))
            .await
            .context(CommandSnafu {
                op: "ZREVRANGE",
                key,
            })?;
        Ok(members)
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StdResult<Vec<(String, f64)>, ordered_set::Error> {
        let mut con = self.con.clone();
        let members: Vec<(String, f64)> = con
            .zrangebyscore_limit_withscores(key, min, max, 0, rank(limit))
            .await
            .context(CommandSnafu {
                op: "ZRANGEBYSCORE",
                key,
            })?;
        Ok(members)
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StdResult<u64, ordered_set::Error> {
        let mut con = self.con.clone();
        let removed: u64 = con
            .zrembyscore(key, min, max)
            .await
            .context(CommandSnafu {
                op: "ZREMRANGEBYSCORE",
                key,
            })?;
        Ok(removed)
    }

    async fn intersect_store(
        &self,
        dest: &str,
        sources: &[(String, f64)],
        ttl: Duration,
    ) -> StdResult<(), ordered_set::Error> {
        let mut con = self.con.clone();
        redis::pipe()
            .atomic()
            .cmd("ZINTERSTORE")
            .arg(dest)
            .arg(sources.len())
            .arg(sources.iter().map(|(key, _)| key.as_str()).collect::<Vec<&str>>())
            .arg("WEIGHTS")
            .arg(sources.iter().map(|(_, weight)| *weight).collect::<Vec<f64>>())
            .arg("AGGREGATE")
            .arg("SUM")
            .ignore()
            .cmd("EXPIRE")
            .arg(dest)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async::<()>(&mut con)
            .await
            .context(CommandSnafu {
                op: "ZINTERSTORE",
                key: dest,
            })?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StdResult<bool, ordered_set::Error> {
        let mut con = self.con.clone();
        let exists: bool = con
            .exists(key)
            .await
            .context(CommandSnafu { op: "EXISTS", key })?;
        Ok(exists)
    }

    async fn get(&self, key: &str) -> StdResult<Option<i64>, ordered_set::Error> {
        let mut con = self.con.clone();
        let value: Option<i64> = con
            .get(key)
            .await
            .context(CommandSnafu { op: "GET", key })?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> StdResult<(), ordered_set::Error> {
        let mut con = self.con.clone();
        con.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .context(CommandSnafu { op: "SETEX", key })?;
        Ok(())
    }

    async fn probe(&self, probes: &[Probe]) -> StdResult<Vec<Reading>, ordered_set::Error> {
        if probes.is_empty() {
            return Ok(vec![]);
        }
        let mut pipe = redis::pipe();
        probes.iter().for_each(|probe| match probe {
            Probe::Score { key, member } => {
                pipe.zscore(key, member);
            }
            Probe::Count { key, min, max } => {
                pipe.zcount(key, *min, *max);
            }
        });
        let mut con = self.con.clone();
        let replies: Vec<Value> = pipe.query_async(&mut con).await.context(CommandSnafu {
            op: "pipeline",
            key: format!("{} probes", probes.len()),
        })?;
        ensure!(
            replies.len() == probes.len(),
            ReplyCountSnafu {
                expected: probes.len(),
                got: replies.len(),
            }
        );
        Ok(probes
            .iter()
            .zip(replies.iter())
            .map(|(probe, reply)| match probe {
                Probe::Score { .. } => redis::from_redis_value::<Option<f64>>(reply)
                    .context(ReplySnafu { op: "ZSCORE" })
                    .map(Reading::Score),
                Probe::Count { .. } => redis::from_redis_value::<u64>(reply)
                    .context(ReplySnafu { op: "ZCOUNT" })
                    .map(Reading::Count),
            })
            .collect::<Result<Vec<Reading>>>()?)
    }
}

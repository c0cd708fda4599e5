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

//! # scylla
//!
//! [Storage] implementation for ScyllaDB.
//!
//! [Storage]: crate::storage
//!
//! The implementation expects a keyspace named `hotboard` with the following tables:
//!
//! ```text
//! create table posts (id bigint primary key, author bigint, community bigint, title text,
//!                     content text, created timestamp, likes bigint, dislikes bigint);
//! create table post_hot_scores (post_id bigint primary key, hot_score double,
//!                               updated_at timestamp);
//! create table sync_watermarks (job text primary key, watermark timestamp);
//! ```
//!
//! CQL `INSERT` & `UPDATE` are both upserts, which is exactly the semantics reconciliation wants:
//! re-writing a record that's already present is harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enum_map::{Enum, EnumMap};
use futures::stream;
use scylla::{
    client::{session::Session as ScyllaSession, session_builder::SessionBuilder},
    errors::{ExecutionError, NewSessionError, PrepareError, UseKeyspaceError},
    response::query_result::{IntoRowsResultError, MaybeFirstRowError},
    statement::{
        batch::{Batch, BatchType},
        prepared::PreparedStatement,
    },
};
use secrecy::{ExposeSecret, SecretString};
use snafu::{Backtrace, prelude::*};
use tap::Pipe;
use tracing::debug;

use crate::{
    entities::{Post, PostId},
    storage::{self, CounterUpdate, HotScoreRecord},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "The number of prepared statements isn't consistent; this is a bug & should be reported!"
    ))]
    BadPreparedStatementCount { backtrace: Backtrace },
    #[snafu(display("Batch write of {count} statements failed: {source}"))]
    Batch {
        count: usize,
        source: ExecutionError,
        backtrace: Backtrace,
    },
    #[snafu(display("Counter value {value} for post {post} is too large to store"))]
    CounterOor {
        post: PostId,
        value: u64,
        source: std::num::TryFromIntError,
        backtrace: Backtrace,
    },
    #[snafu(display("Expected at most one row: {source}"))]
    FirstRow {
        source: MaybeFirstRowError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to convert to a RowsResult: {source}"))]
    IntoRowsResult {
        source: IntoRowsResultError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to set keyspace: {source}"))]
    Keyspace {
        source: UseKeyspaceError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create a ScyllaDB session: {source}"))]
    NewSession {
        source: NewSessionError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to prepare statement: {stmt}: {source}"))]
    Prepare {
        stmt: String,
        source: PrepareError,
        backtrace: Backtrace,
    },
    #[snafu(display("ScyllaDB query failed: {source}"))]
    Query {
        source: ExecutionError,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

impl std::convert::From<Error> for storage::Error {
    fn from(value: Error) -> Self {
        storage::Error::new(value)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                 hotboard ScyllaDB session type                                 //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The set of prepared statements used by hotboard
///
/// Each variant names one statement; the [EnumMap] in [Session] guarantees every variant has a
/// prepared statement behind it.
#[derive(Clone, Copy, Debug, Enum, Eq, PartialEq)]
enum PreparedStatements {
    InsertPost,
    SelectCreated,
    UpsertHotScore,
    UpdateLikes,
    UpdateDislikes,
    SelectWatermark,
    UpsertWatermark,
}

// Statements per batch
const BATCH_SIZE: usize = 128;

/// `hotboard`-specific ScyllaDB Session type
pub struct Session {
    session: ScyllaSession,
    prepared_statements: EnumMap<PreparedStatements, PreparedStatement>,
}

impl Session {
    async fn prepare(scylla: &ScyllaSession, stmt: &str) -> Result<PreparedStatement> {
        scylla.prepare(stmt).await.context(PrepareSnafu {
            stmt: stmt.to_owned(),
        })
    }

    /// Connect to ScyllaDB
    ///
    /// `hosts` need to be parsable as socket addresses. `credentials`, if non-None, should be the
    /// username & password.
    pub async fn new(
        hosts: impl IntoIterator<Item = impl AsRef<str>>,
        credentials: &Option<(SecretString, SecretString)>,
    ) -> Result<Session> {
        let mut builder = SessionBuilder::new().known_nodes(hosts);
        if let Some((user, pass)) = credentials {
            builder = builder.user(user.expose_secret(), pass.expose_secret())
        }
        let scylla = builder.build().await.context(NewSessionSnafu)?;
        scylla
            .use_keyspace("hotboard", false)
            .await
            .context(KeyspaceSnafu)?;

        use futures::stream::StreamExt;
        // Listed in the same order as [PreparedStatements]
        let prepared_statements = stream::iter(vec![
            "insert into posts (id,author,community,title,content,created,likes,dislikes) values (?,?,?,?,?,?,0,0)",
            "select created from posts where id=?",
            "insert into post_hot_scores (post_id,hot_score,updated_at) values (?,?,?)",
            "update posts set likes=? where id=?",
            "update posts set dislikes=? where id=?",
            "select watermark from sync_watermarks where job=?",
            "insert into sync_watermarks (job,watermark) values (?,?)",
        ])
        .then(|s| async { Self::prepare(&scylla, s).await })
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<PreparedStatement>>>()?;
        // This will fail if the list above is out of step with `PreparedStatements`:
        let prepared_statements: [PreparedStatement; 7] = prepared_statements
            .try_into()
            .map_err(|_| BadPreparedStatementCountSnafu.build())?;

        debug!("Connected to ScyllaDB");
        Ok(Session {
            session: scylla,
            prepared_statements: EnumMap::from_array(prepared_statements),
        })
    }

    // Write `rows` with `stmt` in unlogged batches
    async fn batch_write<T>(&self, stmt: PreparedStatements, rows: Vec<T>) -> Result<()>
    where
        T: scylla::serialize::row::SerializeRow,
    {
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk = rows.by_ref().take(BATCH_SIZE).collect::<Vec<T>>();
            let count = chunk.len();
            let mut batch = Batch::new(BatchType::Unlogged);
            (0..count).for_each(|_| batch.append_statement(self.prepared_statements[stmt].clone()));
            self.session
                .batch(&batch, chunk)
                .await
                .context(BatchSnafu { count })?;
        }
        Ok(())
    }
}

#[async_trait]
impl storage::Backend for Session {
    async fn add_post(&self, post: &Post) -> StdResult<(), storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::InsertPost],
                (
                    post.id().as_i64(),
                    post.author().as_i64(),
                    post.community().as_i64(),
                    post.title(),
                    post.content(),
                    post.created(),
                ),
            )
            .await
            .context(QuerySnafu)?;
        Ok(())
    }

    async fn post_created_at(
        &self,
        post: PostId,
    ) -> StdResult<Option<DateTime<Utc>>, storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::SelectCreated],
                (post.as_i64(),),
            )
            .await
            .context(QuerySnafu)?
            .into_rows_result()
            .context(IntoRowsResultSnafu)?
            .maybe_first_row::<(Option<DateTime<Utc>>,)>()
            .context(FirstRowSnafu)?
            .and_then(|(created,)| created)
            .pipe(Ok)
    }

    async fn upsert_hot_scores(&self, records: &[HotScoreRecord]) -> StdResult<(), storage::Error> {
        self.batch_write(
            PreparedStatements::UpsertHotScore,
            records
                .iter()
                .map(|record| (record.post.as_i64(), record.hot_score, record.updated_at))
                .collect(),
        )
        .await?;
        Ok(())
    }

    async fn apply_counter_updates(
        &self,
        updates: &[(PostId, CounterUpdate)],
    ) -> StdResult<(), storage::Error> {
        let mut likes = Vec::new();
        let mut dislikes = Vec::new();
        for (post, update) in updates {
            let (column, value) = match update {
                CounterUpdate::Likes(n) => (&mut likes, *n),
                CounterUpdate::Dislikes(n) => (&mut dislikes, *n),
            };
            column.push((
                i64::try_from(value).context(CounterOorSnafu { post: *post, value })?,
                post.as_i64(),
            ));
        }
        self.batch_write(PreparedStatements::UpdateLikes, likes)
            .await?;
        self.batch_write(PreparedStatements::UpdateDislikes, dislikes)
            .await?;
        Ok(())
    }

    async fn watermark(&self, job: &str) -> StdResult<Option<DateTime<Utc>>, storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::SelectWatermark],
                (job,),
            )
            .await
            .context(QuerySnafu)?
            .into_rows_result()
            .context(IntoRowsResultSnafu)?
            .maybe_first_row::<(Option<DateTime<Utc>>,)>()
            .context(FirstRowSnafu)?
            .and_then(|(watermark,)| watermark)
            .pipe(Ok)
    }

    async fn set_watermark(&self, job: &str, at: &DateTime<Utc>) -> StdResult<(), storage::Error> {
        self.session
            .execute_unpaged(
                &self.prepared_statements[PreparedStatements::UpsertWatermark],
                (job, at),
            )
            .await
            .context(QuerySnafu)?;
        Ok(())
    }
}

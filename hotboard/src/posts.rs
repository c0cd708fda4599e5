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

//! # Posts API
//!
//! Publishing, listing & voting on posts.
//!
//! Callers are identified, not authenticated: an upstream gateway is expected to have done that &
//! to forward the caller's user id in the [USER_ID_HEADER] header. Listing is open to anonymous
//! callers; publishing & voting are not.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State, rejection::ExtensionRejection},
    http::{HeaderMap, StatusCode, header::ToStrError},
    response::IntoResponse,
    routing::{get, post},
};
use itertools::Itertools;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tracing::{debug, error, info};

use crate::{
    counter_add,
    entities::{self, CommunityId, ListOrder, Post, PostId, UserId, VoteDirection},
    hot_score::hot_score,
    hotboard::Hotboard,
    http::{ErrorResponseBody, USER_ID_HEADER},
    metrics::{self, Sort},
    score_index::{self, Page},
    storage,
    vote_ledger,
    votes::{self, VoteReceipt},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to record post {post}: {source}"))]
    AddPost { post: PostId, source: storage::Error },
    #[snafu(display("The {USER_ID_HEADER} header {value:?} is not a user id: {source}"))]
    BadUserId {
        value: String,
        source: entities::Error,
    },
    #[snafu(display("Posts must have a title"))]
    EmptyTitle { backtrace: Backtrace },
    #[snafu(display("Failed to index post {post}: {source}"))]
    IndexPost {
        post: PostId,
        source: score_index::Error,
    },
    #[snafu(display("Failed to list posts: {source}"))]
    List { source: score_index::Error },
    #[snafu(display("Multiple {USER_ID_HEADER} headers"))]
    MultipleUserIds { backtrace: Backtrace },
    #[snafu(display("Post {post} has never been scored"))]
    NoScore { post: PostId, backtrace: Backtrace },
    #[snafu(display("A page size of {limit} exceeds the maximum of {max}"))]
    PageSize {
        limit: u64,
        max: u64,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read the score of post {post}: {source}"))]
    Score {
        post: PostId,
        source: score_index::Error,
    },
    #[snafu(display("Failed to tally votes on post {post}: {source}"))]
    Tally {
        post: PostId,
        source: vote_ledger::Error,
    },
    #[snafu(display("No {USER_ID_HEADER} header"))]
    Unidentified { backtrace: Backtrace },
    #[snafu(display("The {USER_ID_HEADER} header is not valid text: {source}"))]
    UserIdEncoding {
        source: ToStrError,
        backtrace: Backtrace,
    },
    #[snafu(display("Vote failed: {source}"))]
    Vote { source: votes::Error },
    #[snafu(display("Vote timed out: {source}"))]
    VoteTimeout {
        source: tokio::time::error::Elapsed,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadUserId { value, .. } => (
                StatusCode::BAD_REQUEST,
                format!("Bad {USER_ID_HEADER} header: {value:?}"),
            ),
            Error::EmptyTitle { .. } => {
                (StatusCode::BAD_REQUEST, "Posts must have a title".to_owned())
            }
            Error::MultipleUserIds { .. } => (
                StatusCode::BAD_REQUEST,
                format!("Multiple {USER_ID_HEADER} headers"),
            ),
            Error::PageSize { limit, max, .. } => (
                StatusCode::BAD_REQUEST,
                format!("Page size {limit} exceeds the maximum of {max}"),
            ),
            Error::UserIdEncoding { .. } => (
                StatusCode::BAD_REQUEST,
                format!("Bad {USER_ID_HEADER} header"),
            ),
            Error::Unidentified { .. } => (StatusCode::UNAUTHORIZED, "Unauthorized".to_owned()),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Missing things
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::NoScore { post, .. } => (StatusCode::NOT_FOUND, format!("No such post: {post}")),
            Error::Vote { source } if source.is_unknown_post() => {
                (StatusCode::NOT_FOUND, "No such post".to_owned())
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Vote failures are reported generically; the caller may retry
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Vote { .. } | Error::VoteTimeout { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service busy".to_owned())
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddPost { post, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to record post {post}: {source}"),
            ),
            Error::IndexPost { post, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to index post {post}: {source}"),
            ),
            Error::List { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to list posts: {source}"),
            ),
            Error::Score { post, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read the score of post {post}: {source}"),
            ),
            Error::Tally { post, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to tally votes on post {post}: {source}"),
            ),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Identification                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.callers.identified", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("posts.callers.rejected", Sort::IntegralCounter) }

fn caller_from_headers(headers: &HeaderMap) -> Result<Option<UserId>> {
    match headers
        .get_all(USER_ID_HEADER)
        .into_iter()
        .at_most_one()
        .map_err(|_| MultipleUserIdsSnafu.build())?
    {
        None => Ok(None),
        Some(value) => {
            let text = value.to_str().context(UserIdEncodingSnafu)?;
            text.parse::<UserId>()
                .context(BadUserIdSnafu { value: text })
                .map(Some)
        }
    }
}

/// Identify the caller of a request to the posts API
///
/// Inserts the caller's [UserId] into the request's extensions when the request carries one.
/// Requests without one are let through (handlers that need a caller will reject them); requests
/// with a malformed one are rejected here.
async fn identify(
    State(state): State<Arc<Hotboard>>,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    match caller_from_headers(request.headers()) {
        Ok(Some(user)) => {
            debug!("Request made by user {user}");
            request.extensions_mut().insert(user);
            counter_add!(state.instruments, "posts.callers.identified", 1, &[]);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(err) => {
            info!("Rejecting request: {err}");
            counter_add!(state.instruments, "posts.callers.rejected", 1, &[]);
            err.into_response()
        }
    }
}

fn caller(user: std::result::Result<Extension<UserId>, ExtensionRejection>) -> Result<UserId> {
    user.map(|Extension(user)| user)
        .map_err(|_| UnidentifiedSnafu.build())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `POST /posts`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.published", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("posts.publish.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PublishReq {
    pub community_id: CommunityId,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Publish a new post
///
/// The post is recorded durably, then indexed in the cache (creation time, community & an initial
/// zero-vote score) so that it's rankable immediately.
async fn publish(
    State(state): State<Arc<Hotboard>>,
    user: std::result::Result<Extension<UserId>, ExtensionRejection>,
    Json(req): Json<PublishReq>,
) -> axum::response::Response {
    async fn publish1(state: &Hotboard, author: UserId, req: &PublishReq) -> Result<Post> {
        ensure!(!req.title.trim().is_empty(), EmptyTitleSnafu);
        let now = state.clock.now();
        let post = Post::new(
            state.ids.next_id(now),
            author,
            req.community_id,
            &req.title,
            &req.content,
            now,
        );
        state
            .storage
            .add_post(&post)
            .await
            .context(AddPostSnafu { post: post.id() })?;
        state
            .index
            .index_post(&post, hot_score(0, 0, now, state.epoch))
            .await
            .context(IndexPostSnafu { post: post.id() })?;
        state.creation_times.prime(post.id(), &now).await;
        Ok(post)
    }

    match caller(user) {
        Ok(author) => match publish1(&state, author, &req).await {
            Ok(post) => {
                info!("User {author} published post {}", post.id());
                counter_add!(state.instruments, "posts.published", 1, &[]);
                (StatusCode::CREATED, Json(post)).into_response()
            }
            Err(err) => {
                error!("{:#?}", err);
                counter_add!(state.instruments, "posts.publish.failures", 1, &[]);
                err.into_response()
            }
        },
        Err(err) => {
            counter_add!(state.instruments, "posts.publish.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `GET /posts`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.listings", Sort::IntegralCounter) }

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ListReq {
    #[serde(default)]
    pub order: ListOrder,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub community_id: Option<CommunityId>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ListRsp {
    pub posts: Vec<PostId>,
}

/// List post ids by recency or hot score, highest first, optionally within a community
///
/// `offset` is a one-based page number, `limit` the page size.
async fn list(
    State(state): State<Arc<Hotboard>>,
    Query(req): Query<ListReq>,
) -> axum::response::Response {
    async fn list1(state: &Hotboard, req: &ListReq) -> Result<Vec<PostId>> {
        let default = Page::default();
        let page = Page {
            offset: req.offset.unwrap_or(default.offset),
            limit: req.limit.unwrap_or(default.limit),
        };
        ensure!(
            page.limit <= state.max_page_size,
            PageSizeSnafu {
                limit: page.limit,
                max: state.max_page_size
            }
        );
        state
            .index
            .list(req.order, page, req.community_id)
            .await
            .context(ListSnafu)
    }

    match list1(&state, &req).await {
        Ok(posts) => {
            counter_add!(
                state.instruments,
                "posts.listings",
                1,
                &[KeyValue::new("order", req.order.to_string())]
            );
            Json(ListRsp { posts }).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `GET /posts/{post_id}`                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StatsRsp {
    pub post_id: PostId,
    pub score: f64,
    pub ups: u64,
    pub downs: u64,
}

/// Report a post's current (cached) score & tallies
async fn stats(
    State(state): State<Arc<Hotboard>>,
    Path(post): Path<PostId>,
) -> axum::response::Response {
    async fn stats1(state: &Hotboard, post: PostId) -> Result<StatsRsp> {
        let score = state
            .index
            .score(post)
            .await
            .context(ScoreSnafu { post })?
            .context(NoScoreSnafu { post })?;
        let ledger = state.votes.ledger();
        Ok(StatsRsp {
            post_id: post,
            score,
            ups: ledger.count_up(post).await.context(TallySnafu { post })?,
            downs: ledger.count_down(post).await.context(TallySnafu { post })?,
        })
    }

    match stats1(&state, post).await {
        Ok(rsp) => Json(rsp).into_response(),
        Err(err) => {
            debug!("{:#?}", err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       `POST /posts/vote`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.votes.timeouts", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VoteReq {
    pub post_id: PostId,
    /// -1, 0 (retract) or 1
    pub direction: VoteDirection,
}

/// Cast, change or retract a vote
///
/// Re-casting the caller's current vote succeeds without effect. Any failure to record the vote
/// (including running past the configured vote timeout) is reported as 503 "Service busy".
async fn vote(
    State(state): State<Arc<Hotboard>>,
    user: std::result::Result<Extension<UserId>, ExtensionRejection>,
    Json(req): Json<VoteReq>,
) -> axum::response::Response {
    async fn vote1(state: &Hotboard, user: UserId, req: &VoteReq) -> Result<VoteReceipt> {
        tokio::time::timeout(
            state.vote_timeout,
            state.votes.vote(user, req.post_id, req.direction),
        )
        .await
        .context(VoteTimeoutSnafu)?
        .context(VoteSnafu)
    }

    match caller(user) {
        Ok(user) => match vote1(&state, user, &req).await {
            Ok(receipt) => Json(receipt).into_response(),
            Err(err) => {
                error!("{:#?}", err);
                if matches!(err, Error::VoteTimeout { .. }) {
                    counter_add!(state.instruments, "posts.votes.timeouts", 1, &[]);
                }
                err.into_response()
            }
        },
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the posts API
pub fn make_router(state: Arc<Hotboard>) -> Router<Arc<Hotboard>> {
    Router::new()
        .route("/posts", get(list).post(publish))
        .route("/posts/vote", post(vote))
        .route("/posts/{post_id}", get(stats))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            identify,
        ))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{HeaderValue, Method, Request, header::CONTENT_TYPE},
    };
    use chrono::{TimeZone, Utc};
    use opentelemetry_prometheus_text_exporter::PrometheusExporter;
    use tower::ServiceExt;

    use crate::{
        clock::{Clock, ManualClock},
        hotboard::Settings,
        memory,
        metrics::Instruments,
        ordered_set::{self, Backend as OrderedSets, Keys, Probe, Reading},
    };

    type SetsResult<T> = std::result::Result<T, ordered_set::Error>;

    /// In-memory ordered sets that, once `stalled` is set, hang on any write to `key`
    struct Stalling {
        inner: memory::OrderedSets,
        key: String,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl OrderedSets for Stalling {
        async fn insert(&self, key: &str, member: &str, score: f64) -> SetsResult<()> {
            if self.stalled.load(Ordering::SeqCst) && key == self.key {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.inner.insert(key, member, score).await
        }
        async fn score(&self, key: &str, member: &str) -> SetsResult<Option<f64>> {
            self.inner.score(key, member).await
        }
        async fn remove(&self, key: &str, member: &str) -> SetsResult<()> {
            self.inner.remove(key, member).await
        }
        async fn count_by_score(&self, key: &str, min: f64, max: f64) -> SetsResult<u64> {
            self.inner.count_by_score(key, min, max).await
        }
        async fn range_by_rank_rev(
            &self,
            key: &str,
            start: usize,
            stop: usize,
        ) -> SetsResult<Vec<String>> {
            self.inner.range_by_rank_rev(key, start, stop).await
        }
        async fn range_by_score(
            &self,
            key: &str,
            min: f64,
            max: f64,
            limit: usize,
        ) -> SetsResult<Vec<(String, f64)>> {
            self.inner.range_by_score(key, min, max, limit).await
        }
        async fn remove_range_by_score(&self, key: &str, min: f64, max: f64) -> SetsResult<u64> {
            self.inner.remove_range_by_score(key, min, max).await
        }
        async fn intersect_store(
            &self,
            dest: &str,
            sources: &[(String, f64)],
            ttl: Duration,
        ) -> SetsResult<()> {
            self.inner.intersect_store(dest, sources, ttl).await
        }
        async fn exists(&self, key: &str) -> SetsResult<bool> {
            self.inner.exists(key).await
        }
        async fn get(&self, key: &str) -> SetsResult<Option<i64>> {
            self.inner.get(key).await
        }
        async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> SetsResult<()> {
            self.inner.set_with_ttl(key, value, ttl).await
        }
        async fn probe(&self, probes: &[Probe]) -> SetsResult<Vec<Reading>> {
            self.inner.probe(probes).await
        }
    }

    #[test]
    fn callers() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_from_headers(&headers).unwrap(), None);
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        assert_eq!(
            caller_from_headers(&headers).unwrap(),
            Some(UserId::new(42))
        );
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("forty-two"));
        assert!(matches!(
            caller_from_headers(&headers),
            Err(Error::BadUserId { .. })
        ));
        headers.append(USER_ID_HEADER, HeaderValue::from_static("43"));
        assert!(matches!(
            caller_from_headers(&headers),
            Err(Error::MultipleUserIds { .. })
        ));
    }

    #[test]
    fn vote_failures_are_generic() {
        let err = Error::Vote {
            source: votes::Error::Ledger {
                source: vote_ledger::Error::Count {
                    post: PostId::new(1),
                    source: crate::ordered_set::Error::new(std::fmt::Error),
                    backtrace: Backtrace::capture(),
                },
            },
        };
        assert_eq!(
            err.as_status_and_msg(),
            (StatusCode::SERVICE_UNAVAILABLE, "Service busy".to_owned())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_votes_are_abandoned() {
        let keys = Keys::default();
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_750_000_000, 0).unwrap(),
        ));
        let sets = Arc::new(Stalling {
            inner: memory::OrderedSets::new(clock.clone()),
            key: keys.post_score(),
            stalled: AtomicBool::new(false),
        });
        let settings = Settings {
            vote_timeout: Duration::from_millis(250),
            ..Settings::default()
        };
        let state = Arc::new(
            Hotboard::new(
                Arc::new(memory::Storage::new()),
                sets.clone(),
                clock.clone(),
                &settings,
                Arc::new(Instruments::new("hotboard")),
                PrometheusExporter::new(),
            )
            .unwrap(),
        );
        let post = Post::new(
            PostId::new(1),
            UserId::new(7),
            CommunityId::new(3),
            "title",
            "content",
            clock.now(),
        );
        state.storage.add_post(&post).await.unwrap();
        state.index.index_post(&post, 0.0).await.unwrap();

        sets.stalled.store(true, Ordering::SeqCst);
        let router = Router::new()
            .nest("/api/v1", make_router(state.clone()))
            .with_state(state.clone());
        let rsp = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/posts/vote")
                    .header(USER_ID_HEADER, "100")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"post_id": 1, "direction": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(rsp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Service busy");

        // The ledger took the vote, but the score was never written
        assert_eq!(
            sets.inner
                .score(&keys.post_voted(PostId::new(1)), "100")
                .await
                .unwrap(),
            Some(1.0)
        );
        assert_eq!(state.index.score(PostId::new(1)).await.unwrap(), Some(0.0));
        assert!(
            state
                .index
                .updated_between(&clock.now(), &clock.now(), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}

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

//! # The hotboard Integration Tests
//!
//! # Introduction
//!
//! These scenarios drive the full hotboard HTTP surface, in process: every scenario gets a fresh
//! [Fixture] (in-memory ordered sets & durable store, a manual clock) & talks to the same axum
//! [Router] the daemon serves, via [tower::ServiceExt::oneshot]. Nothing needs to be running.
//!
//! # Project Structure
//!
//! Scenario functions live in this library, grouped by area ([votes], [listings], [reconcile]);
//! the `Test` registration type & the `libtest-mimic` harness live under `tests/`. Each scenario
//! returns `Result<(), Failed>` so that setup steps can use `?`.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html

use std::{future::Future, sync::Arc};

use axum::{Router, body::Body};
use chrono::{DateTime, TimeZone, Utc};
use http::{Method, Request, StatusCode, header::CONTENT_TYPE};
use libtest_mimic::Failed;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower::ServiceExt;

use hotboard::{
    clock::ManualClock,
    entities::{CommunityId, Post, PostId, UserId},
    hot_score::HotScoreEpoch,
    hotboard::{Hotboard, Settings},
    http::USER_ID_HEADER,
    memory,
    metrics::Instruments,
    ops::make_router as make_ops_router,
    posts::{ListRsp, StatsRsp, make_router as make_posts_router},
};

pub mod listings;
pub mod reconcile;
pub mod votes;

/// Run an async scenario to completion on a fresh runtime
pub fn block_on<F>(scenario: F) -> Result<(), Failed>
where
    F: Future<Output = Result<(), Failed>>,
{
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(scenario)
}

/// The instant `secs` seconds after the default hot-score epoch
pub fn after_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(HotScoreEpoch::default().as_unix_seconds() + secs, 0)
        .single()
        .unwrap_or_default()
}

/// A hotboard instance on in-memory backends, with a clock the scenario controls
pub struct Fixture {
    pub state: Arc<Hotboard>,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<memory::Storage>,
    router: Router,
}

impl Fixture {
    pub fn new(now: DateTime<Utc>) -> Result<Fixture, Failed> {
        Fixture::with_settings(now, &Settings::default())
    }
    pub fn with_settings(now: DateTime<Utc>, settings: &Settings) -> Result<Fixture, Failed> {
        let clock = Arc::new(ManualClock::new(now));
        let storage = Arc::new(memory::Storage::new());
        let sets = Arc::new(memory::OrderedSets::new(clock.clone()));
        let state = Arc::new(Hotboard::new(
            storage.clone(),
            sets,
            clock.clone(),
            settings,
            Arc::new(Instruments::new("hotboard")),
            PrometheusExporter::new(),
        )?);
        let router = Router::new()
            .nest("/api/v1", make_posts_router(state.clone()))
            .merge(make_ops_router(state.clone()))
            .with_state(state.clone());
        Ok(Fixture {
            state,
            clock,
            storage,
            router,
        })
    }
    /// Send one request; return the status & the body, parsed as JSON (or [Value::Null] if empty)
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<UserId>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value), Failed> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        let rsp = self.router.clone().oneshot(request).await?;
        let status = rsp.status();
        let bytes = axum::body::to_bytes(rsp.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        Ok((status, value))
    }
    /// Like [Fixture::call], but insist on `expected` & deserialize the body
    pub async fn call_ok<T: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        user: Option<UserId>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Result<T, Failed> {
        let (status, value) = self.call(method, uri, user, body).await?;
        if status != expected {
            return Err(format!("{uri}: expected {expected}, got {status} ({value})").into());
        }
        Ok(serde_json::from_value(value)?)
    }
    pub async fn publish(
        &self,
        author: UserId,
        community: CommunityId,
        title: &str,
    ) -> Result<Post, Failed> {
        self.call_ok(
            Method::POST,
            "/api/v1/posts",
            Some(author),
            Some(json!({"community_id": community, "title": title})),
            StatusCode::CREATED,
        )
        .await
    }
    /// Vote; return the status & body, whatever they are
    pub async fn vote(
        &self,
        user: UserId,
        post: PostId,
        direction: i8,
    ) -> Result<(StatusCode, Value), Failed> {
        self.call(
            Method::POST,
            "/api/v1/posts/vote",
            Some(user),
            Some(json!({"post_id": post, "direction": direction})),
        )
        .await
    }
    pub async fn list(&self, query: &str) -> Result<Vec<PostId>, Failed> {
        Ok(self
            .call_ok::<ListRsp>(
                Method::GET,
                &format!("/api/v1/posts?{query}"),
                None,
                None,
                StatusCode::OK,
            )
            .await?
            .posts)
    }
    pub async fn stats(&self, post: PostId) -> Result<StatsRsp, Failed> {
        self.call_ok(
            Method::GET,
            &format!("/api/v1/posts/{post}"),
            None,
            None,
            StatusCode::OK,
        )
        .await
    }
    /// Run a hot-score sync through the operator API
    pub async fn sync(&self) -> Result<Value, Failed> {
        self.call_ok(
            Method::POST,
            "/ops/reconcile/hot-scores",
            None,
            None,
            StatusCode::OK,
        )
        .await
    }
}

/// Floating-point comparison for scores
pub fn assert_close(actual: f64, expected: f64) -> Result<(), Failed> {
    if (actual - expected).abs() < 1e-9 {
        Ok(())
    } else {
        Err(format!("expected {expected}, got {actual}").into())
    }
}

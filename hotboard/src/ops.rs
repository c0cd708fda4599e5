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

//! # Operator API
//!
//! Endpoints for running reconciliation jobs on demand. These are mounted on the private listener
//! only.

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use tracing::error;

use crate::{hotboard::Hotboard, http::ErrorResponseBody};

/// Run a hot-score sync now
///
/// Responds with the [SyncOutcome](crate::reconcile::SyncOutcome); if the scheduler's run is
/// underway, that's "skipped".
async fn sync_hot_scores(State(state): State<Arc<Hotboard>>) -> axum::response::Response {
    match state.reconciler.sync_hot_scores().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => {
            error!("{:#?}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponseBody {
                    error: format!("{err}"),
                },
            )
                .into_response()
        }
    }
}

/// Prune stale update-time markers now
async fn prune_markers(State(state): State<Arc<Hotboard>>) -> axum::response::Response {
    match state.reconciler.prune_markers().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => {
            error!("{:#?}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponseBody {
                    error: format!("{err}"),
                },
            )
                .into_response()
        }
    }
}

/// Return a router for the operator API
pub fn make_router(state: Arc<Hotboard>) -> Router<Arc<Hotboard>> {
    Router::new()
        .route("/ops/reconcile/hot-scores", post(sync_hot_scores))
        .route("/ops/reconcile/prune", post(prune_markers))
        .with_state(state)
}

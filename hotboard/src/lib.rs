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

//! # hotboard
//!
//! Hot-score ranking for forum posts, cached in an ordered-set store & reconciled into a durable
//! one.
//!
//! The library crate has the same name as the daemon, so `rustdoc` ignores the binary; see
//! [_docs] for the general documentation.
pub mod _docs;
pub mod clock;
pub mod creation_times;
pub mod entities;
pub mod hot_score;
pub mod hotboard;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod ops;
pub mod ordered_set;
pub mod posts;
pub mod reconcile;
pub mod redis;
pub mod score_index;
pub mod scylla;
pub mod storage;
pub mod util;
pub mod vote_ledger;
pub mod votes;

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
//! General documentation; notes that don't belong to any one struct or method.
//!
//! ## Two stores
//!
//! Every vote lands in the ordered-set store (Redis, in production) & nowhere else. The vote
//! ledger, the up & down tallies, the hot score & the "this post changed" marker all live there,
//! so a vote costs a handful of round-trips to an in-memory store & never touches the database.
//!
//! The durable store (ScyllaDB) catches up on a schedule. A [Reconciler] run reads the markers
//! written since its last watermark, reads the current tallies & scores for those posts, & writes
//! them out in batches. Runs are idempotent: the durable side is overwritten with whatever the
//! cache says *now*, so re-processing a post is harmless. That lets the watermark be conservative;
//! it only moves forward once a batch has been written, & it never moves backward.
//!
//! [Reconciler]: crate::reconcile::Reconciler
//!
//! ## Keys
//!
//! All cache keys share a configurable prefix (`hotboard:` by default):
//!
//! | key                       | kind       | members     | score                      |
//! |---------------------------|------------|-------------|----------------------------|
//! | `post:time`               | sorted set | post id     | creation time (Unix secs)  |
//! | `post:score`              | sorted set | post id     | hot score                  |
//! | `post:voted:<post>`       | sorted set | user id     | vote direction (-1, 1)     |
//! | `post:update_time`        | sorted set | post id     | last vote time (Unix secs) |
//! | `post:created:<post>`     | string     |             | creation time (Unix secs)  |
//! | `community:<id>`          | sorted set | post id     | 0                          |
//! | `<order>:<community>`     | sorted set | post id     | ranking, cached briefly    |
//!
//! ## The hot score
//!
//! ```text
//! log10(max(ups - downs, 1)) + (created - epoch) / 45000
//! ```
//!
//! Every 45000 seconds (12.5 hours) of post age is worth one order of magnitude of net votes.
//! The age term uses the post's creation time, not the time of the vote, so a post's score only
//! moves when its votes do.

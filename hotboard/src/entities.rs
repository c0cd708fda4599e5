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

//! # entities
//!
//! The hotboard domain types: identifiers, vote directions & posts.

use std::{
    fmt::Display,
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{value} is not a valid vote direction; expected -1, 0 or 1"))]
    BadDirection { value: i64, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid identifier: {source}"))]
    BadId {
        text: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },
    #[snafu(display("{text} is not a recognized listing order"))]
    BadOrder { text: String, backtrace: Backtrace },
    #[snafu(display("Node ID {node} exceeds the maximum of {max}"))]
    NodeIdOor {
        node: u16,
        max: u16,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Declare a newtype over `i64` to be used as an opaque identifier for some sort of entity.
///
/// Posts, users & communities are all identified by 64-bit integers, but I'd rather the compiler
/// catch me passing a [UserId] where a [PostId] was wanted. Cache members are the decimal
/// representation of the underlying integer, so [Display] & [FromStr] round-trip through that.
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $type_name(i64);
        impl $type_name {
            pub const fn new(raw: i64) -> $type_name {
                $type_name(raw)
            }
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl FromStr for $type_name {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self> {
                s.parse::<i64>()
                    .context(BadIdSnafu { text: s.to_owned() })
                    .map($type_name)
            }
        }
        impl From<$type_name> for i64 {
            fn from(value: $type_name) -> Self {
                value.0
            }
        }
    };
}

define_id!(PostId);
define_id!(UserId);
define_id!(CommunityId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         VoteDirection                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A user's stance on a post
///
/// On the wire this is an integer in {-1, 0, 1}; anything else is refused at deserialization time
/// so that nothing downstream ever sees an out-of-range direction. [VoteDirection::Retract] is
/// never stored: a retracted vote is represented by the absence of a ledger entry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum VoteDirection {
    Down,
    Retract,
    Up,
}

impl VoteDirection {
    /// The ordered-set score under which this direction is recorded; `None` for a retraction
    pub fn as_score(&self) -> Option<f64> {
        match self {
            VoteDirection::Down => Some(-1.0),
            VoteDirection::Retract => None,
            VoteDirection::Up => Some(1.0),
        }
    }
}

impl TryFrom<i8> for VoteDirection {
    type Error = Error;

    fn try_from(value: i8) -> Result<Self> {
        match value {
            -1 => Ok(VoteDirection::Down),
            0 => Ok(VoteDirection::Retract),
            1 => Ok(VoteDirection::Up),
            n => BadDirectionSnafu { value: n as i64 }.fail(),
        }
    }
}

impl From<VoteDirection> for i8 {
    fn from(value: VoteDirection) -> Self {
        match value {
            VoteDirection::Down => -1,
            VoteDirection::Retract => 0,
            VoteDirection::Up => 1,
        }
    }
}

impl Display for VoteDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", i8::from(*self))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           ListOrder                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// How to rank posts when listing them
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    /// Newest first
    #[default]
    Time,
    /// Hottest first
    Score,
}

impl Display for ListOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListOrder::Time => write!(f, "time"),
            ListOrder::Score => write!(f, "score"),
        }
    }
}

impl FromStr for ListOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "time" => Ok(ListOrder::Time),
            "score" => Ok(ListOrder::Score),
            _ => BadOrderSnafu { text: s.to_owned() }.fail(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Post                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A forum post, as recorded in the durable store
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Post {
    id: PostId,
    author: UserId,
    community: CommunityId,
    title: String,
    content: String,
    created: DateTime<Utc>,
}

impl Post {
    pub fn new(
        id: PostId,
        author: UserId,
        community: CommunityId,
        title: &str,
        content: &str,
        created: DateTime<Utc>,
    ) -> Post {
        Post {
            id,
            author,
            community,
            title: title.to_owned(),
            content: content.to_owned(),
            created,
        }
    }
    pub fn id(&self) -> PostId {
        self.id
    }
    pub fn author(&self) -> UserId {
        self.author
    }
    pub fn community(&self) -> CommunityId {
        self.community
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn content(&self) -> &str {
        &self.content
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        PostIdGenerator                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

// 2025-01-01T00:00:00Z, in milliseconds
const ID_EPOCH_MILLIS: i64 = 1_735_689_600_000;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// Mint [PostId]s
///
/// Ids are laid out snowflake-style: milliseconds since 2025-01-01 in the high bits, then a ten-bit
/// node id, then a twelve-bit per-millisecond sequence number. Ids minted by a single generator
/// are strictly increasing; ids minted by generators with distinct node ids never collide.
///
/// Should a burst exhaust the sequence space for a given millisecond, the generator borrows from
/// the next millisecond rather than wait for the wall clock to catch up.
#[derive(Debug)]
pub struct PostIdGenerator {
    node: u16,
    // (last millisecond used, last sequence number used)
    state: Mutex<(i64, i64)>,
}

impl PostIdGenerator {
    pub fn new(node: u16) -> Result<PostIdGenerator> {
        ensure!(
            node <= MAX_NODE_ID,
            NodeIdOorSnafu {
                node,
                max: MAX_NODE_ID
            }
        );
        Ok(PostIdGenerator {
            node,
            state: Mutex::new((-1, 0)),
        })
    }
    pub fn next_id(&self, now: DateTime<Utc>) -> PostId {
        // Nothing can panic while this lock is held, so a poisoned lock still guards good state.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let millis = (now.timestamp_millis() - ID_EPOCH_MILLIS).max(0);
        let (last, seq) = *state;
        let next = if millis > last {
            (millis, 0)
        } else if seq < MAX_SEQUENCE {
            (last, seq + 1)
        } else {
            (last + 1, 0)
        };
        *state = next;
        PostId(
            (next.0 << (NODE_BITS + SEQUENCE_BITS)) | ((self.node as i64) << SEQUENCE_BITS) | next.1,
        )
    }
}

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

//! Reconciliation scenarios, driven through the operator API

use chrono::Duration;
use http::{Method, StatusCode};
use libtest_mimic::Failed;

use hotboard::entities::{CommunityId, UserId};

use crate::{Fixture, after_epoch, assert_close};

const AUTHOR: UserId = UserId::new(1);
const FORUM: CommunityId = CommunityId::new(10);

/// Votes reach the durable store on the next sync, & only then
pub async fn votes_are_reconciled() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let first = fixture.publish(AUTHOR, FORUM, "first").await?;
    let second = fixture.publish(AUTHOR, FORUM, "second").await?;

    fixture.vote(UserId::new(2), first.id(), 1).await?;
    fixture.vote(UserId::new(3), first.id(), 1).await?;
    fixture.vote(UserId::new(4), first.id(), -1).await?;
    fixture.vote(UserId::new(2), second.id(), -1).await?;
    assert!(fixture.storage.hot_score(first.id()).is_none());

    fixture.clock.advance(Duration::seconds(30));
    let outcome = fixture.sync().await?;
    assert_eq!(outcome["outcome"], "synced");
    assert_eq!(outcome["posts"], 2);

    let record = fixture
        .storage
        .hot_score(first.id())
        .ok_or("no durable hot score")?;
    assert_close(record.hot_score, fixture.stats(first.id()).await?.score)?;
    assert_eq!(fixture.storage.counters(first.id()), Some((2, 1)));
    assert_eq!(fixture.storage.counters(second.id()), Some((0, 1)));

    // Nothing new has happened, so the next run is idle & writes nothing
    let writes = fixture.storage.writes();
    fixture.clock.advance(Duration::seconds(30));
    assert_eq!(fixture.sync().await?["outcome"], "idle");
    assert_eq!(fixture.storage.writes(), writes);

    // A retraction is picked up by the run after it
    fixture.vote(UserId::new(4), first.id(), 0).await?;
    fixture.clock.advance(Duration::seconds(30));
    let outcome = fixture.sync().await?;
    assert_eq!(outcome["posts"], 1);
    assert_eq!(fixture.storage.counters(first.id()), Some((2, 0)));
    Ok(())
}

/// A first run with nothing to do is idle & sets the watermark to "now"
pub async fn idle_first_run() -> Result<(), Failed> {
    let now = after_epoch(45_000);
    let fixture = Fixture::new(now)?;
    let outcome = fixture.sync().await?;
    assert_eq!(outcome["outcome"], "idle");
    assert_eq!(outcome["watermark"], serde_json::to_value(now)?);
    assert_eq!(fixture.storage.writes(), 0);
    Ok(())
}

/// Markers older than the retention window are pruned
pub async fn stale_markers_are_pruned() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let post = fixture.publish(AUTHOR, FORUM, "old news").await?;
    fixture.vote(UserId::new(2), post.id(), 1).await?;

    let (status, outcome) = fixture
        .call(Method::POST, "/ops/reconcile/prune", None, None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "pruned");
    assert_eq!(outcome["markers"], 0);

    fixture.clock.advance(Duration::days(31));
    let (_, outcome) = fixture
        .call(Method::POST, "/ops/reconcile/prune", None, None)
        .await?;
    assert_eq!(outcome["markers"], 1);
    Ok(())
}

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

//! Listing scenarios: ranking by time & score, paging, community filtering

use chrono::Duration;
use http::{Method, StatusCode};
use libtest_mimic::Failed;

use hotboard::entities::{CommunityId, Post, PostId, UserId};

use crate::{Fixture, after_epoch};

const AUTHOR: UserId = UserId::new(1);
const COOKING: CommunityId = CommunityId::new(10);
const CYCLING: CommunityId = CommunityId::new(20);

/// Publish three posts an hour apart: two in [COOKING], the last in [CYCLING]
async fn three_posts(fixture: &Fixture) -> Result<(Post, Post, Post), Failed> {
    let a = fixture.publish(AUTHOR, COOKING, "a").await?;
    fixture.clock.advance(Duration::hours(1));
    let b = fixture.publish(AUTHOR, COOKING, "b").await?;
    fixture.clock.advance(Duration::hours(1));
    let c = fixture.publish(AUTHOR, CYCLING, "c").await?;
    Ok((a, b, c))
}

/// Up-vote `post` once from each of `voters` distinct users
async fn up_vote(fixture: &Fixture, post: PostId, voters: i64) -> Result<(), Failed> {
    for user in 0..voters {
        let (status, _) = fixture.vote(UserId::new(1000 + user), post, 1).await?;
        assert_eq!(status, StatusCode::OK);
    }
    Ok(())
}

/// Newest first by time; highest hot score first by score
pub async fn ranked_listings() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let (a, b, c) = three_posts(&fixture).await?;

    assert_eq!(fixture.list("order=time").await?, vec![c.id(), b.id(), a.id()]);
    // Time is the default:
    assert_eq!(fixture.list("").await?, vec![c.id(), b.id(), a.id()]);
    // With no votes, newer posts score higher
    assert_eq!(fixture.list("order=score").await?, vec![c.id(), b.id(), a.id()]);

    // Ten up-votes are worth a full 45000s of age; two hours is far less
    up_vote(&fixture, a.id(), 10).await?;
    assert_eq!(fixture.list("order=score").await?, vec![a.id(), c.id(), b.id()]);
    assert_eq!(fixture.list("order=time").await?, vec![c.id(), b.id(), a.id()]);
    Ok(())
}

/// `offset` is a one-based page number; zero means the first page
pub async fn paged_listings() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let (a, b, c) = three_posts(&fixture).await?;

    assert_eq!(fixture.list("order=time&offset=1&limit=2").await?, vec![c.id(), b.id()]);
    assert_eq!(fixture.list("order=time&offset=2&limit=2").await?, vec![a.id()]);
    assert_eq!(fixture.list("order=time&offset=3&limit=2").await?, Vec::<PostId>::new());
    assert_eq!(fixture.list("order=time&offset=0&limit=1").await?, vec![c.id()]);
    assert_eq!(fixture.list("limit=0").await?, Vec::<PostId>::new());

    let (status, _) = fixture
        .call(Method::GET, "/api/v1/posts?limit=101", None, None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

/// Community listings keep the ordering, & are cached briefly
pub async fn community_listings() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let (a, b, c) = three_posts(&fixture).await?;

    assert_eq!(
        fixture.list("order=time&community_id=10").await?,
        vec![b.id(), a.id()]
    );
    assert_eq!(
        fixture.list("order=score&community_id=10").await?,
        vec![b.id(), a.id()]
    );
    assert_eq!(fixture.list("community_id=20").await?, vec![c.id()]);
    assert_eq!(fixture.list("community_id=30").await?, Vec::<PostId>::new());

    up_vote(&fixture, a.id(), 10).await?;
    // The community ranking is served from cache for up to a minute...
    assert_eq!(
        fixture.list("order=score&community_id=10").await?,
        vec![b.id(), a.id()]
    );
    // ...after which it's rebuilt
    fixture.clock.advance(Duration::seconds(61));
    assert_eq!(
        fixture.list("order=score&community_id=10").await?,
        vec![a.id(), b.id()]
    );
    // The unfiltered ranking is always current
    assert_eq!(fixture.list("order=score").await?, vec![a.id(), c.id(), b.id()]);
    Ok(())
}

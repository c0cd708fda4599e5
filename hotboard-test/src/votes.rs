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

//! Voting scenarios

use http::StatusCode;
use libtest_mimic::Failed;

use hotboard::entities::{CommunityId, UserId};

use crate::{Fixture, after_epoch, assert_close};

const AUTHOR: UserId = UserId::new(1);
const ALICE: UserId = UserId::new(2);
const BOB: UserId = UserId::new(3);
const FORUM: CommunityId = CommunityId::new(10);

/// A post created exactly 45000s after the epoch, with one up-vote, scores exactly 1
pub async fn first_vote_scores_one() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let post = fixture.publish(AUTHOR, FORUM, "first post").await?;
    // Freshly published posts are scored already:
    assert_close(fixture.stats(post.id()).await?.score, 1.0)?;

    // & voting later doesn't change the age term; only creation time counts
    fixture.clock.advance(chrono::Duration::hours(6));
    let (status, receipt) = fixture.vote(ALICE, post.id(), 1).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["ups"], 1);
    assert_eq!(receipt["downs"], 0);
    assert_close(receipt["score"].as_f64().unwrap_or_default(), 1.0)?;

    let stats = fixture.stats(post.id()).await?;
    assert_eq!((stats.ups, stats.downs), (1, 0));
    assert_close(stats.score, 1.0)?;
    Ok(())
}

/// Re-casting the same vote succeeds & changes nothing
pub async fn repeated_votes_are_harmless() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(90_000))?;
    let post = fixture.publish(AUTHOR, FORUM, "repeat").await?;

    for _ in 0..3 {
        let (status, receipt) = fixture.vote(ALICE, post.id(), 1).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["ups"], 1);
    }
    let (_, receipt) = fixture.vote(BOB, post.id(), 1).await?;
    assert_eq!(receipt["ups"], 2);

    let stats = fixture.stats(post.id()).await?;
    assert_eq!((stats.ups, stats.downs), (2, 0));
    assert_close(stats.score, 2f64.log10() + 2.0)?;
    Ok(())
}

/// Changing a vote flips the ledger entry; retracting it removes the entry
pub async fn votes_flip_and_retract() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let post = fixture.publish(AUTHOR, FORUM, "flip").await?;

    fixture.vote(ALICE, post.id(), 1).await?;
    let (status, receipt) = fixture.vote(ALICE, post.id(), -1).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((receipt["ups"].clone(), receipt["downs"].clone()), (0.into(), 1.into()));
    // Net votes are negative, so the magnitude is clamped to one:
    assert_close(fixture.stats(post.id()).await?.score, 1.0)?;

    let (status, receipt) = fixture.vote(ALICE, post.id(), 0).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((receipt["ups"].clone(), receipt["downs"].clone()), (0.into(), 0.into()));

    // Retracting a vote that isn't there is fine, too
    let (status, _) = fixture.vote(BOB, post.id(), 0).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

/// Votes need a caller, a known post & a direction in {-1, 0, 1}
pub async fn bad_votes_are_refused() -> Result<(), Failed> {
    let fixture = Fixture::new(after_epoch(45_000))?;
    let post = fixture.publish(AUTHOR, FORUM, "refusals").await?;

    let (status, _) = fixture
        .call(
            http::Method::POST,
            "/api/v1/posts/vote",
            None,
            Some(serde_json::json!({"post_id": post.id(), "direction": 1})),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = fixture.vote(ALICE, post.id(), 2).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = fixture
        .vote(ALICE, hotboard::entities::PostId::new(404), 1)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No such post");

    assert_eq!(fixture.stats(post.id()).await?.ups, 0);
    Ok(())
}

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

//! # The hotboard scenarios
//!
//! This test opts out of the default harness (`harness = false` in Cargo.toml) & runs under
//! [libtest-mimic] instead, so that scenarios can be registered from anywhere with
//! [inventory::submit!] & each one gets its own runtime & fixture.
//!
//! Set `RUST_LOG` to see hotboard's logging while the scenarios run.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html

use common::Test;
use hotboard_test::{block_on, listings, reconcile, votes};

use libtest_mimic::{Arguments, Trial};
use tracing_subscriber::EnvFilter;

mod common;

inventory::submit!(Test {
    name: "first_vote_scores_one",
    test_fn: || block_on(votes::first_vote_scores_one()),
});

inventory::submit!(Test {
    name: "repeated_votes_are_harmless",
    test_fn: || block_on(votes::repeated_votes_are_harmless()),
});

inventory::submit!(Test {
    name: "votes_flip_and_retract",
    test_fn: || block_on(votes::votes_flip_and_retract()),
});

inventory::submit!(Test {
    name: "bad_votes_are_refused",
    test_fn: || block_on(votes::bad_votes_are_refused()),
});

inventory::submit!(Test {
    name: "ranked_listings",
    test_fn: || block_on(listings::ranked_listings()),
});

inventory::submit!(Test {
    name: "paged_listings",
    test_fn: || block_on(listings::paged_listings()),
});

inventory::submit!(Test {
    name: "community_listings",
    test_fn: || block_on(listings::community_listings()),
});

inventory::submit!(Test {
    name: "votes_are_reconciled",
    test_fn: || block_on(reconcile::votes_are_reconciled()),
});

inventory::submit!(Test {
    name: "idle_first_run",
    test_fn: || block_on(reconcile::idle_first_run()),
});

inventory::submit!(Test {
    name: "stale_markers_are_pruned",
    test_fn: || block_on(reconcile::stale_markers_are_pruned()),
});

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let args = Arguments::from_args();
    libtest_mimic::run(
        &args,
        inventory::iter::<Test>
            .into_iter()
            .map(|test| Trial::test(test.name, test.test_fn))
            .collect(),
    )
    .exit();
}

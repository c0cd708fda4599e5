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

//! # hotboard application state
//!
//! [Hotboard] wires the cache components to their backends once, at startup (& again on every
//! configuration reload); handlers & the reconciliation scheduler reach everything through it.

use std::{sync::Arc, time::Duration};

use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use snafu::prelude::*;

use crate::{
    clock::Clock,
    creation_times::CreationTimes,
    entities::{self, PostIdGenerator},
    hot_score::HotScoreEpoch,
    metrics::Instruments,
    ordered_set::{Backend as OrderedSets, DEFAULT_KEY_PREFIX, Keys},
    reconcile::{self, Reconciler},
    score_index::ScoreIndex,
    storage::Backend as StorageBackend,
    vote_ledger::VoteLedger,
    votes::Votes,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build a post id generator: {source}"))]
    Ids { source: entities::Error },
    #[snafu(display("Failed to build the reconciler: {source}"))]
    Reconciler { source: reconcile::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Tuning parameters for the cache & its handlers
#[derive(Clone, Debug)]
pub struct Settings {
    pub key_prefix: String,
    pub hot_score_epoch: HotScoreEpoch,
    pub creation_time_ttl: Duration,
    pub community_ranking_ttl: Duration,
    /// Votes not completed within this long fail with "service busy"
    pub vote_timeout: Duration,
    /// The largest page size a listing may request
    pub max_page_size: u64,
    pub node_id: u16,
    pub reconcile: reconcile::Config,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            hot_score_epoch: HotScoreEpoch::default(),
            creation_time_ttl: Duration::from_secs(86400),
            community_ranking_ttl: Duration::from_secs(60),
            vote_timeout: Duration::from_secs(5),
            max_page_size: 100,
            node_id: 0,
            reconcile: reconcile::Config::default(),
        }
    }
}

/// Application state available to all handlers
pub struct Hotboard {
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub votes: Votes,
    pub index: Arc<ScoreIndex>,
    pub creation_times: Arc<CreationTimes>,
    pub reconciler: Arc<Reconciler>,
    pub ids: PostIdGenerator,
    pub clock: Arc<dyn Clock>,
    pub epoch: HotScoreEpoch,
    pub instruments: Arc<Instruments>,
    pub exporter: PrometheusExporter,
    pub vote_timeout: Duration,
    pub max_page_size: u64,
}

impl Hotboard {
    pub fn new(
        storage: Arc<dyn StorageBackend + Send + Sync>,
        sets: Arc<dyn OrderedSets + Send + Sync>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
        instruments: Arc<Instruments>,
        exporter: PrometheusExporter,
    ) -> Result<Hotboard> {
        let keys = Keys::new(&settings.key_prefix);
        let index = Arc::new(ScoreIndex::new(
            sets.clone(),
            keys.clone(),
            settings.community_ranking_ttl,
        ));
        let creation_times = Arc::new(CreationTimes::new(
            sets.clone(),
            storage.clone(),
            keys.clone(),
            settings.creation_time_ttl,
            instruments.clone(),
        ));
        let votes = Votes::new(
            VoteLedger::new(sets.clone(), keys.clone()),
            index.clone(),
            creation_times.clone(),
            clock.clone(),
            settings.hot_score_epoch,
            instruments.clone(),
        );
        let reconciler = Arc::new(
            Reconciler::new(
                storage.clone(),
                sets,
                keys,
                index.clone(),
                clock.clone(),
                &settings.reconcile,
                instruments.clone(),
            )
            .context(ReconcilerSnafu)?,
        );
        Ok(Hotboard {
            storage,
            votes,
            index,
            creation_times,
            reconciler,
            ids: PostIdGenerator::new(settings.node_id).context(IdsSnafu)?,
            clock,
            epoch: settings.hot_score_epoch,
            instruments,
            exporter,
            vote_timeout: settings.vote_timeout,
            max_page_size: settings.max_page_size,
        })
    }
}

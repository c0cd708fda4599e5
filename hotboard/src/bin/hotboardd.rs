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

//! # hotboardd
//!
//! The hotboard daemon.
//!
//! # Introduction
//!
//! `hotboardd` serves the hotboard API: posts are published, voted on & listed by hot score or
//! recency through the public listener, while the private listener exposes `/healthcheck`,
//! `/metrics` & the operator endpoints. A recurring reconciliation task flushes cached scores &
//! tallies into the durable store.
//!
//! `hotboardd` always runs in the foreground, logging to stdout; run it under a supervisor (or in
//! a container) if you want it in the background.

use std::{
    env,
    fmt::Display,
    future::IntoFuture,
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use axum::{Router, extract::State, routing::get};
use clap::{Arg, ArgAction, Command, crate_authors, crate_version, value_parser};
use http::{HeaderName, HeaderValue};
use opentelemetry::{KeyValue, global};
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use secrecy::SecretString;
use serde::Deserialize;
use snafu::{IntoError, prelude::*};
use tap::Pipe;
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
    sync::Notify,
    task::JoinHandle,
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, error, info};
use tracing_subscriber::{Layer, Registry, filter::EnvFilter, fmt, layer::SubscriberExt};

use hotboard::{
    clock::{Clock, SystemClock},
    hot_score::HotScoreEpoch,
    hotboard::{Hotboard, Settings},
    memory,
    metrics::{Instruments, check_metric_registrations},
    ops::make_router as make_ops_router,
    ordered_set::{Backend as OrderedSets, DEFAULT_KEY_PREFIX},
    posts::make_router as make_posts_router,
    reconcile::{self, Scheduler},
    redis::{Options as RedisOptions, Redis},
    storage::Backend as StorageBackend,
    util::Credentials,
};

/// The hotboardd application error type
///
/// [Debug] is implemented by hand, in terms of [Display], since `main()` returns
/// `Result<(), Error>` & the derived implementation makes for a poor message on stderr.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Unable to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Couldn't resolve the present working directory: {source}"))]
    CurrentDir { source: std::io::Error },
    #[snafu(display("The metric name {name} was registered more than once"))]
    DuplicateMetric { name: &'static str },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to build the application state: {source}"))]
    Hotboard {
        source: hotboard::hotboard::Error,
    },
    #[snafu(display("Failed to connect to Redis: {source}"))]
    Redis { source: hotboard::redis::Error },
    #[snafu(display("Failed to start reconciliation: {source}"))]
    Scheduler { source: reconcile::Error },
    #[snafu(display("Failed to install a handler for {signal}: {source}"))]
    Signal {
        signal: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to connect to ScyllaDB: {source}"))]
    Scylla {
        #[snafu(source(from(hotboard::scylla::Error, Box::new)))]
        source: Box<hotboard::scylla::Error>,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

static DEFAULT_CONFIG: &str = "/etc/hotboard.toml";

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
    /// Overrides any ScyllaDB credentials given in the configuration file
    pub storage_credentials: Option<Credentials>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> Result<CliOpts> {
        let here = env::current_dir().context(CurrentDirSnafu)?;
        Ok(CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches
                .get_one::<PathBuf>("config")
                .cloned()
                .map(|p| here.join(p)),
            storage_credentials: matches.get_one::<Credentials>("storage-credentials").cloned(),
        })
    }
}

/// Durable store configuration
// Deserialize only, due to the secrets
#[derive(Clone, Debug, Deserialize)]
pub enum StorageConfig {
    /// Use ScyllaDB
    Scylla {
        /// ScyllaDB credentials, if authentication is to be used
        credentials: Option<Credentials>,
        /// ScyllaDB hosts; specify as "host:port" (or anything that can be parsed as a [SocketAddr])
        hosts: Vec<SocketAddr>,
    },
    /// Keep everything in process memory; nothing survives a restart
    InMemory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Scylla {
            credentials: None,
            hosts: vec!["127.0.0.1:9042".parse::<SocketAddr>().unwrap(/* known good */)],
        }
    }
}

/// Ordered-set store configuration
#[derive(Clone, Debug, Deserialize)]
pub enum CacheConfig {
    Redis {
        /// Connection URL ("redis://[user:password@]host:port/db"); may carry credentials
        url: SecretString,
        #[serde(rename = "connection-timeout")]
        connection_timeout: Option<Duration>,
        #[serde(rename = "response-timeout")]
        response_timeout: Option<Duration>,
        retries: Option<usize>,
    },
    /// Keep the cache in process memory
    InMemory,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Redis {
            url: SecretString::from("redis://127.0.0.1:6379"),
            connection_timeout: None,
            response_timeout: None,
            retries: None,
        }
    }
}

/// hotboard configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct ConfigV1 {
    /// Local address at which to listen for public requests; specify as "address:port"
    #[serde(rename = "public-address")]
    public_address: SocketAddr,
    /// Address at which to listen for private requests (health, metrics & operator endpoints)
    #[serde(rename = "private-address")]
    private_address: SocketAddr,
    #[serde(rename = "storage-config")]
    storage_config: StorageConfig,
    #[serde(rename = "cache-config")]
    cache_config: CacheConfig,
    /// Prepended to every cache key
    #[serde(rename = "key-prefix")]
    key_prefix: String,
    /// Unix time (in seconds) against which post ages are measured
    #[serde(rename = "hot-score-epoch")]
    hot_score_epoch: HotScoreEpoch,
    #[serde(rename = "creation-time-ttl")]
    creation_time_ttl: Duration,
    #[serde(rename = "community-ranking-ttl")]
    community_ranking_ttl: Duration,
    #[serde(rename = "vote-timeout")]
    vote_timeout: Duration,
    #[serde(rename = "max-page-size")]
    max_page_size: u64,
    reconcile: reconcile::Config,
    /// Distinguishes this instance's post ids from those minted by other instances
    #[serde(rename = "node-id")]
    node_id: u16,
}

impl ConfigV1 {
    pub fn public_address(&self) -> &SocketAddr {
        &self.public_address
    }
    pub fn private_address(&self) -> &SocketAddr {
        &self.private_address
    }
    pub fn settings(&self) -> Settings {
        Settings {
            key_prefix: self.key_prefix.clone(),
            hot_score_epoch: self.hot_score_epoch,
            creation_time_ttl: self.creation_time_ttl,
            community_ranking_ttl: self.community_ranking_ttl,
            vote_timeout: self.vote_timeout,
            max_page_size: self.max_page_size,
            node_id: self.node_id,
            reconcile: self.reconcile.clone(),
        }
    }
}

impl Default for ConfigV1 {
    fn default() -> Self {
        let settings = Settings::default();
        ConfigV1 {
            public_address: "0.0.0.0:20779".parse::<SocketAddr>().unwrap(/* known good */),
            private_address: "127.0.0.1:20780".parse::<SocketAddr>().unwrap(/* known good */),
            storage_config: StorageConfig::default(),
            cache_config: CacheConfig::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            hot_score_epoch: settings.hot_score_epoch,
            creation_time_ttl: settings.creation_time_ttl,
            community_ranking_ttl: settings.community_ranking_ttl,
            vote_timeout: settings.vote_timeout,
            max_page_size: settings.max_page_size,
            reconcile: settings.reconcile,
            node_id: settings.node_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the hotboard configuration file
///
/// A missing file at the default location means "run with defaults"; a missing file that was
/// explicitly named is an error.
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from(DEFAULT_CONFIG), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

/// Configure hotboardd logging
///
/// Logs go to stdout, as JSON unless `--plain` was given. This function only builds the formatter
/// & filter; installing them is up to the caller.
fn configure_logging(
    logopts: &LogOpts,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    // `json()` & `compact()` produce layers of different types, hence the box:
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        )
    };

    Ok((formatter, filter))
}

/// Count requests by method & path
async fn otel_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // OTel names must be ASCII alphanumerics, '_', '.', '-' or '/'; drop anything else & map '/'
    // to '.'
    let stem: String = request
        .uri()
        .path()
        .chars()
        .filter_map(|c| match c {
            '/' => Some('.'),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .collect();

    let name = format!("http.{}{}", request.method().as_str().to_lowercase(), stem);
    global::meter("hotboard").u64_counter(name).build().add(1, &[]);
    next.run(request).await
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Hotboard>>) -> String {
    let mut output = Vec::new();
    match state.exporter.export(&mut output) {
        Ok(_) => String::from_utf8_lossy(&output).into_owned(),
        Err(err) => {
            error!("Failed to export metrics: {err:?}");
            String::new()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Counter for generating request IDs
#[derive(Clone, Debug, Default)]
struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| HeaderValue::from_str(&s).ok())
            .map(RequestId::new)
    }
}

/// Make the [Router] that will be accessible to the world
fn make_world_router(state: Arc<Hotboard>) -> Router {
    // Incoming requests hit the `SetRequestIdLayer` first, so it's applied last:
    //
    //                 requests
    //                    |
    //                    v
    // +---------  SetRequestIdLayer      ---------+
    // | +-------      OTEL layer         -------+ |
    // | | +-----      TraceLayer         -----+ | |
    // | | | +--- PropagateRequestIdLayer ---+ | | |
    // | | | |          handler              | | | |
    // | | | +--- PropagateRequestIdLayer ---+ | | |
    // | | +-----      TraceLayer         -----+ | |
    // | +-------      OTEL Layer         -------+ |
    // +---------   SetRequestIdLayer     ---------+
    //                    |
    //                    v
    //                responses
    Router::new()
        .nest("/api/v1", make_posts_router(state.clone()))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(axum::middleware::from_fn(otel_middleware))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
        .with_state(state)
}

/// Make the [Router] that will only be locally accessible
fn make_local_router(state: Arc<Hotboard>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .merge(make_ops_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(otel_middleware))
        .with_state(state)
}

/// In-memory backends, created on first use & kept across configuration reloads so that a
/// `SIGHUP` doesn't wipe them
#[derive(Default)]
struct InMemoryBackends {
    storage: Option<Arc<memory::Storage>>,
    sets: Option<Arc<memory::OrderedSets>>,
}

async fn select_storage(
    config: &StorageConfig,
    credentials_override: &Option<Credentials>,
    in_memory: &mut InMemoryBackends,
) -> Result<Arc<dyn StorageBackend + Send + Sync>> {
    match config {
        StorageConfig::Scylla { credentials, hosts } => {
            let credentials = credentials_override
                .as_ref()
                .or(credentials.as_ref())
                .cloned()
                .map(<(SecretString, SecretString)>::from);
            Ok(Arc::new(
                hotboard::scylla::Session::new(hosts.iter().map(|h| h.to_string()), &credentials)
                    .await
                    .context(ScyllaSnafu)?,
            ))
        }
        StorageConfig::InMemory => Ok(in_memory
            .storage
            .get_or_insert_with(|| Arc::new(memory::Storage::new()))
            .clone()),
    }
}

async fn select_cache(
    config: &CacheConfig,
    clock: Arc<dyn Clock>,
    in_memory: &mut InMemoryBackends,
) -> Result<Arc<dyn OrderedSets + Send + Sync>> {
    match config {
        CacheConfig::Redis {
            url,
            connection_timeout,
            response_timeout,
            retries,
        } => Ok(Arc::new(
            Redis::new(
                url,
                &RedisOptions {
                    connection_timeout: *connection_timeout,
                    response_timeout: *response_timeout,
                    retries: *retries,
                },
            )
            .await
            .context(RedisSnafu)?,
        )),
        CacheConfig::InMemory => Ok(in_memory
            .sets
            .get_or_insert_with(|| Arc::new(memory::OrderedSets::new(clock)))
            .clone()),
    }
}

/// Serve hotboard API requests until told to stop
#[tracing::instrument(skip(opts, cfg))]
async fn serve(opts: CliOpts, mut cfg: ConfigV1) -> Result<()> {
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    fn log_on_err<T, E>(x: StdResult<T, E>)
    where
        E: std::fmt::Debug,
    {
        if let Err(err) = x {
            error!("{:?}", err);
        }
    }

    // Stop reconciliation, giving an in-flight run `timeout` to finish
    async fn stop_scheduler(
        handle: JoinHandle<StdResult<(), reconcile::Error>>,
        nfy: Arc<Notify>,
        timeout: Duration,
    ) {
        nfy.notify_one();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Err(err))) => error!("Reconciliation failed on shut-down: {err:?}"),
            Ok(Err(err)) => error!("Failed to shut-down reconciliation: {err:?}"),
            Err(err) => error!("Timed-out shutting-down reconciliation: {err:?}"),
            _ => (),
        }
    }

    let mut sighup = signal(SignalKind::hangup()).context(SignalSnafu { signal: "SIGHUP" })?;
    let mut sigterm =
        signal(SignalKind::terminate()).context(SignalSnafu { signal: "SIGTERM" })?;

    let exporter = init_telemetry()?;
    let instruments = Arc::new(Instruments::new("hotboard"));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut in_memory = InMemoryBackends::default();

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        // Re-build our connections each pass, in case configuration values have changed:
        let storage =
            select_storage(&cfg.storage_config, &opts.storage_credentials, &mut in_memory).await?;
        let sets = select_cache(&cfg.cache_config, clock.clone(), &mut in_memory).await?;

        let state = Arc::new(
            Hotboard::new(
                storage,
                sets,
                clock.clone(),
                &cfg.settings(),
                instruments.clone(),
                exporter.clone(),
            )
            .context(HotboardSnafu)?,
        );

        let scheduler =
            Scheduler::spawn(state.reconciler.clone(), &cfg.reconcile).context(SchedulerSnafu)?;

        let world_nfy = Arc::new(Notify::new());
        let local_nfy = Arc::new(Notify::new());

        let world_server = axum::serve(
            TcpListener::bind(cfg.public_address())
                .await
                .context(BindSnafu {
                    addr: *cfg.public_address(),
                })?,
            make_world_router(state.clone()),
        )
        .with_graceful_shutdown(shutdown_signal(world_nfy.clone()));

        let local_server = axum::serve(
            TcpListener::bind(cfg.private_address())
                .await
                .context(BindSnafu {
                    addr: *cfg.private_address(),
                })?,
            make_local_router(state.clone()),
        )
        .with_graceful_shutdown(shutdown_signal(local_nfy.clone()));

        info!(
            "Listening on {} (public) & {} (private)",
            cfg.public_address(),
            cfg.private_address()
        );

        let (mut scheduler_join_handle, scheduler_shutdown) = scheduler.into_parts();
        let shutdown_timeout = cfg.reconcile.shutdown_timeout;

        let mut world_server = world_server.into_future();
        let mut local_server = local_server.into_future();

        tokio::select! {
            // The servers should never shut down on their own
            res = &mut world_server => {
                error!("The public server exited unexpectedly with {res:?}; shutting-down.");
                local_nfy.notify_one();
                log_on_err(local_server.await);
                stop_scheduler(scheduler_join_handle, scheduler_shutdown, shutdown_timeout).await;
                break;
            },
            res = &mut local_server => {
                error!("The private server exited unexpectedly with {res:?}; shutting-down.");
                world_nfy.notify_one();
                log_on_err(world_server.await);
                stop_scheduler(scheduler_join_handle, scheduler_shutdown, shutdown_timeout).await;
                break;
            },
            _ = sighup.recv() => {
                info!("Received SIGHUP; re-reading configuration & re-connecting.");
                world_nfy.notify_one();
                local_nfy.notify_one();
                log_on_err(world_server.await);
                log_on_err(local_server.await);
                stop_scheduler(scheduler_join_handle, scheduler_shutdown, shutdown_timeout).await;
                // Keep the last known-good configuration if the new one doesn't parse:
                cfg = match parse_config(&opts.cfg) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        error!("{err}; continuing with the prior configuration.");
                        cfg
                    }
                };
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM; terminating.");
                world_nfy.notify_one();
                local_nfy.notify_one();
                log_on_err(world_server.await);
                log_on_err(local_server.await);
                stop_scheduler(scheduler_join_handle, scheduler_shutdown, shutdown_timeout).await;
                break;
            },
            res = &mut scheduler_join_handle => {
                error!("The reconciliation scheduler exited early with {res:?}; shutting-down.");
                world_nfy.notify_one();
                local_nfy.notify_one();
                log_on_err(world_server.await);
                log_on_err(local_server.await);
                break;
            },
        } // End tokio::select!.
    } // End loop.

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Initialize telemetry
///
/// <div class="warning">
///
/// This method must be invoked from inside the Tokio runtime, but before any instruments are
/// created.
///
/// </div>
///
/// Return an exporter that can be used to implement a `/metrics` endpoint.
fn init_telemetry() -> Result<PrometheusExporter> {
    if let Some(name) = check_metric_registrations() {
        return DuplicateMetricSnafu { name }.fail();
    }

    let exporter = PrometheusExporter::new();
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_attribute(KeyValue::new("service.name", "hotboard"))
                .build(),
        )
        .with_reader(exporter.clone())
        .build();
    global::set_meter_provider(provider);

    Ok(exporter)
}

/// Configure logging for real, then serve
async fn go_async(
    opts: CliOpts,
    bootstrap_logging_guard: tracing::dispatcher::DefaultGuard,
) -> Result<()> {
    // Logging has to be configured *before* `serve()` is called, since it's instrumented. Failure
    // to parse at this point is fatal; on a later `SIGHUP` we fall back to the last good
    // configuration instead.
    fn go_async1(
        opts: &CliOpts,
    ) -> Result<(ConfigV1, Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
        let cfg = parse_config(&opts.cfg)?;
        let (formatter, filter) = configure_logging(&opts.log_opts)?;
        Ok((cfg, formatter, filter))
    }

    match go_async1(&opts) {
        Ok((cfg, formatter, filter)) => {
            // Nb. this can only be invoked once
            tracing::subscriber::set_global_default(
                Registry::default().with(formatter).with(filter),
            )
            .context(SubscriberSnafu)?;
            drop(bootstrap_logging_guard);

            info!("hotboard version {} starting.", crate_version!());

            serve(opts, cfg).await
        }
        Err(err) => {
            error!("While configuring logging: {err:?}");
            Err(err)
        }
    }
}

fn main() -> Result<()> {
    // Most configuration is read from file; the command-line options govern where to find it &
    // how to log. Each has an environment variable, for the sake of running in a container.
    let opts = CliOpts::new(
        Command::new("hotboardd")
            .version(crate_version!())
            .author(crate_authors!())
            .about("Hot-score ranking for forum posts")
            .long_about(
                "`hotboardd` ranks forum posts by hot score, caching votes in Redis & \
                 reconciling them into ScyllaDB on a schedule.",
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("HOTBOARD_CONFIG")
                    .help(
                        "path (absolute or relative to the process' current directory) to a \
                         configuration file",
                    ),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("HOTBOARD_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("HOTBOARD_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("HOTBOARD_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("storage-credentials")
                    .short('s')
                    .long("storage-credentials")
                    .num_args(1)
                    .value_parser(value_parser!(Credentials))
                    .env("HOTBOARD_STORAGE_CREDENTIALS")
                    .hide_env_values(true)
                    .help("ScyllaDB credentials, as \"username,password\"")
                    .long_help(
                        "ScyllaDB credentials, as \"username,password\"
Overrides any credentials in the configuration file.",
                    ),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("HOTBOARD_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    )?;

    // Log to stderr until the configuration file has been parsed
    let bootstrap_subscriber = Registry::default()
        .with(fmt::Layer::default().with_writer(io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(opts.log_opts.level.into())
                .from_env()
                .context(EnvFilterSnafu)?,
        );
    let bootstrap_logging_guard = tracing::subscriber::set_default(bootstrap_subscriber);
    debug!("Temporarily logging to stderr while initializing.");

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts, bootstrap_logging_guard))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn configuration() {
        let Configuration::V1(cfg) = toml::from_str::<Configuration>(
            r#"
version = "1"
public-address = "0.0.0.0:8080"
key-prefix = "forum:"
hot-score-epoch = 1700000000
storage-config = "InMemory"
max-page-size = 50

[cache-config.Redis]
url = "redis://cache:6379"
retries = 3

[reconcile]
sync-interval = { secs = 60, nanos = 0 }
prune-interval = { secs = 3600, nanos = 0 }
retention-days = 7
batch-cap = 500
default-lookback = { secs = 60, nanos = 0 }
shutdown-timeout = { secs = 1, nanos = 0 }
"#,
        )
        .unwrap();

        assert_eq!(cfg.public_address().port(), 8080);
        assert_eq!(cfg.private_address().port(), 20780);
        assert!(matches!(cfg.storage_config, StorageConfig::InMemory));
        assert!(matches!(
            cfg.cache_config,
            CacheConfig::Redis {
                retries: Some(3),
                ..
            }
        ));
        let settings = cfg.settings();
        assert_eq!(settings.key_prefix, "forum:");
        assert_eq!(settings.hot_score_epoch, HotScoreEpoch::new(1_700_000_000));
        assert_eq!(settings.max_page_size, 50);
        assert_eq!(settings.reconcile.batch_cap, 500);
        assert_eq!(settings.vote_timeout, Duration::from_secs(5));

        assert!(toml::from_str::<Configuration>("version = \"2\"").is_err());
    }

    #[test]
    fn missing_configuration() {
        assert!(
            parse_config(&Some(PathBuf::from("/no/such/hotboard.toml"))).is_err()
        );
    }
}

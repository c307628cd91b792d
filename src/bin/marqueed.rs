// Copyright (C) 2026 Marquee Developers <devs@marquee.example>
//
// This file is part of marquee.
//
// marquee is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// marquee is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with marquee.  If not,
// see <http://www.gnu.org/licenses/>.

//! # marqueed
//!
//! The marquee server: a movie catalog with user reviews, denormalized rating statistics and a
//! cached read path. Configuration is read from a TOML file; the handful of command-line options
//! govern where to find it & how to log. marqueed runs in the foreground (it is expected to live
//! in a container or under a supervisor) and logs to stdout.

use std::{future::IntoFuture, net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};

use marquee::{
    background_tasks::{self, Context},
    cache::ResponseCache,
    entities::{self, User, UserEmail, Username},
    marquee::{make_router, Marquee},
    memory::Memory,
    metrics::{check_metric_registrations, Instruments},
    notify::LogNotifier,
    ratelimit::FixedWindow,
    storage,
    token::{self, SigningKey},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    application Error type                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

// Nb. `Debug` is implemented by hand: `main()` returns `Result<(), Error>`, and on the `Err`
// variant the Rust runtime prints the error via its `Debug` implementation, which as derived is
// not very readable.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to shut-down background task processing: {source}"))]
    BackgroundShutdown { source: background_tasks::Error },
    #[snafu(display("Failed to setup background task processing: {source}"))]
    BackgroundTasks { source: background_tasks::Error },
    #[snafu(display("Failed to bind to {address}: {source}"))]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Failed to add the bootstrap administrator: {source}"))]
    BootstrapAdmin { source: storage::Error },
    #[snafu(display("Bad bootstrap administrator: {source}"))]
    BootstrapUser { source: entities::Error },
    #[snafu(display("Unable to read configuration file: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Bad signing key: {source}"))]
    Key { source: token::Error },
    #[snafu(display("Failed to serve: {source}"))]
    Serve { source: std::io::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

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
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ThrottleConfig {
    /// Review-submission attempts permitted per user per window
    pub limit: u32,
    #[serde(rename = "window-seconds")]
    pub window_seconds: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            limit: 10,
            window_seconds: 60,
        }
    }
}

/// An administrator to create at startup, so a fresh deployment has someone who can author the
/// catalog
// Nb. we can only deserialize (i.e. not serialize) due to the presence of a secret in the struct
#[derive(Clone, Debug, Deserialize)]
pub struct AdminConfig {
    name: Username,
    email: UserEmail,
    password: SecretString,
}

/// marquee configuration, version one
#[derive(Clone, Debug, Deserialize)]
struct ConfigV1 {
    /// Local address at which to listen; specify as "address:port"
    address: SocketAddr,
    /// The JWT issuer claim; also the namespace for token audiences
    issuer: String,
    /// The JWT signing key; at least 32 bytes
    #[serde(rename = "signing-key")]
    signing_key: SecretString,
    #[serde(rename = "access-token-lifetime-seconds")]
    access_token_lifetime_seconds: i64,
    #[serde(rename = "refresh-token-lifetime-seconds")]
    refresh_token_lifetime_seconds: i64,
    /// TTL on cached movie list/detail payloads; a backstop, since writes invalidate inline
    #[serde(rename = "cache-ttl-seconds")]
    cache_ttl_seconds: u32,
    #[serde(rename = "review-throttle")]
    review_throttle: ThrottleConfig,
    /// Maximum number of pending background tasks
    #[serde(rename = "task-queue-depth")]
    task_queue_depth: usize,
    #[serde(rename = "background-tasks")]
    background_tasks: background_tasks::Config,
    #[serde(rename = "bootstrap-admin")]
    bootstrap_admin: Option<AdminConfig>,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            address: "0.0.0.0:8000".parse::<SocketAddr>().unwrap(/* known good */),
            issuer: "marquee.example".to_owned(),
            // Development only; any real deployment configures its own.
            signing_key: SecretString::from(
                "do-not-deploy-me--generate-a-real-signing-key-first",
            ),
            access_token_lifetime_seconds: 300,
            refresh_token_lifetime_seconds: 60 * 60 * 36,
            cache_ttl_seconds: 300,
            review_throttle: ThrottleConfig::default(),
            task_queue_depth: 64,
            background_tasks: background_tasks::Config::default(),
            bootstrap_admin: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the marquee configuration file
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/marquee.toml").unwrap(), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(cfg) => match cfg {
                Configuration::V1(cfg) => Ok(cfg),
            },
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

/// Configure marquee logging: stdout, structured by default, human-readable with `--plain`
///
/// This method can only be invoked once (as it, in turn, calls tracing's
/// [set_global_default](tracing::subscriber::set_global_default)).
fn configure_logging(logopts: &LogOpts) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(std::io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stdout),
        )
    };

    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Serve marquee API requests until signalled to stop
async fn serve(cfg: ConfigV1) -> Result<()> {
    // Produce a future which can be used to signal graceful shutdown, below.
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sigterm = signal(SignalKind::terminate()).unwrap(/* known good */);
    let mut sigint = signal(SignalKind::interrupt()).unwrap(/* known good */);

    check_metric_registrations();
    let instruments = Arc::new(Instruments::new("marquee"));

    let storage = Memory::new();
    if let Some(admin) = &cfg.bootstrap_admin {
        let user = User::new(&admin.name, &admin.email, &admin.password, true)
            .context(BootstrapUserSnafu)?;
        use marquee::storage::Backend;
        match storage.add_user(&user).await {
            Ok(_) => info!("Created bootstrap administrator {}", admin.email),
            // A restart against the same configuration shouldn't be fatal.
            Err(err) if err.is_conflict() => {
                warn!("Bootstrap administrator {} already exists", admin.email)
            }
            Err(err) => return Err(BootstrapAdminSnafu.into_error(err)),
        }
    }

    let (task_sender, queue) = background_tasks::channel(cfg.task_queue_depth);
    let context = Context {
        notifier: Arc::new(LogNotifier),
    };
    let task_processor = background_tasks::new(
        queue,
        context,
        Some(cfg.background_tasks.clone()),
        instruments.clone(),
    )
    .context(BackgroundTasksSnafu)?;

    let signing_key = SigningKey::new(cfg.signing_key.expose_secret().as_bytes().to_vec())
        .context(KeySnafu)?;

    let state = Arc::new(Marquee {
        issuer: cfg.issuer.clone(),
        storage: Box::new(storage),
        cache: ResponseCache::new(cfg.cache_ttl_seconds),
        signing_key,
        access_token_lifetime: chrono::Duration::seconds(cfg.access_token_lifetime_seconds),
        refresh_token_lifetime: chrono::Duration::seconds(cfg.refresh_token_lifetime_seconds),
        instruments,
        task_sender,
        review_throttle: FixedWindow::new(
            cfg.review_throttle.limit,
            std::time::Duration::from_secs(cfg.review_throttle.window_seconds),
        ),
    });

    let nfy = Arc::new(Notify::new());
    let server = axum::serve(
        TcpListener::bind(&cfg.address).await.context(BindSnafu {
            address: cfg.address,
        })?,
        make_router(state),
    )
    .with_graceful_shutdown(shutdown_signal(nfy.clone()));

    info!("marquee listening on {}", cfg.address);

    let (mut processor_join_handle, processor_shutdown) = task_processor.into_parts();

    let mut server = server.into_future();

    tokio::select! {
        // The server *should* never shut down on its own.
        result = &mut server => { result.context(ServeSnafu)?; }
        _ = sigterm.recv() => {
            info!("Received SIGTERM; terminating.");
            nfy.notify_one();
            if let Err(err) = server.await {
                error!("{:?}", err);
            }
            // Shut-down the background processor, giving in-flight tasks a chance to finish:
            processor_shutdown.notify_one();
            match tokio::time::timeout(std::time::Duration::from_secs(5), processor_join_handle).await {
                Ok(Ok(result)) => result.context(BackgroundShutdownSnafu)?,
                Ok(Err(err)) => error!("Failed to shut-down the task processor: {:?}", err),
                Err(err) => error!("Failed waiting to shut-down the task processor: {:?}", err),
            };
        }
        _ = sigint.recv() => {
            info!("Received SIGINT; terminating.");
            nfy.notify_one();
            if let Err(err) = server.await {
                error!("{:?}", err);
            }
            processor_shutdown.notify_one();
            match tokio::time::timeout(std::time::Duration::from_secs(5), processor_join_handle).await {
                Ok(Ok(result)) => result.context(BackgroundShutdownSnafu)?,
                Ok(Err(err)) => error!("Failed to shut-down the task processor: {:?}", err),
                Err(err) => error!("Failed waiting to shut-down the task processor: {:?}", err),
            };
        }
        res = &mut processor_join_handle => {
            // This shouldn't happen!
            error!("The background task processor exited early with {:?}; shutting-down.", res);
            nfy.notify_one();
            if let Err(err) = server.await {
                error!("{:?}", err);
            }
        }
    };

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn main() -> Result<()> {
    // Most of marqueed's configuration is read from file; the command-line options govern where
    // to find it & how to log. They all have corresponding environment variables for the sake of
    // convenience when running marquee in a container.
    let opts = CliOpts::new(
        Command::new("marqueed")
            .version(crate_version!())
            .author(crate_authors!())
            .about("A movie-catalog web service")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("MARQUEE_CONFIG")
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
                    .env("MARQUEE_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("MARQUEE_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("MARQUEE_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("MARQUEE_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    );

    let cfg = parse_config(&opts.cfg)?;
    configure_logging(&opts.log_opts)?;

    info!("marquee version {} starting.", crate_version!());

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(serve(cfg))
}

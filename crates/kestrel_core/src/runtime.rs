/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Process wiring: store, transports, bus, dispatcher, processor, HTTP server.

use crate::ap::{router, ApState};
use crate::authenticate::RequestAuthenticator;
use crate::bus::AsyncBus;
use crate::client_api::ClientApi;
use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::dispatcher::InboxDispatcher;
use crate::key_resolver::KeyResolver;
use crate::outbound::Delivery;
use crate::processor::Processor;
use crate::streaming::StreamRegistry;
use crate::timeline::TimelineManager;
use crate::transport::{HttpTransportController, TransportController};
use crate::visibility::VisibilityFilter;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

const DB_FILE: &str = "kestrel.db";

/// Handles the embedding code needs once the core is up.
#[derive(Clone)]
pub struct CoreServices {
    pub cfg: Arc<CoreConfig>,
    pub db: FedDb,
    pub client_api: ClientApi,
    pub timelines: Arc<TimelineManager>,
    pub streams: StreamRegistry,
}

pub struct RunningCore {
    pub addr: SocketAddr,
    pub services: CoreServices,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RunningCore {
    /// Signals shutdown and waits for the server and processor to finish.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.join.await.context("join core")
    }
}

pub fn init_logging(cfg: &CoreConfig) {
    let directive = cfg.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive)),
        )
        .try_init()
        .ok();
}

/// Starts the core on `cfg.bind` and returns once the listener is bound.
pub async fn start(cfg: CoreConfig) -> Result<RunningCore> {
    let cfg = Arc::new(cfg);
    let data_dir = cfg.data_dir()?;
    std::fs::create_dir_all(&data_dir).with_context(|| format!("create data dir {}", data_dir.display()))?;
    let db = FedDb::open(data_dir.join(DB_FILE))?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("kestrel/", env!("CARGO_PKG_VERSION")))
        .timeout(cfg.http_timeout())
        .build()
        .context("build http client")?;
    let transports: Arc<dyn TransportController> = Arc::new(HttpTransportController::new(
        http,
        cfg.http_timeout(),
        cfg.max_body_bytes(),
    ));

    let (bus, receivers) = AsyncBus::new(cfg.bus_capacity());
    let authenticator = RequestAuthenticator::new(
        db.clone(),
        cfg.clone(),
        KeyResolver::new(db.clone(), cfg.clone()),
        transports.clone(),
    );
    let delivery = Delivery::new(db.clone(), cfg.clone(), transports.clone());
    let dispatcher = InboxDispatcher::new(
        db.clone(),
        cfg.clone(),
        authenticator,
        transports,
        delivery.clone(),
        bus.clone(),
    );
    let filter = VisibilityFilter::new(db.clone(), cfg.clone());
    let timelines = Arc::new(TimelineManager::new(db.clone(), filter.clone()));
    let streams = StreamRegistry::new();
    let client_api = ClientApi::new(db.clone(), cfg.clone(), bus, filter);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = Processor::new(db.clone(), cfg.clone(), delivery, timelines.clone(), streams.clone());
    let worker = processor.start(shutdown_rx.clone(), receivers);

    let state = ApState {
        cfg: cfg.clone(),
        db: db.clone(),
        dispatcher,
    };
    let app = router(state);

    let addr: SocketAddr = cfg.bind.parse().context("parse bind")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
    let addr = listener.local_addr().context("local addr")?;
    info!(host = %cfg.host, "kestrel listening on http://{addr}");

    let mut server_shutdown = shutdown_rx;
    let join = tokio::spawn(async move {
        let shutdown = async move {
            while !*server_shutdown.borrow() {
                if server_shutdown.changed().await.is_err() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("http server failed: {e:#}");
        }
        let _ = worker.await;
        info!("kestrel stopped");
    });

    Ok(RunningCore {
        addr,
        services: CoreServices {
            cfg,
            db,
            client_api,
            timelines,
            streams,
        },
        shutdown_tx,
        join,
    })
}

/// Runs until ctrl-c.
pub async fn run(cfg: CoreConfig) -> Result<()> {
    init_logging(&cfg);
    let core = start(cfg).await?;
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown requested");
    core.stop().await
}

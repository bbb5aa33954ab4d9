//! vigil-server
//! Mission: Wire the library's independent pieces into one process —
//! agent ingest, dashboard fan-out, the persistence pipeline, the
//! admin HTTP surface, and (optionally) the local host collector and
//! ping probes — behind one `axum::Router`, with coordinated shutdown.

use anyhow::{Context, Result};
use axum::{
    extract::ws::WebSocketUpgrade,
    extract::{Path, Query, State},
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_backend::{
    admin,
    auth::{
        middleware::{auth_middleware, optional_auth_middleware},
        JwtHandler,
    },
    collector::{LocalCollector, ProbeRunner},
    config::Config,
    dashboard::{self, DashboardContext, FanoutMetrics},
    error::AppError,
    history::{HistoryKind, HistoryQuery, HistoryRange, HistoryResponse, HistoryService},
    ingest::{self, IngestContext, IngestMetrics},
    live_state::LiveStateStore,
    middleware::{rate_limit::rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer},
    models::{ServerDescriptor, ServerIdentity},
    persistence::{Aggregator, IntakeQueue, PersistenceMetrics, RetentionSweeper, Writer},
    state::{AdminState, AppState},
};

const CONFIG_PATH_ENV: &str = "VIGIL_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.toml";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const PRESENCE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path).context("loading configuration")?;

    let writer = Arc::new(Writer::open(&config.db_path).context("opening database")?);

    let live = Arc::new(LiveStateStore::new(Duration::from_secs(
        config.presence_window_secs,
    )));
    seed_live_state(&live, &writer, &config)?;

    let intake = Arc::new(IntakeQueue::new(4096));
    let persistence_metrics = Arc::new(PersistenceMetrics::default());
    let ingest_metrics = Arc::new(IngestMetrics::default());
    let fanout_metrics = Arc::new(FanoutMetrics::default());

    let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let history = Arc::new(HistoryService::new(writer.clone()));

    let (site_settings_tx, _site_settings_rx) = watch::channel(config.site_settings.clone());
    let admin_state = Arc::new(AdminState {
        group_dimensions: Arc::new(RwLock::new(config.group_dimensions.clone())),
        ping_targets: RwLock::new(config.ping_targets.clone()),
        site_settings: Arc::new(RwLock::new(config.site_settings.clone())),
        site_settings_tx,
        admin_password_hash: RwLock::new(config.admin_password_hash.clone()),
    });

    let app_state = AppState {
        live: live.clone(),
        writer: writer.clone(),
        intake: intake.clone(),
        history,
        jwt: jwt.clone(),
        admin: admin_state.clone(),
        agent_token: Arc::from(config.agent_token.as_str()),
        allow_anonymous_dashboards: config.allow_anonymous_dashboards,
        persistence_metrics: persistence_metrics.clone(),
        ingest_metrics,
        fanout_metrics,
    };

    let cancel = CancellationToken::new();
    let mut workers = tokio::task::JoinSet::new();

    let aggregator = Arc::new(Aggregator::new(
        intake.clone(),
        writer.clone(),
        persistence_metrics,
    ));
    workers.spawn(aggregator.run(cancel.clone()));

    let retention = Arc::new(RetentionSweeper::new(writer.clone(), RETENTION_SWEEP_INTERVAL));
    workers.spawn(retention.run(cancel.clone()));

    workers.spawn(run_presence_sweep(live.clone(), cancel.clone()));

    workers.spawn(run_local_collector(
        live.clone(),
        intake.clone(),
        admin_state.clone(),
        cancel.clone(),
    ));

    let app = build_router(app_state, jwt);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding listener on {addr}"))?;
    info!(%addr, "vigil backend listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_shutdown_signal().await;
        shutdown_cancel.cancel();
    })
    .await
    .context("server error")?;

    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        while workers.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("background workers did not finish within the shutdown grace period");
    }

    info!("vigil backend shut down cleanly");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_backend=info,vigil_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Loads descriptors persisted from a previous run, then layers any
/// descriptors named directly in the config file on top (config wins
/// on conflict, matching "closed schema with optional sections" — a
/// redeployed config is the operator's latest word on a server's
/// metadata). Unconditionally guarantees the reserved `local` identity
/// has a `LiveEntry` — it always exists per §4.3, independent of
/// whether the local collector has sampled it yet — then applies the
/// `local_node` descriptor if one was configured.
fn seed_live_state(live: &LiveStateStore, writer: &Writer, config: &Config) -> Result<()> {
    for raw in writer.load_descriptors().context("loading descriptors")? {
        match serde_json::from_str::<ServerDescriptor>(&raw) {
            Ok(descriptor) => live.set_descriptor(descriptor),
            Err(err) => warn!(error = %err, "dropping unparseable persisted descriptor"),
        }
    }
    for descriptor in &config.servers {
        live.set_descriptor(descriptor.clone());
    }
    live.ensure_identity(ServerIdentity::local());
    if let Some(local_node) = &config.local_node {
        live.set_descriptor(local_node.clone());
    }
    Ok(())
}

async fn run_presence_sweep(live: Arc<LiveStateStore>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(PRESENCE_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => live.sweep_presence(),
        }
    }
}

/// Samples the local host at a fixed 5s cadence and probes every
/// admin-configured ping target on the same tick, applying both to the
/// Live State Store and the persistence intake exactly like an agent's
/// own push would.
async fn run_local_collector(
    live: Arc<LiveStateStore>,
    intake: Arc<IntakeQueue>,
    admin: Arc<AdminState>,
    cancel: CancellationToken,
) {
    let collector = LocalCollector::new();
    let identity = ServerIdentity::local();
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                let targets = admin.ping_targets.read().clone();
                let mut sample = collector.sample();
                if !targets.is_empty() {
                    let probe = ProbeRunner::new(targets);
                    sample.ping = probe.run_all().await;
                }
                intake.push(identity.clone(), sample.clone());
                live.apply_sample(identity.clone(), sample);
            }
        }
    }
}

fn build_router(app_state: AppState, jwt: Arc<JwtHandler>) -> Router {
    let login_routes = Router::new()
        .route("/api/admin/login", post(admin::login))
        .with_state(app_state.clone());

    let admin_routes = Router::new()
        .route(
            "/api/admin/descriptors",
            get(admin::list_descriptors).put(admin::upsert_descriptor),
        )
        .route("/api/admin/descriptors/:server_id", delete(admin::remove_descriptor))
        .route("/api/admin/group-dimensions", put(admin::set_group_dimensions))
        .route("/api/admin/ping-targets", put(admin::set_ping_targets))
        .route("/api/admin/site-settings", put(admin::set_site_settings))
        .route("/api/admin/reset-credentials", post(admin::reset_credentials))
        .route("/api/admin/verify", get(admin::verify))
        .route_layer(axum_mw::from_fn_with_state(jwt.clone(), auth_middleware))
        .with_state(app_state.clone());

    let history_routes = Router::new()
        .route("/api/history/:identity", get(history_handler))
        .with_state(app_state.clone());

    let ingest_routes = Router::new()
        .route("/ws/ingest", get(ingest_ws_handler))
        .with_state(app_state.clone());

    let dashboard_base = Router::new().route("/ws/dashboard", get(dashboard_ws_handler));
    let dashboard_routes = if app_state.allow_anonymous_dashboards {
        dashboard_base.route_layer(axum_mw::from_fn_with_state(
            jwt.clone(),
            optional_auth_middleware,
        ))
    } else {
        dashboard_base.route_layer(axum_mw::from_fn_with_state(jwt.clone(), auth_middleware))
    }
    .with_state(app_state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .with_state(app_state.clone());

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());

    Router::new()
        .merge(public_routes)
        .merge(login_routes)
        .merge(admin_routes)
        .merge(history_routes)
        .merge(ingest_routes)
        .merge(dashboard_routes)
        .layer(CorsLayer::permissive())
        .layer(axum_mw::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(axum_mw::from_fn(request_logging))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn ingest_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let ctx = IngestContext {
        live: state.live.clone(),
        intake: state.intake.clone(),
        agent_token: state.agent_token.to_string(),
        ping_targets: state.admin.ping_targets.read().clone(),
        metrics: state.ingest_metrics.clone(),
    };
    ws.on_upgrade(move |socket| ingest::handle_socket(socket, ctx))
}

async fn dashboard_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let ctx = DashboardContext {
        live: state.live.clone(),
        group_dimensions: state.admin.group_dimensions.clone(),
        site_settings: state.admin.site_settings.clone(),
        site_settings_changes: state.site_settings_rx(),
        metrics: state.fanout_metrics.clone(),
    };
    ws.on_upgrade(move |socket| dashboard::handle_socket(socket, ctx))
}

#[derive(serde::Deserialize)]
struct HistoryParams {
    range: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

async fn history_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let range = HistoryRange::parse(&params.range)
        .ok_or_else(|| AppError::Malformed(format!("unknown range {:?}", params.range)))?;
    let kind = params
        .kind
        .as_deref()
        .and_then(HistoryKind::parse)
        .unwrap_or_default();
    let query = HistoryQuery {
        identity: ServerIdentity::from(identity),
        range,
        kind,
    };
    let ping_targets = state.admin.ping_targets.read().clone();
    let response = state
        .history
        .query(&query, chrono::Utc::now(), &ping_targets)
        .map_err(|e| AppError::ReadFailure(e.to_string()))?;
    Ok(Json(response))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

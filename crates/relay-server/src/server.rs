use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use relay_core::{Topic, TopicCatalog};
use relay_settings::RelaySettings;
use relay_store::SubscriptionStore;
use relay_telemetry::MetricsRecorder;

use crate::broadcast::{BroadcastEngine, BroadcastError};
use crate::commands::CommandHandler;
use crate::ingest::{self, BatchEnvelope, BatchSender};
use crate::lifecycle::ConnectionLifecycle;
use crate::producer::ClockProducer;
use crate::registry::{self, ConnectionRegistry};
use crate::session::{self, SessionContext};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub reaper_interval: Duration,
    pub dispatch_queue: usize,
    pub topics: TopicCatalog,
    /// Clock source to run alongside the server, if any.
    pub producer: Option<ClockProducer>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9091,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            reaper_interval: Duration::from_secs(60),
            dispatch_queue: 1024,
            topics: TopicCatalog::default(),
            producer: None,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &RelaySettings) -> relay_settings::Result<Self> {
        let topics = settings.topic_catalog()?;
        let producer = if settings.producer.enabled {
            let topic = topics.resolve(&settings.producer.topic).map_err(|e| {
                relay_settings::SettingsError::InvalidValue(format!("producer.topic: {e}"))
            })?;
            Some(ClockProducer::new(
                topic,
                Duration::from_millis(settings.producer.interval_ms),
                settings.producer.records_per_batch,
            ))
        } else {
            None
        };

        let server = &settings.server;
        Ok(Self {
            host: server.host.clone(),
            port: server.port,
            max_send_queue: server.max_send_queue,
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs.max(1)),
            client_timeout: Duration::from_secs(server.client_timeout_secs.max(1)),
            reaper_interval: Duration::from_secs(server.reaper_interval_secs.max(1)),
            dispatch_queue: server.dispatch_queue,
            topics,
            producer,
        })
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub engine: Arc<BroadcastEngine>,
    pub store: Arc<dyn SubscriptionStore>,
    pub catalog: TopicCatalog,
    pub metrics: Arc<MetricsRecorder>,
    pub session: SessionContext,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the core components around one store and one registry.
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn SubscriptionStore>,
        metrics: Arc<MetricsRecorder>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.max_send_queue,
            config.client_timeout,
        ));
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            Arc::clone(&store),
            Arc::clone(&metrics),
        ));
        let commands = Arc::new(CommandHandler::new(
            Arc::clone(&store),
            registry.clone(),
            config.topics.clone(),
            Arc::clone(&metrics),
        ));
        let engine = Arc::new(BroadcastEngine::new(
            Arc::clone(&store),
            registry.clone(),
            Arc::clone(&metrics),
        ));

        let session = SessionContext {
            registry: Arc::clone(&registry),
            lifecycle,
            commands,
            heartbeat_interval: config.heartbeat_interval,
            shutdown,
        };

        Self {
            registry,
            engine,
            store,
            catalog: config.topics.clone(),
            metrics,
            session,
            started_at: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/batches", post(ingest_handler))
        .route("/topics/{topic}/subscribers", get(subscribers_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn SubscriptionStore>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let state = AppState::new(&config, store, metrics, shutdown.clone());

    let mut tasks = Vec::new();

    tasks.push(registry::start_reaper(
        Arc::clone(&state.registry),
        config.reaper_interval,
        shutdown.clone(),
    ));

    let (batches, batch_rx) = ingest::batch_channel(config.dispatch_queue);
    tasks.push(ingest::spawn_dispatcher(
        batch_rx,
        Arc::clone(&state.engine),
        shutdown.clone(),
    ));

    if let Some(producer) = config.producer.clone() {
        tasks.push(producer.spawn(batches.clone(), shutdown.clone()));
    }

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, topics = config.topics.len(), "relay server started");

    let server_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    }));

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        batches,
        tasks,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    batches: BatchSender,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Queue for batches produced inside the process.
    pub fn batch_sender(&self) -> BatchSender {
        self.batches.clone()
    }

    /// Stop accepting work, close sessions and wait for background tasks.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        tracing::info!(task_count = self.tasks.len(), "waiting for tasks to complete");
        let drain = futures::future::join_all(self.tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let ctx = state.session.clone();
    ws.on_upgrade(move |socket| session::run_session(socket, ctx))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let topics: Vec<&str> = state.catalog.topics().iter().map(Topic::as_str).collect();
    Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
        "topics": topics,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// Stream-source entry point. A 503 asks the upstream to redeliver.
async fn ingest_handler(
    State(state): State<AppState>,
    payload: Result<Json<BatchEnvelope>, JsonRejection>,
) -> Response {
    let Json(envelope) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let batch = match envelope.decode(&state.catalog) {
        Ok(batch) => batch,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.engine.broadcast(&batch).await {
        Ok(report) => (StatusCode::OK, Json(report.summary())).into_response(),
        Err(e @ BroadcastError::Resolve { .. }) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn subscribers_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Response {
    let topic = match state.catalog.resolve(&topic) {
        Ok(topic) => topic,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
    };

    match state.store.list_by_topic(&topic).await {
        Ok(mut connection_ids) => {
            connection_ids.sort();
            Json(serde_json::json!({
                "topic": topic,
                "connection_ids": connection_ids,
            }))
            .into_response()
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::StreamRecord;
    use relay_core::ConnectionId;
    use relay_store::{FaultyStore, MemorySubscriptionStore, StoreOp};

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    async fn start_with(store: Arc<dyn SubscriptionStore>) -> (ServerHandle, String) {
        let handle = start(test_config(), store, Arc::new(MetricsRecorder::new()))
            .await
            .unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        (handle, base)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (handle, base) = start_with(Arc::new(MemorySubscriptionStore::new())).await;
        assert!(handle.port > 0);

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["topics"], serde_json::json!(["time", "location"]));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ingest_reports_fanout_summary() {
        let store = Arc::new(MemorySubscriptionStore::new());
        // A subscriber with no live connection behind it.
        let stale = ConnectionId::new();
        store.put(&stale, &Topic::new("time")).await.unwrap();
        let (handle, base) = start_with(store.clone()).await;

        let envelope = BatchEnvelope {
            topic: "time".into(),
            records: vec![StreamRecord::from_text("r1")],
        };
        let resp = reqwest::Client::new()
            .post(format!("{base}/batches"))
            .json(&envelope)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["targets"], 1);
        assert_eq!(body["gone"], 1);
        assert_eq!(body["pruned"], 1);
        assert!(store.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ingest_rejects_bad_batches() {
        let (handle, base) = start_with(Arc::new(MemorySubscriptionStore::new())).await;
        let client = reqwest::Client::new();

        let unknown = client
            .post(format!("{base}/batches"))
            .json(&serde_json::json!({"topic": "weather", "records": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 400);

        let bad_record = client
            .post(format!("{base}/batches"))
            .json(&serde_json::json!({"topic": "time", "records": [{"data": "***"}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_record.status(), 400);
        let body: serde_json::Value = bad_record.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("record 0"));

        let not_json = client
            .post(format!("{base}/batches"))
            .header("content-type", "application/json")
            .body("{")
            .send()
            .await
            .unwrap();
        assert_eq!(not_json.status(), 400);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ingest_resolve_failure_is_503() {
        let store = Arc::new(FaultyStore::new());
        store.fail(StoreOp::ListByTopic);
        let (handle, base) = start_with(store).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/batches"))
            .json(&serde_json::json!({"topic": "time", "records": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn subscribers_endpoint() {
        let store = Arc::new(MemorySubscriptionStore::new());
        let c1 = ConnectionId::from_raw("conn_a");
        store.put(&c1, &Topic::new("location")).await.unwrap();
        let (handle, base) = start_with(store).await;

        let body: serde_json::Value = reqwest::get(format!("{base}/topics/location/subscribers"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["topic"], "location");
        assert_eq!(body["connection_ids"], serde_json::json!(["conn_a"]));

        let missing = reqwest::get(format!("{base}/topics/weather/subscribers"))
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_endpoint_lists_samples() {
        let metrics = Arc::new(MetricsRecorder::new());
        metrics.counter_inc("relay_batches_total", &[("status", "delivered")], 2);
        let handle = start(
            test_config(),
            Arc::new(MemorySubscriptionStore::new()),
            metrics,
        )
        .await
        .unwrap();

        let body: serde_json::Value =
            reqwest::get(format!("http://127.0.0.1:{}/metrics", handle.port))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(body[0]["name"], "relay_batches_total");
        assert_eq!(body[0]["value"], 2.0);

        handle.shutdown().await;
    }

    #[test]
    fn config_from_settings() {
        let mut settings = RelaySettings::default();
        settings.server.port = 7000;
        settings.producer.enabled = true;
        settings.producer.interval_ms = 250;
        settings.producer.records_per_batch = 4;

        let config = ServerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.topics, TopicCatalog::default());
        let producer = config.producer.unwrap();
        assert_eq!(producer.topic, Topic::new("time"));
        assert_eq!(producer.interval, Duration::from_millis(250));
        assert_eq!(producer.records_per_batch, 4);
    }

    #[test]
    fn config_rejects_bad_topics() {
        let mut settings = RelaySettings::default();
        settings.topics = vec!["time".into(), "time".into()];
        assert!(ServerConfig::from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let state = AppState::new(
            &ServerConfig::default(),
            Arc::new(MemorySubscriptionStore::new()),
            Arc::new(MetricsRecorder::new()),
            CancellationToken::new(),
        );
        let _router = build_router(state);
    }
}

use crate::{
    class_mapper::ClassMapper,
    config::{Config, StreamConfig},
    inference_service::{InferenceService, ModelUnavailable},
    model_service::ModelService,
    ort_service::OrtModelService,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    signal,
    sync::{
        broadcast::{self, Receiver},
        mpsc,
    },
    task::JoinHandle,
};

const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SharedState<M: ModelService> {
    pub model: Result<InferenceService<M>, ModelUnavailable>,
    pub class_mapper: Arc<ClassMapper>,
    pub metrics: Arc<Metrics>,
    pub stream_config: StreamConfig,
    pub shutdown_tx: broadcast::Sender<()>,
    /// Held by every running session; the receiver sees the channel close
    /// once the last one is gone.
    pub session_guard: mpsc::Sender<()>,
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            class_mapper: self.class_mapper.clone(),
            metrics: self.metrics.clone(),
            stream_config: self.stream_config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            session_guard: self.session_guard.clone(),
        }
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(state: SharedState<M>, addr: &str) -> anyhow::Result<Self> {
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = Router::new()
            .merge(api_routes())
            .with_state(state)
            .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> JoinHandle<anyhow::Result<()>> {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Starting app on {}", addr),
            Err(e) => tracing::warn!("Starting app on unknown address: {}", e),
        }

        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        })
    }
}

/// Loads the model once for the whole process. A failure is kept so that
/// every session can report it to its client.
pub fn load_model(
    config: &Config,
) -> Result<InferenceService<OrtModelService>, ModelUnavailable> {
    match OrtModelService::new(&config.model) {
        Ok(model_service) => {
            let max_concurrency = model_service.num_instances();
            Ok(InferenceService::new(model_service, max_concurrency))
        }
        Err(e) => {
            tracing::error!("Failed to load detection model: {}", e);
            Err(ModelUnavailable::new(e))
        }
    }
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let class_mapper = ClassMapper::from_config(&config.labels)?;
    tracing::info!("Loaded {} class labels", class_mapper.labels().len());

    let metrics = Arc::new(Metrics::new()?);
    let model = load_model(&config);

    let (shutdown_tx, _) = broadcast::channel(1);
    let (session_guard, sessions_done) = mpsc::channel(1);
    let state = SharedState {
        model,
        class_mapper: Arc::new(class_mapper),
        metrics,
        stream_config: config.stream.clone(),
        shutdown_tx: shutdown_tx.clone(),
        session_guard,
    };

    let addr = config.server.get_address();
    let server = HttpServer::new(state, &addr).await?;
    let server_handle = server.run(shutdown_tx.subscribe());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;
    drain_sessions(sessions_done, SESSION_DRAIN_TIMEOUT).await;

    Ok(())
}

/// Waits for upgraded stream sessions, which the HTTP graceful shutdown does
/// not track, to send their close frames.
async fn drain_sessions(mut sessions_done: mpsc::Receiver<()>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, sessions_done.recv()).await {
        Ok(_) => {
            tracing::info!("All stream sessions closed");
            true
        }
        Err(_) => {
            tracing::warn!("Stream sessions still open after {:?}", limit);
            false
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

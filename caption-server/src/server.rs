use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{caption, gemini::CaptionGenerator, prompt::PromptTemplate};

/// Process-wide configuration shared by all requests. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    generator: Arc<dyn CaptionGenerator>,
    prompt_template: PromptTemplate,
    upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn CaptionGenerator>,
        prompt_template: PromptTemplate,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            generator,
            prompt_template,
            upload_dir: Arc::new(upload_dir.into()),
        }
    }

    pub fn generator(&self) -> &dyn CaptionGenerator {
        self.generator.as_ref()
    }

    pub fn prompt_template(&self) -> &PromptTemplate {
        &self.prompt_template
    }

    pub fn upload_dir(&self) -> &Path {
        self.upload_dir.as_path()
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate_caption", post(caption::generate_caption))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(
    http_addr: SocketAddr,
    state: AppState,
    max_upload_bytes: usize,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(state.upload_dir()).await?;
    info!("Staging uploads in {}", state.upload_dir().display());

    let app = router(state, max_upload_bytes);
    let listener = TcpListener::bind(&http_addr).await?;
    info!("HTTP server started on port {}", http_addr.port());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn health() -> &'static str {
    "Ok"
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}

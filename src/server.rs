use crate::adapters::{DisabledScriptStore, TempScriptStore};
use crate::core::file_loader::parse_uploaded_file;
use crate::core::preview::build_preview;
use crate::core::script_builder::{build_etl_script, ScriptRenderer};
use crate::core::{ConfigProvider, EtlConfig, Preview, ScriptStore};
use crate::utils::error::{EtlError, Result};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub renderer: Arc<ScriptRenderer>,
    pub store: Arc<dyn ScriptStore>,
    pub preview_rows: usize,
}

impl AppState {
    pub fn new(renderer: ScriptRenderer, store: Arc<dyn ScriptStore>, preview_rows: usize) -> Self {
        Self {
            renderer: Arc::new(renderer),
            store,
            preview_rows,
        }
    }

    /// Builds the renderer and script store. Fails when the script template
    /// cannot be loaded, so a misconfigured server never starts.
    pub fn from_config<C: ConfigProvider + ?Sized>(config: &C) -> Result<Self> {
        let renderer = ScriptRenderer::new(
            config.templates_dir(),
            config.script_template(),
            config.undefined_policy(),
        );
        renderer.check()?;

        let store: Arc<dyn ScriptStore> = if config.persist_scripts() {
            Arc::new(TempScriptStore::new(
                config.script_output_dir(),
                config.script_retention(),
            ))
        } else {
            Arc::new(DisabledScriptStore)
        };

        Ok(Self::new(renderer, store, config.preview_rows()))
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateScriptResponse {
    pub success: bool,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl IntoResponse for EtlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(
                "❌ Request failed: {} (Category: {:?})",
                self,
                self.category()
            );
        } else {
            tracing::warn!("⚠️ Request rejected: {}", self);
        }

        let body = serde_json::json!({ "detail": self.user_friendly_message() });
        (status, Json(body)).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn multipart_error(err: MultipartError) -> EtlError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        EtlError::PayloadTooLarge {
            message: err.body_text(),
        }
    } else {
        EtlError::parse(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Reads the whole `file` field; other fields are skipped.
async fn read_upload(multipart: &mut Multipart) -> Result<(String, Bytes)> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok((filename, bytes));
    }

    Err(EtlError::MissingUpload {
        field: UPLOAD_FIELD.to_string(),
    })
}

async fn preview_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Preview>> {
    let (filename, bytes) = read_upload(&mut multipart).await?;
    tracing::info!("📥 Preview requested for '{}' ({} bytes)", filename, bytes.len());

    let sample_rows = state.preview_rows;
    let preview = tokio::task::spawn_blocking(move || {
        parse_uploaded_file(&filename, &bytes).map(|data| build_preview(&data, sample_rows))
    })
    .await
    .map_err(|e| EtlError::Internal {
        message: format!("parser task failed: {}", e),
    })??;

    Ok(Json(preview))
}

async fn generate_script(
    State(state): State<AppState>,
    Json(config): Json<EtlConfig>,
) -> Result<Json<GenerateScriptResponse>> {
    let script = build_etl_script(&state.renderer, state.store.as_ref(), &config).await?;
    tracing::info!("🛠️ Generated script ({} bytes)", script.code.len());

    Ok(Json(GenerateScriptResponse {
        success: true,
        code: script.code,
        path: script.path.map(|p| p.display().to_string()),
    }))
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|e| EtlError::InvalidConfigValueError {
                field: "cors.allowed_origins".to_string(),
                value: origin.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    // Credentials rule out wildcards, so methods and headers are mirrored
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

/// Create the HTTP router with all routes.
pub fn create_router<C: ConfigProvider + ?Sized>(state: AppState, config: &C) -> Result<Router> {
    let body_limit = match config.max_upload_bytes() {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Ok(Router::new()
        .route("/health", get(health))
        .route("/file/preview", post(preview_file))
        .route("/generate/script", post(generate_script))
        .layer(body_limit)
        .layer(cors_layer(config.allowed_origins())?)
        .with_state(state))
}

/// Periodically deletes expired scripts. The first sweep runs immediately.
pub fn spawn_sweeper(store: Arc<dyn ScriptStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = store.sweep().await {
                tracing::warn!("🧹 Script sweep failed: {}", e);
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("🛑 Shutdown signal received");
}

/// Start the HTTP server and run until a shutdown signal arrives.
pub async fn start_server<C: ConfigProvider + ?Sized>(config: &C) -> anyhow::Result<()> {
    let state = AppState::from_config(config).with_context(|| {
        format!(
            "failed to load script template '{}' from {}",
            config.script_template(),
            config.templates_dir().display()
        )
    })?;
    let app = create_router(state.clone(), config)?;

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let sweeper = config
        .persist_scripts()
        .then(|| spawn_sweeper(state.store.clone(), config.sweep_interval()));

    tracing::info!("🚀 HTTP server running on http://{}", addr);
    tracing::info!("📄 Preview:  POST http://{}/file/preview", addr);
    tracing::info!("🛠️ Generate: POST http://{}/generate/script", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    match state.store.sweep().await {
        Ok(removed) => tracing::debug!("Final sweep removed {} scripts", removed),
        Err(e) => tracing::warn!("🧹 Final script sweep failed: {}", e),
    }

    tracing::info!("👋 Server stopped");
    Ok(())
}

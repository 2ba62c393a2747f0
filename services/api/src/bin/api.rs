//! services/api/src/bin/api.rs
//!
//! The HTTP server. Exits with 1 on configuration errors and 2 when a dependency
//! (database, content, network) fails at startup or while serving.

use api_lib::{
    achievements,
    adapters::{load_content, DbAdapter, OllamaAdapter, PiperTtsAdapter},
    config::Config,
    error::ApiError,
    telemetry::init_tracing,
    web::{
        self,
        state::{AppState, Repositories},
    },
};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    init_tracing(&config.log_filter, config.log_format);
    info!("Configuration loaded. Starting server...");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_configuration() => {
            error!("Startup failed: {}", e);
            ExitCode::from(1)
        }
        Err(e) => {
            error!("Server failed: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(config: Arc<Config>) -> Result<(), ApiError> {
    // --- 2. Load Authored Content ---
    info!("Loading content from {}...", config.content_path.display());
    let content = Arc::new(load_content(&config.content_path)?);

    // --- 3. Connect to Database & Run Migrations ---
    let repositories = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Repositories::postgres(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; progress is kept in memory only.");
            Repositories::in_memory()
        }
    };

    // --- 4. Initialize Service Adapters ---
    let llm = Arc::new(
        OllamaAdapter::new(config.ollama_base_url.clone(), config.ollama_model.clone())
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    );
    let tts = Arc::new(
        PiperTtsAdapter::new(
            config.piper_base_url.clone(),
            config.tts_default_voice.clone(),
            config.tts_probe_ttl,
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?,
    );

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        config.clone(),
        content,
        llm,
        tts,
        repositories,
    )?);

    // --- 6. Start Background Tasks ---
    let shutdown = CancellationToken::new();
    let watcher = achievements::spawn_watcher(&app_state.progress, shutdown.clone());

    // --- 7. Create the Web Router ---
    let app = with_docs(web::router(app_state)?);

    // --- 8. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = watcher.await {
        warn!("Achievement watcher ended abnormally: {}", e);
    }
    info!("Server stopped.");
    Ok(())
}

#[cfg(feature = "swagger-ui")]
fn with_docs(app: Router) -> Router {
    use api_lib::web::rest::ApiDoc;
    use utoipa::OpenApi;
    use utoipa_swagger_ui::SwaggerUi;

    info!("Swagger UI available at /swagger-ui");
    app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(not(feature = "swagger-ui"))]
fn with_docs(app: Router) -> Router {
    app
}

/// Resolves on Ctrl-C or SIGTERM and cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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
    info!("Shutdown signal received.");
    shutdown.cancel();
}

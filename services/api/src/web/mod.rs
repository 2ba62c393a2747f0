//! services/api/src/web/mod.rs
//!
//! The axum web layer. `router` assembles every route on top of a shared `AppState`.

pub mod middleware;
pub mod practice;
pub mod rest;
pub mod reviews;
pub mod scenarios;
pub mod speech;
pub mod state;
pub mod stats;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
pub use middleware::require_auth;
use state::AppState;

/// Builds the complete application router.
pub fn router(app_state: Arc<AppState>) -> Result<Router, ApiError> {
    let cors = cors_layer(app_state.config.cors_origin.as_deref())?;

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/tts/health", get(speech::tts_health_handler));

    // Protected routes (the proxy's user id is required)
    let protected_routes = Router::new()
        .route("/scenarios", get(scenarios::list_scenarios_handler))
        .route("/scenarios/{scenario_id}/start", post(scenarios::start_scenario_handler))
        .route("/scenarios/state/{state_id}", get(scenarios::get_state_handler))
        .route("/scenarios/state/{state_id}/turn", post(scenarios::turn_handler))
        .route(
            "/scenarios/state/{state_id}/turn/stream",
            post(scenarios::turn_stream_handler),
        )
        .route("/scenarios/state/{state_id}/abandon", post(scenarios::abandon_handler))
        .route("/scenarios/state/{state_id}/complete", post(scenarios::complete_handler))
        .route("/reviews/due", get(reviews::due_reviews_handler))
        .route("/reviews/{card_id}/grade", post(reviews::grade_review_handler))
        .route("/reviews/{card_id}", delete(reviews::delete_review_handler))
        .route("/vocab/{set_id}/enroll", post(practice::enroll_vocab_handler))
        .route("/quizzes/{quiz_id}/submit", post(practice::submit_quiz_handler))
        .route("/grammar/check", post(practice::grammar_check_handler))
        .route("/stats", get(stats::stats_handler))
        .route("/tts", post(speech::tts_handler))
        .route("/chapters", get(rest::list_chapters_handler))
        .route("/chapters/{chapter_id}", get(rest::get_chapter_handler))
        .layer(axum_middleware::from_fn(require_auth));

    Ok(Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state))
}

fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, ApiError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(middleware::USER_ID_HEADER),
        ]);
    match origin {
        Some(origin) => {
            let origin = origin.parse::<HeaderValue>().map_err(|e| {
                ApiError::Internal(format!("CORS_ORIGIN '{origin}' is not a header value: {e}"))
            })?;
            Ok(layer.allow_origin(origin))
        }
        None => Ok(layer.allow_origin(Any)),
    }
}

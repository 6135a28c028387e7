use super::{AppState, handlers};
use axum::{
    Router,
    routing::{IntoMakeService, get},
};
use std::path::Path;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

/// Routes under `/api`, relative to that prefix.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/phd2/state", get(handlers::get_state))
        .route("/phd2/stop", get(handlers::stop_guiding))
        .route("/phd2/set_exposure", get(handlers::set_exposure))
        .route("/phd2/starimage", get(handlers::star_image))
        .route("/phd2/save-image", get(handlers::save_image))
        .fallback(handlers::not_found)
        .with_state(state)
}

pub fn router(state: AppState, app_dir: Option<&Path>) -> Router {
    let mut router = Router::new().nest("/api", api_router(state));

    // Client-side routes of the web app all resolve to its index page on reload.
    if let Some(dir) = app_dir {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    router
        // Browsers on other origins (the mobile app's dev server, ...) must pass preflight
        .layer(CorsLayer::permissive())
        // Add tracing for HTTP requests and responses
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
}

pub fn create_app(state: AppState, app_dir: Option<&Path>) -> IntoMakeService<Router> {
    router(state, app_dir).into_make_service()
}

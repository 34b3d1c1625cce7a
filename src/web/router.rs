//! Web application router and middleware setup.

use crate::web::config::WebConfig;
use crate::web::handlers::{self, AppState};
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the axum application with all routes and middleware.
pub fn create_app(config: &WebConfig, service: AppState) -> Router {
    let mut app = Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/temps", get(handlers::get_temps))
        .route("/api/control/sensors", get(handlers::get_control_sensors))
        .route("/api/status", get(handlers::get_status))
        .route("/api/watchdog", get(handlers::get_watchdog))
        .route(
            "/api/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )
        .route(
            "/api/control_enable",
            axum::routing::post(handlers::set_control_enable),
        )
        .route("/api/light", get(handlers::get_light).post(handlers::set_light))
        .route(
            "/api/offsets",
            get(handlers::get_offsets).post(handlers::set_offset),
        )
        .route("/api/history", get(handlers::get_history))
        .with_state(service);

    let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());

    if config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(service_builder)
}

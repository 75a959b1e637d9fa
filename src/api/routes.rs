// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        // Sync control (admin secret required)
        .service(
            web::scope("/api/v1/sync")
                .route("/import", web::post().to(handlers::start_import))
                .route("/import/stop", web::post().to(handlers::stop_import))
                .route("/tags", web::post().to(handlers::start_tag_sync))
                .route("/tags/stop", web::post().to(handlers::stop_tag_sync))
                .route("/pulse", web::post().to(handlers::start_pulse))
                .route("/pulse/stop", web::post().to(handlers::stop_pulse))
                .route("/sweep", web::post().to(handlers::run_sweep))
                .route("/status", web::get().to(handlers::sync_status)),
        );
}

//! Ambient HTTP surface: `/live` and `/metrics`, the same small surface the
//! teacher exposes next to its config-rendering routes (`/live`, `/reload`,
//! `/metrics`) — minus `/reload`, which has no equivalent here.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use xitca_web::handler::handler_service;
use xitca_web::handler::state::StateRef;
use xitca_web::middleware::tower_http_compat::TowerHttpCompat;
use xitca_web::route::get;
use xitca_web::App;

#[derive(Clone)]
pub struct HttpState {
    pub metrics_handle: PrometheusHandle,
}

async fn live() -> &'static str {
    "OK"
}

async fn metrics_handler(StateRef(state): StateRef<'_, HttpState>) -> String {
    state.metrics_handle.render()
}

/// Builds and runs the ambient HTTP server, blocking the calling thread.
/// Spawn it on a dedicated OS thread so it doesn't compete with the tokio
/// runtime driving discovery/job-server/scheduler work.
pub fn serve(state: HttpState, bind_addr: &str) -> std::io::Result<()> {
    App::new()
        .with_state(Arc::new(state))
        .at("/live", get(handler_service(live)))
        .at("/metrics", get(handler_service(metrics_handler)))
        .enclosed(TowerHttpCompat::new(TraceLayer::new_for_http()))
        .serve()
        .bind(bind_addr)?
        .run()
        .wait()
}

/// Spawns [`serve`] on a dedicated OS thread.
pub fn spawn(state: HttpState, bind_addr: String) -> std::thread::JoinHandle<std::io::Result<()>> {
    std::thread::spawn(move || serve(state, &bind_addr))
}

//! `api` crate: HTTP control surface over a running [`FlowQueue`].
//!
//! Exposes (all `GET`):
//!   /queue                  every flow with its live status, as JSON
//!   /describe?name=<name>   one flow or node, as JSON
//!   /stop?name=<flow>
//!   /restart?name=<flow>
//!   /reload?name=<flow>
//!   /trigger?name=<flow or node ID>
//!   /remove?name=<flow>
//!   /stopall
//!
//! Control routes answer `Done`, or the error text with a non-2xx status.

mod handlers;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use queue::FlowQueue;

pub use handlers::AppState;

/// Build the control router over `queue`.
pub fn router(queue: Arc<FlowQueue>) -> Router {
    Router::new()
        .route("/queue", get(handlers::flows::list))
        .route("/describe", get(handlers::flows::describe))
        .route("/stop", get(handlers::control::stop))
        .route("/restart", get(handlers::control::restart))
        .route("/reload", get(handlers::control::reload))
        .route("/trigger", get(handlers::control::trigger))
        .route("/remove", get(handlers::control::remove))
        .route("/stopall", get(handlers::control::stop_all))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { queue })
}

/// Serve the control surface on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, queue: Arc<FlowQueue>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("control surface listener has no local address")?;
    info!(%addr, "control surface listening");

    axum::serve(listener, router(queue))
        .with_graceful_shutdown(shutdown)
        .await
        .context("control surface failed")
}

//! Admin HTTP API.
//!
//! # Routes
//! ```text
//! GET    /admin/status                               reload status and version
//! POST   /admin/reload                               run a reload check now
//! GET    /admin/bindings                             live bindings with provenance
//! GET    /admin/address-settings/resolve/{address}   effective settings
//! GET    /admin/address-settings/patterns/{pattern}  registered fragment
//! PUT    /admin/address-settings/patterns/{pattern}  register fragment (JSON body)
//! DELETE /admin/address-settings/patterns/{pattern}  remove management fragment
//! GET    /admin/security/resolve/{address}           effective roles
//! PUT    /admin/security/patterns/{pattern}          register roles (JSON array)
//! DELETE /admin/security/patterns/{pattern}          remove management roles
//! POST   /admin/diverts                              create a divert (JSON body)
//! DELETE /admin/diverts/{name}                       destroy a divert
//! ```
//!
//! Every route requires `Authorization: Bearer <api_key>`. Patterns
//! containing `#` must be percent-encoded (`%23`).

pub mod auth;
pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::broker::Broker;

#[derive(Clone)]
pub struct AdminState {
    pub broker: Arc<Broker>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(broker: Arc<Broker>, api_key: &str) -> Self {
        Self {
            broker,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/reload", post(post_reload))
        .route("/admin/bindings", get(get_bindings))
        .route(
            "/admin/address-settings/resolve/{address}",
            get(get_resolved_settings),
        )
        .route(
            "/admin/address-settings/patterns/{pattern}",
            get(get_settings_fragment)
                .put(put_settings_fragment)
                .delete(delete_settings_fragment),
        )
        .route("/admin/security/resolve/{address}", get(get_resolved_roles))
        .route(
            "/admin/security/patterns/{pattern}",
            axum::routing::put(put_security_roles).delete(delete_security_roles),
        )
        .route("/admin/diverts", post(post_divert))
        .route("/admin/diverts/{name}", axum::routing::delete(delete_divert))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

//! HTTP surface of the key-value service.
//!
//! Routes map one to one onto [`KeyValueService`] and [`UserDirectory`]
//! calls; all blocking work runs on tokio's blocking pool.

mod error;
pub mod handlers;
mod middleware;

use crate::auth::{TokenAuthenticator, TokenIssuer, UserDirectory};
use crate::service::KeyValueService;
use axum::{
    routing::{get, post},
    Router,
};
use kvs::RecordStore;
use log::info;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<KeyValueService>,
    pub users: Arc<UserDirectory>,
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    /// Wire the service, the user directory and the token gate together
    pub fn new(
        records: Arc<dyn RecordStore>,
        users: Arc<dyn RecordStore>,
        tokens: TokenIssuer,
    ) -> Self {
        let tokens = Arc::new(tokens);
        let users = Arc::new(UserDirectory::new(users));
        let gate = Arc::new(TokenAuthenticator::new(tokens.clone(), users.clone()));

        Self {
            service: Arc::new(KeyValueService::new(records, gate)),
            users,
            tokens,
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/register", post(handlers::handle_register))
        .route("/api/auth/token", post(handlers::handle_token))
        .route("/api/auth/token/refresh", post(handlers::handle_refresh))
        .route("/api/kv", get(handlers::handle_list))
        .route(
            "/api/kv/:key",
            get(handlers::handle_retrieve).put(handlers::handle_upsert),
        )
        .route("/health", get(handlers::handle_health))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}

/// Serve `state` on `addr` until ctrl-c
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
}

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use daytrader_core::{EventBus, SharedOverrides};
use daytrader_data::{StrategyRepository, TradeStore};
use daytrader_engine::AdmissionPipeline;

use crate::{handlers, webhook, websocket};

/// Shared state behind every route.
#[derive(Clone)]
pub struct ApiState {
    pub store: TradeStore,
    pub strategies: StrategyRepository,
    pub pipeline: Arc<AdmissionPipeline>,
    pub bus: EventBus,
    pub overrides: SharedOverrides,
}

pub struct ApiServer {
    state: ApiState,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: ApiState) -> Self {
        Self { state }
    }

    /// Builds the router with all API routes.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/webhook", post(webhook::receive_webhook))
            .route("/ws", get(websocket::websocket_handler))
            .route("/health", get(handlers::health))
            .route("/api/trades", get(handlers::list_trades))
            .route("/api/trades/close", post(handlers::manual_close))
            .route("/api/trades/:trade_id", get(handlers::get_trade))
            .route("/api/trades/:trade_id/retake", post(handlers::retake_trade))
            .route("/api/trades/:trade_id/events", get(handlers::trade_events))
            .route(
                "/api/trades/:trade_id/snapshots",
                get(handlers::trade_snapshots),
            )
            .route("/api/alerts", get(handlers::list_alerts))
            .route("/api/summary/:date", get(handlers::daily_summary))
            .route("/api/strategies", get(handlers::list_strategies))
            .route("/api/strategies/enable", post(handlers::enable_strategy))
            .route("/api/strategies/disable", post(handlers::disable_strategy))
            .route("/api/overrides", get(handlers::get_overrides))
            .route("/api/overrides", put(handlers::set_overrides))
            .route("/api/favorites", get(handlers::list_favorites))
            .route("/api/favorites", post(handlers::create_favorite))
            .route("/api/favorites/:id", delete(handlers::delete_favorite))
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind or serve.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("API listening on {}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

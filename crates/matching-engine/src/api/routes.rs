//! HTTP routes for the Matching Engine API

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::*;

/// Create the admin router
///
/// Routes:
/// - POST /api/v1/bets                               - Place (and match) a bet
/// - GET  /api/v1/bets/:bet_id                       - Bet with matches and refunds
/// - POST /api/v1/bets/:bet_id/match                 - Attempt a match
/// - POST /api/v1/bets/:bet_id/cancel                - Cancel and refund
/// - GET  /api/v1/bets/:bet_id/candidates            - Opposing candidates, FIFO
/// - PUT  /api/v1/bets/:bet_id/spread                - Record the live spread
/// - POST /api/v1/events/:event_id/cancel-pending    - Cancel every open bet
/// - POST /api/v1/events/:event_id/lock              - Suspend matching
/// - POST /api/v1/events/:event_id/unlock            - Resume matching
/// - GET  /api/v1/events/:event_id/drifted           - Bets past the drift threshold
/// - GET  /api/v1/monitor/snapshot                   - Latest monitor snapshot
/// - GET  /api/v1/monitor/events/:event_id/queue     - Scored queue
/// - POST /api/v1/monitor/alerts                     - Report an upstream alert
/// - GET  /api/v1/matching/health                    - Health check
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/matching/health", get(health))
        // Bets
        .route("/api/v1/bets", post(place_bet))
        .route("/api/v1/bets/:bet_id", get(get_bet))
        .route("/api/v1/bets/:bet_id/match", post(match_bet))
        .route("/api/v1/bets/:bet_id/cancel", post(cancel_bet))
        .route("/api/v1/bets/:bet_id/candidates", get(get_candidates))
        .route("/api/v1/bets/:bet_id/spread", put(update_spread))
        // Events
        .route(
            "/api/v1/events/:event_id/cancel-pending",
            post(cancel_pending_for_event),
        )
        .route("/api/v1/events/:event_id/lock", post(lock_event))
        .route("/api/v1/events/:event_id/unlock", post(unlock_event))
        .route("/api/v1/events/:event_id/drifted", get(drifted_bets))
        // Monitor
        .route("/api/v1/monitor/snapshot", get(monitor_snapshot))
        .route("/api/v1/monitor/events/:event_id/queue", get(event_queue))
        .route("/api/v1/monitor/alerts", post(report_alert))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

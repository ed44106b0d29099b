//! HTTP API handlers for the Matching Engine

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::{BetId, CoinKind, EventId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use crate::alert::{AlertKind, AlertSeverity, RiskAlert};
use crate::cancellation::{BatchReport, CancelReceipt, CancellationCoordinator};
use crate::domain::{Bet, BetSide, Match, NewBet, Refund};
use crate::engine::MatchingEngine;
use crate::monitor::{HealthStatus, MonitorSnapshot, QueueEntry, QueueMonitor};
use crate::placement::BetPlacement;
use crate::store::{bounded, BetStore};

/// Shared handles for the admin API - uses Arc for Clone
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<MatchingEngine>,
    pub placement: Arc<BetPlacement>,
    pub cancellation: Arc<CancellationCoordinator>,
    pub monitor: Arc<QueueMonitor>,
}

impl ApiState {
    fn store(&self) -> Arc<dyn BetStore> {
        self.engine.store()
    }

    async fn load_bet(&self, raw_id: &str) -> Result<Bet, ApiError> {
        let bet_id = parse_bet_id(raw_id)?;
        let store = self.store();
        let timeout = self.engine.settings().store_timeout;
        Ok(bounded(timeout, "get_bet", store.get_bet(bet_id)).await?)
    }
}

/// Successful response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn parse_bet_id(raw: &str) -> common::Result<BetId> {
    raw.parse().map_err(|_| common::Error::invalid_id("bet", raw))
}

/// Request to place a bet
#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub user_id: String,
    pub event_id: String,
    /// `reference` or `opposing`
    pub side: String,
    pub side_label: String,
    pub amount: u32,
    pub coin_kind: String,
    pub spread: f64,
    /// Match right after storing (default true)
    pub match_immediately: Option<bool>,
}

impl PlaceBetRequest {
    fn into_new_bet(self) -> common::Result<NewBet> {
        let reference = match self.side.to_lowercase().as_str() {
            "reference" => true,
            "opposing" => false,
            other => return Err(common::Error::InvalidSide(other.to_string())),
        };
        let coin_kind = CoinKind::parse(&self.coin_kind)
            .ok_or_else(|| common::Error::UnknownCoinKind(self.coin_kind.clone()))?;
        if self.user_id.trim().is_empty() {
            return Err(common::Error::MissingField("user_id"));
        }
        if self.event_id.trim().is_empty() {
            return Err(common::Error::MissingField("event_id"));
        }

        Ok(NewBet {
            user_id: UserId::new(self.user_id),
            event_id: EventId::new(self.event_id),
            side: BetSide::new(reference, self.side_label),
            amount: self.amount,
            coin_kind,
            spread: self.spread,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SpreadUpdateRequest {
    pub spread: f64,
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub user_id: Option<String>,
    pub event_id: Option<String>,
    pub detected_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BetDetail {
    pub bet: Bet,
    pub remaining_amount: u32,
    pub potential_payout: u32,
    /// Untouched by any match yet
    pub cancellation_eligible: bool,
    pub should_cancel_due_to_spread_change: bool,
    pub matches: Vec<Match>,
    pub refunds: Vec<Refund>,
}

#[derive(Debug, Serialize)]
pub struct EventLockResponse {
    pub event_id: EventId,
    pub locked: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: &'static str,
    pub match_attempts: u64,
    pub error_rate: f64,
    pub recent_error_rate: f64,
    pub match_latency_avg_us: u64,
    pub recent_latency_us: u64,
}

/// Place a bet and, unless asked not to, match it immediately
pub async fn place_bet(
    State(state): State<ApiState>,
    Json(req): Json<PlaceBetRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Bet>>), ApiError> {
    let match_immediately = req.match_immediately.unwrap_or(true);
    let new_bet = req.into_new_bet()?;

    let bet = if match_immediately {
        state.placement.place(new_bet).await?
    } else {
        state.placement.submit(new_bet).await?
    };
    Ok((StatusCode::CREATED, ApiResponse::ok(bet)))
}

/// Bet with its matches and refunds
pub async fn get_bet(State(state): State<ApiState>, Path(bet_id): Path<String>) -> ApiResult<BetDetail> {
    let bet = state.load_bet(&bet_id).await?;
    let store = state.store();
    let timeout = state.engine.settings().store_timeout;
    let matches = bounded(timeout, "matches_for_bet", store.matches_for_bet(bet.bet_id)).await?;
    let refunds = bounded(timeout, "refunds_for_bet", store.refunds_for_bet(bet.bet_id)).await?;

    Ok(ApiResponse::ok(BetDetail {
        remaining_amount: bet.remaining_amount(),
        potential_payout: bet.potential_payout_at(state.placement.validator().limits().payout_per_mille),
        cancellation_eligible: bet.is_cancellation_eligible(),
        should_cancel_due_to_spread_change: bet
            .should_cancel_due_to_spread_change(state.cancellation.drift_threshold()),
        bet,
        matches,
        refunds,
    }))
}

pub async fn match_bet(State(state): State<ApiState>, Path(bet_id): Path<String>) -> ApiResult<Bet> {
    let bet = state.load_bet(&bet_id).await?;
    Ok(ApiResponse::ok(state.engine.attempt_match(&bet).await?))
}

pub async fn cancel_bet(
    State(state): State<ApiState>,
    Path(bet_id): Path<String>,
) -> ApiResult<CancelReceipt> {
    let bet = state.load_bet(&bet_id).await?;
    Ok(ApiResponse::ok(state.cancellation.cancel_bet(&bet).await?))
}

pub async fn get_candidates(
    State(state): State<ApiState>,
    Path(bet_id): Path<String>,
) -> ApiResult<Vec<Bet>> {
    let bet = state.load_bet(&bet_id).await?;
    Ok(ApiResponse::ok(state.engine.find_opposing_candidates(&bet).await?))
}

pub async fn update_spread(
    State(state): State<ApiState>,
    Path(bet_id): Path<String>,
    Json(req): Json<SpreadUpdateRequest>,
) -> ApiResult<Bet> {
    if !req.spread.is_finite() {
        return Err(common::Error::invalid_input("spread must be a finite number").into());
    }
    let bet_id = parse_bet_id(&bet_id)?;
    Ok(ApiResponse::ok(state.cancellation.update_spread(bet_id, req.spread).await?))
}

pub async fn cancel_pending_for_event(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> ApiResult<BatchReport> {
    let event_id = EventId::new(event_id);
    Ok(ApiResponse::ok(
        state.cancellation.cancel_all_pending_for_event(&event_id).await?,
    ))
}

pub async fn drifted_bets(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> ApiResult<Vec<Bet>> {
    let event_id = EventId::new(event_id);
    Ok(ApiResponse::ok(state.cancellation.drifted_bets(&event_id).await?))
}

pub async fn lock_event(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> ApiResult<EventLockResponse> {
    let event_id = EventId::new(event_id);
    state.engine.lock_event(&event_id).await?;
    Ok(ApiResponse::ok(EventLockResponse {
        event_id,
        locked: true,
    }))
}

pub async fn unlock_event(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> ApiResult<EventLockResponse> {
    let event_id = EventId::new(event_id);
    state.engine.unlock_event(&event_id).await?;
    Ok(ApiResponse::ok(EventLockResponse {
        event_id,
        locked: false,
    }))
}

/// Latest monitor snapshot, computed on demand if the loop has not run yet
pub async fn monitor_snapshot(State(state): State<ApiState>) -> ApiResult<MonitorSnapshot> {
    let snapshot = match state.monitor.latest() {
        Some(snapshot) => snapshot,
        None => state.monitor.refresh().await?,
    };
    Ok(ApiResponse::ok(MonitorSnapshot::clone(&snapshot)))
}

pub async fn event_queue(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> ApiResult<Vec<QueueEntry>> {
    let event_id = EventId::new(event_id);
    Ok(ApiResponse::ok(state.monitor.queue_entries(&event_id).await?))
}

/// Accept a risk alert from an upstream detector
pub async fn report_alert(
    State(state): State<ApiState>,
    Json(req): Json<AlertRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RiskAlert>>), ApiError> {
    let mut alert = RiskAlert::new(req.kind, req.severity, req.message);
    if let Some(user_id) = req.user_id {
        alert = alert.with_user(&UserId::new(user_id));
    }
    if let Some(event_id) = req.event_id {
        alert = alert.with_event(&EventId::new(event_id));
    }
    if let Some(at) = req.detected_at {
        alert = alert.detected_at(at);
    }
    state.monitor.report_alert(alert.clone()).await;
    Ok((StatusCode::ACCEPTED, ApiResponse::ok(alert)))
}

/// Health check
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let metrics = state.engine.metrics().snapshot();
    Json(HealthResponse {
        status: state.monitor.health(),
        service: "matching-engine",
        match_attempts: metrics.match_attempts,
        error_rate: metrics.error_rate,
        recent_error_rate: metrics.recent_error_rate,
        match_latency_avg_us: metrics.match_latency_avg_us,
        recent_latency_us: metrics.recent_latency_us,
    })
}

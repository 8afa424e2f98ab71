//! Vote endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use slotvote_common::AppResult;
use slotvote_core::{SlotUpdates, SubmitVotesInput, VoteItem, VoterIdentity};
use slotvote_db::entities::vote::{self, VoteResponse, VoterSource};
use validator::Validate;

use crate::{middleware::AppState, response::ApiResponse};

/// Submit votes request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVotesRequest {
    #[validate(length(min = 1, max = 100))]
    pub voter_name: String,

    #[validate(email)]
    pub voter_email: String,

    pub user_id: Option<String>,
    pub voter_key: Option<String>,
    pub voter_source: Option<VoterSource>,
    pub voter_edit_token: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub items: Vec<VoteItem>,
}

impl SubmitVotesRequest {
    fn identity(&self) -> VoterIdentity {
        VoterIdentity {
            voter_key: self.voter_key.clone(),
            voter_source: self.voter_source,
            email: self.voter_email.clone(),
            name: self.voter_name.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Withdraw votes request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawVotesRequest {
    #[validate(email)]
    pub voter_email: String,

    #[serde(default)]
    pub voter_name: String,
    pub user_id: Option<String>,
    pub voter_key: Option<String>,
    pub voter_source: Option<VoterSource>,

    /// Only withdraw the vote on this option.
    pub option_id: Option<String>,
}

/// A stored vote as returned to the voter.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub id: String,
    pub option_id: String,
    pub voter_name: String,
    pub response: VoteResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_edit_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<vote::Model> for VoteView {
    fn from(vote: vote::Model) -> Self {
        Self {
            id: vote.id,
            option_id: vote.option_id,
            voter_name: vote.voter_name,
            response: vote.response,
            comment: vote.comment,
            voter_edit_token: vote.voter_edit_token,
            created_at: vote.created_at.to_rfc3339(),
            updated_at: vote.updated_at.to_rfc3339(),
        }
    }
}

/// Submitted votes.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotesResponse {
    pub votes: Vec<VoteView>,
}

/// Bulk submission result.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkVotesResponse {
    pub votes: Vec<VoteView>,
    /// The voter had already voted; `votes` are their earlier responses.
    pub already_voted: bool,
}

/// Withdrawal result.
#[derive(Serialize)]
pub struct WithdrawResponse {
    pub deleted: u64,
}

/// Current slot counters.
#[derive(Serialize)]
pub struct SlotsResponse {
    pub slots: SlotUpdates,
}

/// Submit one or more votes.
async fn submit_votes(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<SubmitVotesRequest>,
) -> AppResult<ApiResponse<VotesResponse>> {
    req.validate()?;

    let input = SubmitVotesInput {
        identity: req.identity(),
        edit_token: req.voter_edit_token,
        items: req.items,
    };
    let votes = state.vote_service.submit(&token, input).await?;

    Ok(ApiResponse::ok(VotesResponse {
        votes: votes.into_iter().map(Into::into).collect(),
    }))
}

/// Submit a whole survey at once.
async fn submit_bulk(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<SubmitVotesRequest>,
) -> AppResult<ApiResponse<BulkVotesResponse>> {
    req.validate()?;

    let identity = req.identity();
    let booking = state
        .vote_service
        .submit_bulk(&token, identity, req.items)
        .await?;

    Ok(ApiResponse::ok(BulkVotesResponse {
        votes: booking.votes.into_iter().map(Into::into).collect(),
        already_voted: booking.already_voted,
    }))
}

/// Withdraw the voter's votes.
async fn withdraw_votes(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<WithdrawVotesRequest>,
) -> AppResult<ApiResponse<WithdrawResponse>> {
    req.validate()?;

    let identity = VoterIdentity {
        voter_key: req.voter_key,
        voter_source: req.voter_source,
        email: req.voter_email,
        name: req.voter_name,
        user_id: req.user_id,
    };
    let deleted = state
        .vote_service
        .withdraw(&token, identity, req.option_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(WithdrawResponse { deleted }))
}

/// Get per-option booking counters.
async fn slots(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<ApiResponse<SlotsResponse>> {
    let slots = state.vote_service.slot_counts_by_token(&token).await?;
    Ok(ApiResponse::ok(SlotsResponse { slots }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{token}/votes", post(submit_votes))
        .route("/{token}/votes/bulk", post(submit_bulk))
        .route("/{token}/votes/withdraw", post(withdraw_votes))
        .route("/{token}/slots", get(slots))
}

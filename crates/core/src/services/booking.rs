//! Booking transaction engine.
//!
//! Every public operation runs in exactly one database transaction and takes
//! its locks in a fixed order: voter advisory lock, then the option row, then
//! vote rows. Any error drops the transaction, which rolls it back, so a
//! rejected booking never leaves a partial write behind.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use slotvote_common::{AppError, AppResult, IdGenerator};
use slotvote_db::entities::{
    poll::{self, PollType},
    poll_option,
    vote::{self, VoteResponse, VoterSource},
    Poll, PollOption, Vote,
};
use tracing::{debug, info};

use super::advisory_lock::{acquire_voter_lock, acquire_voter_locks, set_lock_timeout};

/// A single vote/booking request.
#[derive(Debug, Clone)]
pub struct VoteRequest {
    pub poll_id: String,
    pub option_id: String,
    pub voter_name: String,
    pub voter_email: String,
    pub user_id: Option<String>,
    pub response: VoteResponse,
    pub comment: Option<String>,
    pub voter_key: Option<String>,
    pub voter_source: Option<VoterSource>,
    pub voter_edit_token: Option<String>,
}

/// One option response inside a bulk submission.
#[derive(Debug, Clone)]
pub struct BulkVoteItem {
    pub option_id: String,
    pub response: VoteResponse,
    pub comment: Option<String>,
}

/// An all-or-nothing survey submission.
#[derive(Debug, Clone)]
pub struct BulkVoteRequest {
    pub poll_id: String,
    pub voter_name: String,
    pub voter_email: String,
    pub user_id: Option<String>,
    pub voter_edit_token: Option<String>,
    pub items: Vec<BulkVoteItem>,
    pub voter_key: Option<String>,
    pub voter_source: Option<VoterSource>,
}

/// Outcome of a bulk submission.
#[derive(Debug, Clone)]
pub struct BulkBooking {
    /// The freshly inserted rows, or the identity's existing rows when
    /// `already_voted` is set.
    pub votes: Vec<vote::Model>,
    pub already_voted: bool,
}

/// Transactional booking engine.
#[derive(Clone)]
pub struct BookingService {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
    lock_timeout_ms: u64,
}

impl BookingService {
    /// Create a new booking service.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>, lock_timeout_ms: u64) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
            lock_timeout_ms,
        }
    }

    /// Book one option for one voter.
    ///
    /// Returns the inserted or updated vote, or one of
    /// [`AppError::SlotFull`], [`AppError::AlreadySignedUp`],
    /// [`AppError::DuplicateEmailVote`].
    pub async fn book(&self, req: VoteRequest, allow_edit_existing: bool) -> AppResult<vote::Model> {
        let txn = self.begin().await?;

        let poll = Poll::find_by_id(&req.poll_id)
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::PollNotFound(req.poll_id.clone()))?;

        // Lock on the column each poll type dedups on.
        let identity = match poll.poll_type {
            PollType::Organization | PollType::Survey => req.voter_email.as_str(),
            PollType::Schedule if req.voter_email.is_empty() => req.voter_name.as_str(),
            PollType::Schedule => req.voter_email.as_str(),
        };
        acquire_voter_lock(&txn, &poll.id, identity).await?;

        let vote = match poll.poll_type {
            PollType::Organization => self.book_organization(&txn, &poll, &req).await?,
            PollType::Survey => self.book_survey(&txn, &poll, &req, allow_edit_existing).await?,
            PollType::Schedule => self.book_schedule(&txn, &poll, &req).await?,
        };

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        debug!(
            poll_id = %vote.poll_id,
            option_id = %vote.option_id,
            vote_id = %vote.id,
            "Booking committed"
        );
        Ok(vote)
    }

    /// Submit many survey responses as one atomic unit.
    ///
    /// The existing-vote check runs inside the voter lock, so two concurrent
    /// submissions from the same voter cannot both insert.
    pub async fn book_bulk(&self, req: BulkVoteRequest) -> AppResult<BulkBooking> {
        if req.items.is_empty() {
            return Err(AppError::BadRequest(
                "At least one response is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if !req.items.iter().all(|item| seen.insert(item.option_id.as_str())) {
            return Err(AppError::BadRequest(
                "Each option may only be answered once".to_string(),
            ));
        }

        let txn = self.begin().await?;

        let poll = Poll::find_by_id(&req.poll_id)
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::PollNotFound(req.poll_id.clone()))?;
        if poll.poll_type != PollType::Survey {
            return Err(AppError::BadRequest(
                "Bulk submission is only available for survey polls".to_string(),
            ));
        }

        // Single survey bookings lock on the email, so bulk takes that lock
        // too on top of the key it dedups on.
        let identities: Vec<&str> = std::iter::once(req.voter_email.as_str())
            .chain(req.voter_key.as_deref())
            .collect();
        acquire_voter_locks(&txn, &poll.id, &identities).await?;

        let query = Vote::find().filter(vote::Column::PollId.eq(&poll.id));
        let query = match &req.voter_key {
            Some(key) => query.filter(vote::Column::VoterKey.eq(key)),
            None => query.filter(vote::Column::VoterEmail.eq(&req.voter_email)),
        };
        let existing = query
            .lock_exclusive()
            .all(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !existing.is_empty() {
            txn.commit()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            info!(poll_id = %poll.id, rows = existing.len(), "Bulk submission found existing votes");
            return Ok(BulkBooking {
                votes: existing,
                already_voted: true,
            });
        }

        let now = Utc::now();
        let mut votes = Vec::with_capacity(req.items.len());
        for item in &req.items {
            find_option(&txn, &poll.id, &item.option_id).await?;

            let model = vote::ActiveModel {
                id: Set(self.id_gen.generate()),
                poll_id: Set(poll.id.clone()),
                option_id: Set(item.option_id.clone()),
                voter_name: Set(req.voter_name.clone()),
                voter_email: Set(req.voter_email.clone()),
                user_id: Set(req.user_id.clone()),
                response: Set(item.response),
                comment: Set(item.comment.clone()),
                voter_key: Set(req.voter_key.clone()),
                voter_source: Set(req.voter_source),
                voter_edit_token: Set(req.voter_edit_token.clone()),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            };
            votes.push(
                model
                    .insert(&txn)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?,
            );
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        debug!(poll_id = %poll.id, rows = votes.len(), "Bulk submission committed");
        Ok(BulkBooking {
            votes,
            already_voted: false,
        })
    }

    /// Delete a voter's rows on a poll, optionally restricted to one option.
    ///
    /// Runs under the same voter lock as bookings. Returns the deleted rows.
    pub async fn withdraw(
        &self,
        poll_id: &str,
        voter_key: Option<&str>,
        voter_email: &str,
        option_id: Option<&str>,
    ) -> AppResult<Vec<vote::Model>> {
        let txn = self.begin().await?;

        let identities: Vec<&str> = std::iter::once(voter_email).chain(voter_key).collect();
        acquire_voter_locks(&txn, poll_id, &identities).await?;

        let query = Vote::find().filter(vote::Column::PollId.eq(poll_id));
        let query = match voter_key {
            Some(key) => query.filter(vote::Column::VoterKey.eq(key)),
            None => query.filter(vote::Column::VoterEmail.eq(voter_email)),
        };
        let query = match option_id {
            Some(option_id) => query.filter(vote::Column::OptionId.eq(option_id)),
            None => query,
        };
        let rows = query
            .lock_exclusive()
            .all(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if rows.is_empty() {
            return Err(AppError::NotFound("No votes to withdraw".to_string()));
        }

        Vote::delete_many()
            .filter(vote::Column::Id.is_in(rows.iter().map(|v| v.id.clone())))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        info!(poll_id = %poll_id, rows = rows.len(), "Votes withdrawn");
        Ok(rows)
    }

    async fn begin(&self) -> AppResult<DatabaseTransaction> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        set_lock_timeout(&txn, self.lock_timeout_ms).await?;
        Ok(txn)
    }

    async fn book_organization(
        &self,
        txn: &DatabaseTransaction,
        poll: &poll::Model,
        req: &VoteRequest,
    ) -> AppResult<vote::Model> {
        // The option row lock serializes different voters racing for the
        // same slot.
        let option = PollOption::find_by_id(&req.option_id)
            .filter(poll_option::Column::PollId.eq(&poll.id))
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Option not found: {}", req.option_id)))?;

        if req.response == VoteResponse::Yes {
            if let Some(max_capacity) = option.max_capacity {
                // Postgres refuses FOR UPDATE together with COUNT, so the
                // locked rows are counted here.
                let booked = Vote::find()
                    .filter(vote::Column::OptionId.eq(&option.id))
                    .filter(vote::Column::Response.eq(VoteResponse::Yes))
                    .lock_exclusive()
                    .all(txn)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                // A voter re-confirming their own seat does not need a new one.
                let taken = booked
                    .iter()
                    .filter(|v| v.voter_email != req.voter_email)
                    .count();
                if taken >= usize::try_from(max_capacity).unwrap_or(0) {
                    info!(
                        poll_id = %poll.id,
                        option_id = %option.id,
                        max_capacity,
                        "Booking rejected: slot full"
                    );
                    return Err(AppError::SlotFull);
                }
            }

            if !poll.allow_multiple_slots {
                let other_slot = Vote::find()
                    .filter(vote::Column::PollId.eq(&poll.id))
                    .filter(vote::Column::VoterEmail.eq(&req.voter_email))
                    .filter(vote::Column::Response.eq(VoteResponse::Yes))
                    .filter(vote::Column::OptionId.ne(&option.id))
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                if other_slot.is_some() {
                    info!(poll_id = %poll.id, option_id = %option.id, "Booking rejected: already signed up");
                    return Err(AppError::AlreadySignedUp);
                }
            }
        }

        let existing = Vote::find()
            .filter(vote::Column::PollId.eq(&poll.id))
            .filter(vote::Column::OptionId.eq(&option.id))
            .filter(vote::Column::VoterEmail.eq(&req.voter_email))
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match existing {
            Some(existing) => update_vote(txn, existing, req).await,
            None => self.insert_vote(txn, req).await,
        }
    }

    async fn book_survey(
        &self,
        txn: &DatabaseTransaction,
        poll: &poll::Model,
        req: &VoteRequest,
        allow_edit_existing: bool,
    ) -> AppResult<vote::Model> {
        find_option(txn, &poll.id, &req.option_id).await?;

        let existing = Vote::find()
            .filter(vote::Column::PollId.eq(&poll.id))
            .filter(vote::Column::VoterEmail.eq(&req.voter_email))
            .lock_exclusive()
            .all(txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if existing.is_empty() {
            return self.insert_vote(txn, req).await;
        }

        if !allow_edit_existing {
            info!(poll_id = %poll.id, "Survey vote rejected: email already voted");
            return Err(AppError::DuplicateEmailVote);
        }

        // Editing only re-targets the same option; switching options goes
        // through the bulk path.
        match existing.into_iter().find(|v| v.option_id == req.option_id) {
            Some(same_option) => update_vote(txn, same_option, req).await,
            None => {
                info!(poll_id = %poll.id, "Survey vote rejected: different option");
                Err(AppError::DuplicateEmailVote)
            }
        }
    }

    async fn book_schedule(
        &self,
        txn: &DatabaseTransaction,
        poll: &poll::Model,
        req: &VoteRequest,
    ) -> AppResult<vote::Model> {
        find_option(txn, &poll.id, &req.option_id).await?;

        let query = Vote::find()
            .filter(vote::Column::PollId.eq(&poll.id))
            .filter(vote::Column::OptionId.eq(&req.option_id));
        let query = if let Some(user_id) = &req.user_id {
            query.filter(vote::Column::UserId.eq(user_id))
        } else if !req.voter_email.is_empty() {
            query.filter(vote::Column::VoterEmail.eq(&req.voter_email))
        } else {
            query.filter(vote::Column::VoterName.eq(&req.voter_name))
        };
        let existing = query
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(existing) = existing {
            return update_vote(txn, existing, req).await;
        }

        // Looked up by account: someone may still have used this email
        // anonymously on the same option.
        if req.user_id.is_some() && !req.voter_email.is_empty() {
            let duplicate = Vote::find()
                .filter(vote::Column::PollId.eq(&poll.id))
                .filter(vote::Column::OptionId.eq(&req.option_id))
                .filter(vote::Column::VoterEmail.eq(&req.voter_email))
                .one(txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            if duplicate.is_some() {
                info!(poll_id = %poll.id, option_id = %req.option_id, "Schedule vote rejected: duplicate email");
                return Err(AppError::DuplicateEmailVote);
            }
        }

        self.insert_vote(txn, req).await
    }

    async fn insert_vote(
        &self,
        txn: &DatabaseTransaction,
        req: &VoteRequest,
    ) -> AppResult<vote::Model> {
        let now = Utc::now();
        let model = vote::ActiveModel {
            id: Set(self.id_gen.generate()),
            poll_id: Set(req.poll_id.clone()),
            option_id: Set(req.option_id.clone()),
            voter_name: Set(req.voter_name.clone()),
            voter_email: Set(req.voter_email.clone()),
            user_id: Set(req.user_id.clone()),
            response: Set(req.response),
            comment: Set(req.comment.clone()),
            voter_key: Set(req.voter_key.clone()),
            voter_source: Set(req.voter_source),
            voter_edit_token: Set(req.voter_edit_token.clone()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        model
            .insert(txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

/// Load an option of the poll without locking it.
async fn find_option(
    txn: &DatabaseTransaction,
    poll_id: &str,
    option_id: &str,
) -> AppResult<poll_option::Model> {
    PollOption::find_by_id(option_id)
        .filter(poll_option::Column::PollId.eq(poll_id))
        .one(txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("Option not found: {option_id}")))
}

/// Update an existing row in place with the request's response.
async fn update_vote(
    txn: &DatabaseTransaction,
    existing: vote::Model,
    req: &VoteRequest,
) -> AppResult<vote::Model> {
    let mut active: vote::ActiveModel = existing.into();
    active.response = Set(req.response);
    active.comment = Set(req.comment.clone());
    active.voter_name = Set(req.voter_name.clone());
    if req.user_id.is_some() {
        active.user_id = Set(req.user_id.clone());
    }
    if req.voter_key.is_some() {
        active.voter_key = Set(req.voter_key.clone());
        active.voter_source = Set(req.voter_source);
    }
    if req.voter_edit_token.is_some() {
        active.voter_edit_token = Set(req.voter_edit_token.clone());
    }
    active.updated_at = Set(Utc::now().into());

    active
        .update(txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

//! Vote service.
//!
//! Resolves polls by token, runs the pre-transaction checks, hands each
//! booking to [`BookingService`] and publishes committed changes to live
//! viewers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slotvote_common::{AppError, AppResult, IdGenerator};
use slotvote_db::{
    entities::{
        poll::{self, PollType},
        vote::{self, VoteResponse},
    },
    repositories::{PollRepository, UserRepository, VoteRepository},
};
use sea_orm::DatabaseConnection;
use tracing::{debug, info};

use super::booking::{BookingService, BulkBooking, BulkVoteItem, BulkVoteRequest, VoteRequest};
use super::identity::VoterIdentity;
use super::slot_update::{SlotCount, SlotUpdatePublisher, SlotUpdates};

/// A response to one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteItem {
    pub option_id: String,
    pub response: VoteResponse,
    pub comment: Option<String>,
}

/// Input for [`VoteService::submit`].
#[derive(Debug, Clone)]
pub struct SubmitVotesInput {
    pub identity: VoterIdentity,
    pub items: Vec<VoteItem>,
    /// Edit token of a previous submission, reused when editing.
    pub edit_token: Option<String>,
}

/// Vote service for business logic.
#[derive(Clone)]
pub struct VoteService {
    poll_repo: PollRepository,
    vote_repo: VoteRepository,
    user_repo: UserRepository,
    booking: BookingService,
    publisher: Option<Arc<dyn SlotUpdatePublisher>>,
    id_gen: IdGenerator,
}

impl VoteService {
    /// Create a new vote service without live publishing.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>, lock_timeout_ms: u64) -> Self {
        Self {
            poll_repo: PollRepository::new(Arc::clone(&db)),
            vote_repo: VoteRepository::new(Arc::clone(&db)),
            user_repo: UserRepository::new(Arc::clone(&db)),
            booking: BookingService::new(db, lock_timeout_ms),
            publisher: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Publish committed changes through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn SlotUpdatePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Submit one or more votes on a poll.
    ///
    /// Each item is booked in its own transaction; the first rejection stops
    /// the loop and is returned, earlier items stay committed.
    pub async fn submit(&self, token: &str, input: SubmitVotesInput) -> AppResult<Vec<vote::Model>> {
        if input.items.is_empty() {
            return Err(AppError::BadRequest(
                "At least one response is required".to_string(),
            ));
        }

        let poll = self.poll_repo.get_by_token(token).await?;
        let identity = input.identity.normalized();
        self.check_voter(&poll, &identity).await?;

        if poll.poll_type == PollType::Schedule && !poll.allow_vote_edit {
            let existing = self
                .vote_repo
                .find_by_identity(&poll.id, identity.voter_key.as_deref(), &identity.email)
                .await?;
            if !existing.is_empty() {
                return Err(AppError::AlreadyVoted);
            }
        }

        let edit_token = if poll.allow_vote_edit {
            match input.edit_token {
                Some(token) => Some(self.verify_edit_token(&poll, &identity, token).await?),
                None => Some(self.id_gen.generate_edit_token()),
            }
        } else {
            None
        };

        let mut votes = Vec::with_capacity(input.items.len());
        let mut result = Ok(());
        for item in input.items {
            let req = VoteRequest {
                poll_id: poll.id.clone(),
                option_id: item.option_id,
                voter_name: identity.name.clone(),
                voter_email: identity.email.clone(),
                user_id: identity.user_id.clone(),
                response: item.response,
                comment: item.comment,
                voter_key: identity.voter_key.clone(),
                voter_source: identity.voter_source,
                voter_edit_token: edit_token.clone(),
            };
            match self.booking.book(req, poll.allow_vote_edit).await {
                Ok(vote) => votes.push(vote),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if !votes.is_empty() {
            self.publish_changes(&poll).await;
        }
        result?;

        info!(poll_id = %poll.id, count = votes.len(), "Votes submitted");
        Ok(votes)
    }

    /// Submit a survey as one atomic unit.
    pub async fn submit_bulk(
        &self,
        token: &str,
        identity: VoterIdentity,
        items: Vec<VoteItem>,
    ) -> AppResult<BulkBooking> {
        let poll = self.poll_repo.get_by_token(token).await?;
        if poll.poll_type != PollType::Survey {
            return Err(AppError::BadRequest(
                "Bulk submission is only available for survey polls".to_string(),
            ));
        }

        let identity = identity.normalized();
        self.check_voter(&poll, &identity).await?;

        let voter_edit_token = poll
            .allow_vote_edit
            .then(|| self.id_gen.generate_edit_token());

        let booking = self
            .booking
            .book_bulk(BulkVoteRequest {
                poll_id: poll.id.clone(),
                voter_name: identity.name,
                voter_email: identity.email,
                user_id: identity.user_id,
                voter_edit_token,
                items: items
                    .into_iter()
                    .map(|item| BulkVoteItem {
                        option_id: item.option_id,
                        response: item.response,
                        comment: item.comment,
                    })
                    .collect(),
                voter_key: identity.voter_key,
                voter_source: identity.voter_source,
            })
            .await?;

        if booking.already_voted {
            if !poll.allow_vote_edit {
                return Err(AppError::DuplicateEmailVote);
            }
            return Ok(booking);
        }

        self.publish_changes(&poll).await;
        info!(poll_id = %poll.id, count = booking.votes.len(), "Bulk votes submitted");
        Ok(booking)
    }

    /// Withdraw a voter's votes, optionally only on one option.
    ///
    /// Returns the number of deleted rows.
    pub async fn withdraw(
        &self,
        token: &str,
        identity: VoterIdentity,
        option_id: Option<&str>,
    ) -> AppResult<u64> {
        let poll = self.poll_repo.get_by_token(token).await?;
        if !poll.is_active {
            return Err(AppError::PollInactive);
        }
        if !poll.allow_vote_withdrawal {
            return Err(AppError::WithdrawalNotAllowed);
        }

        let identity = identity.normalized();
        self.check_voter(&poll, &identity).await?;

        let removed = self
            .booking
            .withdraw(
                &poll.id,
                identity.voter_key.as_deref(),
                &identity.email,
                option_id,
            )
            .await?;

        self.publish_changes(&poll).await;
        Ok(removed.len() as u64)
    }

    /// Current booking counters of every option of a poll.
    pub async fn slot_counts(&self, poll: &poll::Model) -> AppResult<SlotUpdates> {
        let options = self.poll_repo.find_options(&poll.id).await?;
        let counts = self.vote_repo.count_yes_by_option(&poll.id).await?;

        Ok(options
            .into_iter()
            .map(|option| {
                let current_count = counts.get(&option.id).copied().unwrap_or(0);
                (
                    option.id,
                    SlotCount {
                        current_count,
                        max_capacity: option.max_capacity,
                    },
                )
            })
            .collect())
    }

    /// [`Self::slot_counts`] for a poll addressed by public or admin token.
    pub async fn slot_counts_by_token(&self, token: &str) -> AppResult<SlotUpdates> {
        let poll = self.poll_repo.get_by_token(token).await?;
        self.slot_counts(&poll).await
    }

    /// Accept a client-supplied edit token only if it already stamps votes of
    /// this voter on this poll.
    async fn verify_edit_token(
        &self,
        poll: &poll::Model,
        identity: &VoterIdentity,
        edit_token: String,
    ) -> AppResult<String> {
        let stamped = self
            .vote_repo
            .find_by_edit_token(&poll.id, &edit_token)
            .await?;
        if stamped.is_empty() || stamped.iter().any(|v| v.voter_email != identity.email) {
            debug!(poll_id = %poll.id, "Rejected unknown edit token");
            return Err(AppError::BadRequest("Invalid edit token".to_string()));
        }
        Ok(edit_token)
    }

    async fn check_voter(&self, poll: &poll::Model, identity: &VoterIdentity) -> AppResult<()> {
        if !poll.is_active {
            return Err(AppError::PollInactive);
        }
        if poll.is_expired() {
            return Err(AppError::PollExpired);
        }

        match &identity.user_id {
            None => {
                if self
                    .user_repo
                    .find_by_email(&identity.email)
                    .await?
                    .is_some()
                {
                    return Err(AppError::LoginRequired);
                }
            }
            Some(user_id) => {
                let user = self
                    .user_repo
                    .find_by_id(user_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("User not found: {user_id}")))?;
                if !user.email.eq_ignore_ascii_case(&identity.email) {
                    return Err(AppError::EmailMismatch);
                }
            }
        }

        Ok(())
    }

    /// Best-effort fan-out after a commit; failures never reach the voter.
    async fn publish_changes(&self, poll: &poll::Model) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let tokens = [poll.public_token.as_str(), poll.admin_token.as_str()];

        if poll.poll_type == PollType::Organization {
            match self.slot_counts(poll).await {
                Ok(updates) => {
                    for token in tokens {
                        publisher.publish_slot_update(token, &updates).await;
                    }
                }
                Err(e) => debug!(poll_id = %poll.id, error = %e, "Skipping slot update"),
            }
        }

        for token in tokens {
            publisher.publish_results_refresh(token).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use slotvote_db::entities::{poll_option, user};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        refreshed: Mutex<Vec<String>>,
        slot_updates: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SlotUpdatePublisher for RecordingPublisher {
        async fn publish_slot_update(&self, poll_token: &str, _updates: &SlotUpdates) {
            self.slot_updates
                .lock()
                .unwrap()
                .push(poll_token.to_string());
        }

        async fn publish_results_refresh(&self, poll_token: &str) {
            self.refreshed.lock().unwrap().push(poll_token.to_string());
        }
    }

    fn test_poll(poll_type: PollType) -> poll::Model {
        poll::Model {
            id: "p1".to_string(),
            public_token: "pub".to_string(),
            admin_token: "adm".to_string(),
            poll_type,
            title: "Team lunch".to_string(),
            is_active: true,
            expires_at: None,
            allow_multiple_slots: false,
            allow_vote_edit: true,
            allow_vote_withdrawal: true,
            created_at: Utc::now().into(),
        }
    }

    fn test_user(id: &str, email: &str) -> user::Model {
        user::Model {
            id: id.to_string(),
            email: email.to_string(),
            name: "Anna".to_string(),
            created_at: Utc::now().into(),
        }
    }

    fn test_vote(id: &str) -> vote::Model {
        vote::Model {
            id: id.to_string(),
            poll_id: "p1".to_string(),
            option_id: "o1".to_string(),
            voter_name: "Anna".to_string(),
            voter_email: "anna@example.com".to_string(),
            user_id: None,
            response: VoteResponse::Yes,
            comment: None,
            voter_key: None,
            voter_source: None,
            voter_edit_token: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn input(user_id: Option<&str>) -> SubmitVotesInput {
        SubmitVotesInput {
            identity: VoterIdentity {
                voter_key: None,
                voter_source: None,
                email: " Anna@Example.com".to_string(),
                name: "Anna".to_string(),
                user_id: user_id.map(ToString::to_string),
            },
            items: vec![VoteItem {
                option_id: "o1".to_string(),
                response: VoteResponse::Yes,
                comment: None,
            }],
            edit_token: None,
        }
    }

    fn service(db: MockDatabase) -> VoteService {
        VoteService::new(Arc::new(db.into_connection()), 5000)
    }

    #[tokio::test]
    async fn test_submit_inactive_poll() {
        let mut poll = test_poll(PollType::Schedule);
        poll.is_active = false;
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[poll]]);

        let result = service(db).submit("pub", input(None)).await;
        assert!(matches!(result, Err(AppError::PollInactive)));
    }

    #[tokio::test]
    async fn test_submit_expired_poll() {
        let mut poll = test_poll(PollType::Schedule);
        poll.expires_at = Some((Utc::now() - Duration::hours(1)).into());
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[poll]]);

        let result = service(db).submit("pub", input(None)).await;
        assert!(matches!(result, Err(AppError::PollExpired)));
    }

    #[tokio::test]
    async fn test_submit_registered_email_requires_login() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(PollType::Schedule)]])
            .append_query_results([[test_user("u1", "anna@example.com")]]);

        let result = service(db).submit("pub", input(None)).await;
        assert!(matches!(result, Err(AppError::LoginRequired)));
    }

    #[tokio::test]
    async fn test_submit_email_mismatch() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(PollType::Schedule)]])
            .append_query_results([[test_user("u1", "someone.else@example.com")]]);

        let result = service(db).submit("pub", input(Some("u1"))).await;
        assert!(matches!(result, Err(AppError::EmailMismatch)));
    }

    #[tokio::test]
    async fn test_submit_schedule_already_voted() {
        let mut poll = test_poll(PollType::Schedule);
        poll.allow_vote_edit = false;
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[poll]])
            .append_query_results([Vec::<user::Model>::new()])
            .append_query_results([[test_vote("v1")]]);

        let result = service(db).submit("pub", input(None)).await;
        assert!(matches!(result, Err(AppError::AlreadyVoted)));
    }

    #[tokio::test]
    async fn test_submit_unknown_poll() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<poll::Model>::new()]);

        let result = service(db).submit("missing", input(None)).await;
        assert!(matches!(result, Err(AppError::PollNotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_schedule_publishes_results_refresh() {
        let option = poll_option::Model {
            id: "o1".to_string(),
            poll_id: "p1".to_string(),
            label: "Monday".to_string(),
            position: 0,
            max_capacity: None,
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .append_query_results([[test_poll(PollType::Schedule)]])
            .append_query_results([Vec::<user::Model>::new()])
            .append_query_results([[test_poll(PollType::Schedule)]])
            .append_query_results([[option]])
            .append_query_results([Vec::<vote::Model>::new()])
            .append_query_results([[test_vote("v1")]]);

        let publisher = Arc::new(RecordingPublisher::default());
        let svc = service(db).with_publisher(publisher.clone());

        let votes = svc.submit("pub", input(None)).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(
            *publisher.refreshed.lock().unwrap(),
            vec!["pub".to_string(), "adm".to_string()]
        );
        assert!(publisher.slot_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_items() {
        let db = MockDatabase::new(DatabaseBackend::Postgres);
        let mut empty = input(None);
        empty.items.clear();

        let result = service(db).submit("pub", empty).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_submit_bulk_requires_survey() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(PollType::Organization)]]);

        let result = service(db)
            .submit_bulk("pub", input(None).identity, input(None).items)
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_submit_rejects_foreign_edit_token() {
        let mut other = test_vote("v1");
        other.voter_email = "ben@example.com".to_string();
        other.voter_edit_token = Some("tok".to_string());
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(PollType::Schedule)]])
            .append_query_results([Vec::<user::Model>::new()])
            .append_query_results([[other]]);

        let mut with_token = input(None);
        with_token.edit_token = Some("tok".to_string());
        let result = service(db).submit("pub", with_token).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_edit_token() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(PollType::Survey)]])
            .append_query_results([Vec::<user::Model>::new()])
            .append_query_results([Vec::<vote::Model>::new()]);

        let mut with_token = input(None);
        with_token.edit_token = Some("made-up".to_string());
        let result = service(db).submit("pub", with_token).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_withdraw_registered_email_requires_login() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[test_poll(PollType::Organization)]])
            .append_query_results([[test_user("u1", "anna@example.com")]]);

        let result = service(db).withdraw("pub", input(None).identity, None).await;
        assert!(matches!(result, Err(AppError::LoginRequired)));
    }

    #[tokio::test]
    async fn test_withdraw_expired_poll() {
        let mut poll = test_poll(PollType::Organization);
        poll.expires_at = Some((Utc::now() - Duration::hours(1)).into());
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[poll]]);

        let result = service(db).withdraw("pub", input(None).identity, None).await;
        assert!(matches!(result, Err(AppError::PollExpired)));
    }

    #[tokio::test]
    async fn test_withdraw_not_allowed() {
        let mut poll = test_poll(PollType::Organization);
        poll.allow_vote_withdrawal = false;
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[poll]]);

        let result = service(db).withdraw("pub", input(None).identity, None).await;
        assert!(matches!(result, Err(AppError::WithdrawalNotAllowed)));
    }
}

//! Vote repository.
//!
//! Reads only. Every write goes through the booking transactions in
//! `slotvote-core`, which take the locks the writes depend on.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entities::{vote, Vote};
use slotvote_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

/// Vote repository for database operations.
#[derive(Clone)]
pub struct VoteRepository {
    db: Arc<DatabaseConnection>,
}

impl VoteRepository {
    /// Create a new vote repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a voter's votes on a poll.
    ///
    /// Matches on `voter_key` when one is given, otherwise on email.
    pub async fn find_by_identity(
        &self,
        poll_id: &str,
        voter_key: Option<&str>,
        voter_email: &str,
    ) -> AppResult<Vec<vote::Model>> {
        let query = Vote::find().filter(vote::Column::PollId.eq(poll_id));
        let query = match voter_key {
            Some(key) => query.filter(vote::Column::VoterKey.eq(key)),
            None => query.filter(vote::Column::VoterEmail.eq(voter_email)),
        };

        query
            .order_by_asc(vote::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the votes stamped with an edit token.
    pub async fn find_by_edit_token(
        &self,
        poll_id: &str,
        edit_token: &str,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::VoterEditToken.eq(edit_token))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count `yes` responses per option of a poll.
    ///
    /// Options without any `yes` vote are absent from the map.
    pub async fn count_yes_by_option(&self, poll_id: &str) -> AppResult<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> = Vote::find()
            .select_only()
            .column(vote::Column::OptionId)
            .column_as(vote::Column::Id.count(), "count")
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::Response.eq(vote::VoteResponse::Yes))
            .group_by(vote::Column::OptionId)
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(option_id, count)| (option_id, count.max(0) as u64))
            .collect())
    }

}

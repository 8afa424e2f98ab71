//! Poll repository.

use std::sync::Arc;

use crate::entities::{poll, poll_option, Poll, PollOption};
use slotvote_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Poll repository for database operations.
#[derive(Clone)]
pub struct PollRepository {
    db: Arc<DatabaseConnection>,
}

impl PollRepository {
    /// Create a new poll repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a poll by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<poll::Model>> {
        Poll::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a poll by either its public or its admin token.
    pub async fn find_by_token(&self, token: &str) -> AppResult<Option<poll::Model>> {
        Poll::find()
            .filter(
                Condition::any()
                    .add(poll::Column::PublicToken.eq(token))
                    .add(poll::Column::AdminToken.eq(token)),
            )
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a poll by token, returning error if not found.
    pub async fn get_by_token(&self, token: &str) -> AppResult<poll::Model> {
        self.find_by_token(token)
            .await?
            .ok_or_else(|| AppError::PollNotFound(token.to_string()))
    }

    /// List a poll's options in display order.
    pub async fn find_options(&self, poll_id: &str) -> AppResult<Vec<poll_option::Model>> {
        PollOption::find()
            .filter(poll_option::Column::PollId.eq(poll_id))
            .order_by_asc(poll_option::Column::Position)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

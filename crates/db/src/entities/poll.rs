//! Poll entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of poll. The booking engine branches entirely on this.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    /// Date-finding poll; one vote per voter per option.
    #[sea_orm(string_value = "schedule")]
    Schedule,
    /// Opinion poll; one submission per voter.
    #[sea_orm(string_value = "survey")]
    Survey,
    /// Sign-up sheet with optionally capacity-limited slots.
    #[sea_orm(string_value = "organization")]
    Organization,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "poll")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Token used in the public share link
    #[sea_orm(unique)]
    pub public_token: String,

    /// Token used in the creator's admin link
    #[sea_orm(unique)]
    pub admin_token: String,

    pub poll_type: PollType,

    pub title: String,

    pub is_active: bool,

    #[sea_orm(nullable)]
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Organization polls: whether one voter may hold several slots
    pub allow_multiple_slots: bool,

    pub allow_vote_edit: bool,

    pub allow_vote_withdrawal: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::poll_option::Entity")]
    PollOption,
    #[sea_orm(has_many = "super::vote::Entity")]
    Vote,
}

impl Related<super::poll_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollOption.def()
    }
}

impl Related<super::vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vote.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the poll's expiry lies in the past.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .as_ref()
            .is_some_and(|exp| *exp < chrono::Utc::now())
    }
}

//! Vote entity: one voter's response to one poll option.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A voter's answer for an option.
///
/// Organization polls treat `yes` as "booked" and anything else as not booked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "lowercase")]
pub enum VoteResponse {
    #[sea_orm(string_value = "yes")]
    Yes,
    #[sea_orm(string_value = "maybe")]
    Maybe,
    #[sea_orm(string_value = "no")]
    No,
}

/// Where a voter key came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "lowercase")]
pub enum VoterSource {
    /// Authenticated account.
    #[sea_orm(string_value = "user")]
    User,
    /// Anonymous device token.
    #[sea_orm(string_value = "device")]
    Device,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vote")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub poll_id: String,

    #[sea_orm(indexed)]
    pub option_id: String,

    pub voter_name: String,

    pub voter_email: String,

    #[sea_orm(nullable)]
    pub user_id: Option<String>,

    pub response: VoteResponse,

    #[sea_orm(nullable)]
    pub comment: Option<String>,

    /// Opaque dedup key from the identity resolver
    #[sea_orm(nullable)]
    pub voter_key: Option<String>,

    #[sea_orm(nullable)]
    pub voter_source: Option<VoterSource>,

    /// Shared by all rows of one submission; enables self-service edits
    #[sea_orm(nullable)]
    pub voter_edit_token: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::poll::Entity",
        from = "Column::PollId",
        to = "super::poll::Column::Id",
        on_delete = "Cascade"
    )]
    Poll,

    #[sea_orm(
        belongs_to = "super::poll_option::Entity",
        from = "Column::OptionId",
        to = "super::poll_option::Column::Id",
        on_delete = "Cascade"
    )]
    PollOption,
}

impl Related<super::poll::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Poll.def()
    }
}

impl Related<super::poll_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollOption.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

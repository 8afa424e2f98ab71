//! Create vote table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vote::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Vote::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Vote::PollId).string_len(32).not_null())
                    .col(ColumnDef::new(Vote::OptionId).string_len(32).not_null())
                    .col(ColumnDef::new(Vote::VoterName).string_len(128).not_null())
                    .col(ColumnDef::new(Vote::VoterEmail).string_len(320).not_null())
                    .col(ColumnDef::new(Vote::UserId).string_len(32))
                    .col(ColumnDef::new(Vote::Response).string_len(8).not_null())
                    .col(ColumnDef::new(Vote::Comment).text())
                    .col(ColumnDef::new(Vote::VoterKey).string_len(128))
                    .col(ColumnDef::new(Vote::VoterSource).string_len(8))
                    .col(ColumnDef::new(Vote::VoterEditToken).string_len(64))
                    .col(
                        ColumnDef::new(Vote::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Vote::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vote_poll")
                            .from(Vote::Table, Vote::PollId)
                            .to(Poll::Table, Poll::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vote_poll_option")
                            .from(Vote::Table, Vote::OptionId)
                            .to(PollOption::Table, PollOption::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (poll_id, voter_email) for email dedup checks
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_poll_email")
                    .table(Vote::Table)
                    .col(Vote::PollId)
                    .col(Vote::VoterEmail)
                    .to_owned(),
            )
            .await?;

        // Index: (poll_id, voter_key) for device/user dedup checks
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_poll_voter_key")
                    .table(Vote::Table)
                    .col(Vote::PollId)
                    .col(Vote::VoterKey)
                    .to_owned(),
            )
            .await?;

        // Index: (option_id, response) for capacity counting
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_option_response")
                    .table(Vote::Table)
                    .col(Vote::OptionId)
                    .col(Vote::Response)
                    .to_owned(),
            )
            .await?;

        // Index: voter_edit_token (for edit-link lookups)
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_edit_token")
                    .table(Vote::Table)
                    .col(Vote::VoterEditToken)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Vote::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Vote {
    Table,
    Id,
    PollId,
    OptionId,
    VoterName,
    VoterEmail,
    UserId,
    Response,
    Comment,
    VoterKey,
    VoterSource,
    VoterEditToken,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
}

#[derive(Iden)]
enum PollOption {
    Table,
    Id,
}

//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `slotvote_test`)
//!   `TEST_DB_PASSWORD` (default: `slotvote_test`)
//!   `TEST_DB_NAME` (default: `slotvote_test`)

#![allow(clippy::unwrap_used, clippy::expect_used)]

use slotvote_db::entities::poll::PollType;
use slotvote_db::repositories::{PollRepository, UserRepository, VoteRepository};
use slotvote_db::test_utils::TestDatabase;

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_migrations_and_token_lookup() {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    db.seed_poll("p1", PollType::Organization, false, true)
        .await
        .unwrap();
    db.seed_option("p1", "o2", None).await.unwrap();
    db.seed_option("p1", "o1", Some(3)).await.unwrap();

    let conn = db.shared_connection().await.unwrap();
    let repo = PollRepository::new(conn);

    let by_public = repo.get_by_token("p1-public").await.unwrap();
    let by_admin = repo.get_by_token("p1-admin").await.unwrap();
    assert_eq!(by_public.id, by_admin.id);

    let options = repo.find_options("p1").await.unwrap();
    assert_eq!(options.len(), 2);

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_user_lookup_is_case_insensitive() {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    db.seed_user("u1", "Anna@Example.com").await.unwrap();

    let repo = UserRepository::new(db.shared_connection().await.unwrap());
    let user = repo.find_by_email("ANNA@example.COM").await.unwrap();
    assert_eq!(user.map(|u| u.id), Some("u1".to_string()));

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_empty_poll_has_no_counts() {
    let db = TestDatabase::create_unique().await.expect("Failed to create database");
    db.seed_poll("p1", PollType::Organization, false, true)
        .await
        .unwrap();

    let repo = VoteRepository::new(db.shared_connection().await.unwrap());
    assert!(repo.count_yes_by_option("p1").await.unwrap().is_empty());
    assert!(repo.find_by_edit_token("p1", "tok").await.unwrap().is_empty());

    db.drop_database().await.unwrap();
}

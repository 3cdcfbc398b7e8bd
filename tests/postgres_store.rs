//! Postgres store tests. They need a running database configured through
//! `configuration.yaml` / `APP__DATABASE__*`; run with `cargo test -- --ignored`.

use chrono::{Duration, Utc};
use community_auth::auth::{
    hash_token, issue_refresh_token, on_identity_deleted, rotate_refresh_token,
};
use community_auth::configuration::{get_configuration, DatabaseSettings, JwtSettings};
use community_auth::error::ErrorKind;
use community_auth::store::{IdentityStore, NewIdentity, PgStore, RefreshTokenStore};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    // Migrate database
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn spawn_store() -> (PgStore, JwtSettings) {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = Uuid::new_v4().to_string();
    let pool = configure_database(&configuration.database).await;

    (PgStore::new(pool), configuration.jwt)
}

async fn insert_member(store: &PgStore, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    store
        .insert_identity(&NewIdentity {
            id,
            email: email.to_string(),
            name: "Member".to_string(),
            password_hash: "not-a-real-hash".to_string(),
        })
        .await
        .expect("Failed to insert identity");
    id
}

#[tokio::test]
#[ignore]
async fn duplicate_email_is_a_conflict() {
    let (store, _) = spawn_store().await;
    insert_member(&store, "member@example.com").await;

    let err = store
        .insert_identity(&NewIdentity {
            id: Uuid::new_v4(),
            email: "member@example.com".to_string(),
            name: "Other".to_string(),
            password_hash: "not-a-real-hash".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
#[ignore]
async fn rotation_is_single_use_against_postgres() {
    let (store, jwt) = spawn_store().await;
    let id = insert_member(&store, "member@example.com").await;
    let secret = issue_refresh_token(&store, id, 604800).await.unwrap();

    let pair = rotate_refresh_token(&store, &store, &jwt, &secret).await.unwrap();
    let replay = rotate_refresh_token(&store, &store, &jwt, &secret).await.unwrap_err();
    assert_eq!(replay.kind(), ErrorKind::Unauthenticated);

    let successor = store
        .find_refresh_token(&hash_token(&pair.refresh_token))
        .await
        .unwrap()
        .unwrap();
    let original = store.find_refresh_token(&hash_token(&secret)).await.unwrap().unwrap();
    assert_eq!(successor.parent_id, Some(original.id));
    assert!(original.is_revoked());
}

#[tokio::test]
#[ignore]
async fn concurrent_rotation_against_postgres_has_one_winner() {
    let (store, jwt) = spawn_store().await;
    let id = insert_member(&store, "member@example.com").await;
    let secret = issue_refresh_token(&store, id, 604800).await.unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            let jwt = jwt.clone();
            let secret = secret.clone();
            tokio::spawn(async move { rotate_refresh_token(&store, &store, &jwt, &secret).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::Unauthenticated),
        }
    }
    assert_eq!(successes, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM refresh_tokens WHERE identity_id = $1")
        .bind(id)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
#[ignore]
async fn identity_deletion_removes_refresh_tokens() {
    let (store, jwt) = spawn_store().await;
    let id = insert_member(&store, "member@example.com").await;
    let secrets = vec![
        issue_refresh_token(&store, id, 604800).await.unwrap(),
        issue_refresh_token(&store, id, 604800).await.unwrap(),
    ];

    assert!(on_identity_deleted(&store, &store, id).await.unwrap());

    for secret in &secrets {
        let err = rotate_refresh_token(&store, &store, &jwt, secret).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }
    assert!(store.find_identity(id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn failed_logins_lock_and_reset() {
    let (store, _) = spawn_store().await;
    let id = insert_member(&store, "member@example.com").await;
    let now = Utc::now();

    for _ in 0..3 {
        store
            .record_failed_login(id, now, 3, now + Duration::minutes(15))
            .await
            .unwrap();
    }
    let identity = store.find_identity(id).await.unwrap().unwrap();
    assert_eq!(identity.failed_login_attempts, 3);
    assert!(identity.is_locked(now));

    // Once the lock has run out, the next failure starts a fresh count
    let later = now + Duration::minutes(30);
    store
        .record_failed_login(id, later, 3, later + Duration::minutes(15))
        .await
        .unwrap();
    let identity = store.find_identity(id).await.unwrap().unwrap();
    assert_eq!(identity.failed_login_attempts, 1);
    assert!(!identity.is_locked(later));

    store.reset_failed_logins(id).await.unwrap();
    let identity = store.find_identity(id).await.unwrap().unwrap();
    assert_eq!(identity.failed_login_attempts, 0);
    assert!(identity.last_failed_login_at.is_none());
}

#[tokio::test]
#[ignore]
async fn revoke_is_conditional() {
    let (store, _) = spawn_store().await;
    let id = insert_member(&store, "member@example.com").await;
    let secret = issue_refresh_token(&store, id, 604800).await.unwrap();
    let hash = hash_token(&secret);

    assert!(store.revoke_refresh_token(&hash, Utc::now()).await.unwrap().is_some());
    assert!(store.revoke_refresh_token(&hash, Utc::now()).await.unwrap().is_none());
    assert!(store
        .find_active_refresh_token(&hash, Utc::now())
        .await
        .unwrap()
        .is_none());
}

#![cfg(feature = "inmem-store")]

use actix_web::{dev::Payload, test, FromRequest};
use agora::auth::{self, Auth, Role};
use agora::models::NewUser;
use agora::repo::{inmem::InMemRepo, UserRepo};
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

/// Fresh, empty repository per test; snapshots go to a throwaway dir.
fn repo() -> InMemRepo {
    std::env::set_var("AGORA_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn uniq(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}{ns}")
}

async fn seed_user(r: &InMemRepo, role: Role, password: &str) -> agora::models::User {
    r.create_user(NewUser {
        email: format!("{}@example.com", uniq("u")),
        user_name: uniq("name"),
        password_hash: auth::hash_password(password).unwrap(),
        role,
    })
    .await
    .unwrap()
}

#[actix_web::test]
#[serial_test::serial]
async fn access_token_roundtrips_through_extractor() {
    set_secret();
    let r = repo();
    let user = seed_user(&r, Role::User, "hunter22").await;
    let pair = auth::issue_pair(&user).expect("pair");

    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", pair.access_token)))
        .to_http_request();
    let mut pl = Payload::None;
    let extracted = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(extracted.0.sub, user.id);
    assert_eq!(extracted.0.email, user.email);
    assert_eq!(extracted.0.role, Role::User);
}

#[actix_web::test]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
async fn extractor_requires_header() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial_test::serial]
async fn login_persists_the_returned_refresh_token() {
    set_secret();
    let r = repo();
    let user = seed_user(&r, Role::User, "hunter22").await;

    let pair = auth::login(&r, &user.email, "hunter22").await.expect("login");
    let stored = r.find_user(user.id).await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
}

#[actix_web::test]
#[serial_test::serial]
async fn login_with_wrong_password_changes_nothing() {
    set_secret();
    let r = repo();
    let user = seed_user(&r, Role::User, "hunter22").await;
    let pair = auth::login(&r, &user.email, "hunter22").await.unwrap();

    let err = auth::login(&r, &user.email, "wrong-password").await.unwrap_err();
    assert!(matches!(err, auth::AuthError::InvalidCredentials));

    // the previously stored refresh token is untouched
    let stored = r.find_user(user.id).await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
}

#[actix_web::test]
#[serial_test::serial]
async fn login_with_unknown_email_fails_like_wrong_password() {
    set_secret();
    let r = repo();
    let err = auth::login(&r, "nobody@example.com", "whatever").await.unwrap_err();
    assert!(matches!(err, auth::AuthError::InvalidCredentials));
}

#[actix_web::test]
#[serial_test::serial]
async fn refresh_rotates_and_persists_the_new_token() {
    set_secret();
    let r = repo();
    let user = seed_user(&r, Role::User, "hunter22").await;
    let first = auth::login(&r, &user.email, "hunter22").await.unwrap();

    let second = auth::refresh(&r, &first.refresh_token).await.expect("refresh");
    // both halves of the pair rotate
    assert_ne!(second.access_token, first.access_token);
    assert_ne!(second.refresh_token, first.refresh_token);
    // and it is the new refresh token that is persisted
    let stored = r.find_user(user.id).await.unwrap();
    assert_eq!(
        stored.refresh_token.as_deref(),
        Some(second.refresh_token.as_str())
    );
}

#[actix_web::test]
#[serial_test::serial]
async fn refresh_rejects_garbage_tokens() {
    set_secret();
    let r = repo();
    let err = auth::refresh(&r, "not.a.jwt").await.unwrap_err();
    assert!(matches!(err, auth::AuthError::InvalidRefreshToken));
}

#[actix_web::test]
#[serial_test::serial]
async fn refresh_rejects_access_tokens_of_deleted_subjects() {
    set_secret();
    let r = repo();
    let user = seed_user(&r, Role::User, "hunter22").await;
    let pair = auth::login(&r, &user.email, "hunter22").await.unwrap();

    r.soft_delete_user(user.id).await.unwrap();

    // token still carries a valid signature and expiry, but the subject is gone
    let err = auth::refresh(&r, &pair.refresh_token).await.unwrap_err();
    assert!(matches!(err, auth::AuthError::InvalidRefreshToken));
}

#[actix_web::test]
#[serial_test::serial]
async fn credentials_survive_a_snapshot_reload() {
    set_secret();
    // keep the data dir alive across both repository instances
    let dir = tempfile::tempdir().unwrap();
    env::set_var("AGORA_DATA_DIR", dir.path());

    let user = {
        let r = InMemRepo::new();
        let user = seed_user(&r, Role::User, "hunter22").await;
        auth::login(&r, &user.email, "hunter22").await.expect("login");
        user
    };

    // a fresh process loading the same snapshot
    let r = InMemRepo::new();
    let reloaded = r.find_user(user.id).await.expect("reload");
    assert!(!reloaded.password_hash.is_empty());
    assert!(reloaded.refresh_token.is_some());
    // and the reloaded credentials still authenticate
    auth::login(&r, &user.email, "hunter22")
        .await
        .expect("login after reload");
}

#[core::prelude::v1::test]
fn password_hash_verifies_and_rejects() {
    let hash = auth::hash_password("correct horse").unwrap();
    assert!(auth::verify_password("correct horse", &hash));
    assert!(!auth::verify_password("battery staple", &hash));
    assert!(!auth::verify_password("correct horse", "not-a-phc-string"));
}

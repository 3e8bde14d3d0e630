#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use agora::auth::{self, Role};
use agora::models::{Board, Category, Comment, NewBoard, NewUser, User};
use agora::repo::{inmem::InMemRepo, BoardRepo, CommentRepo, Repo, UserRepo};
use agora::storage::{ImageStore, ImageStoreError};
use agora::{config, AppState};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockImageStore {
    deleted: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ImageStore for MockImageStore {
    async fn save(&self, key: &str, _mime: &str, _bytes: &[u8]) -> Result<String, ImageStoreError> {
        Ok(format!("mock://{key}"))
    }
    async fn delete(&self, url: &str) -> Result<(), ImageStoreError> {
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

fn ensure_secret() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn repo() -> Arc<InMemRepo> {
    std::env::set_var("AGORA_DATA_DIR", tempfile::tempdir().unwrap().path());
    Arc::new(InMemRepo::new())
}

fn uniq(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}{ns}")
}

async fn seed_user(r: &InMemRepo, role: Role) -> User {
    r.create_user(NewUser {
        email: format!("{}@example.com", uniq("u")),
        user_name: uniq("name"),
        password_hash: auth::hash_password("password1").unwrap(),
        role,
    })
    .await
    .unwrap()
}

fn bearer(user: &User) -> (&'static str, String) {
    let token = auth::issue_pair(user).unwrap().access_token;
    ("Authorization", format!("Bearer {token}"))
}

macro_rules! app {
    ($repo:expr, $store:expr) => {{
        let repo: Arc<dyn Repo> = $repo.clone();
        let image_store: Arc<dyn ImageStore> = $store.clone();
        let state = AppState { repo, image_store };
        test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new(state))
                .configure(config),
        )
        .await
    }};
}

#[actix_web::test]
#[serial_test::serial]
async fn register_login_refresh_me_flow() {
    ensure_secret();
    let repo = repo();
    let store: Arc<MockImageStore> = Arc::new(MockImageStore::default());
    let app = app!(repo, store);

    let email = format!("{}@example.com", uniq("reg"));

    // weak password is rejected before touching the store
    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(&json!({"user_name":"kim","email":email,"password":"short","role":"user"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(&json!({"user_name":"kim","email":email,"password":"password1","role":"user"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    // the credential never leaves the server
    assert!(body.get("password_hash").is_none());
    assert!(body.get("refresh_token").is_none());

    // duplicate email
    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .set_json(&json!({"user_name":"kim2","email":email,"password":"password1","role":"user"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // login
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(&json!({"email":email,"password":"password1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let pair: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let access = pair["access_token"].as_str().unwrap().to_string();
    let refresh = pair["refresh_token"].as_str().unwrap().to_string();

    // bad password -> one generic 401
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(&json!({"email":email,"password":"password2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // me
    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(("Authorization", format!("Bearer {access}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let me: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["email"].as_str().unwrap(), email);
    assert_eq!(me["role"].as_str().unwrap(), "user");

    // rotation over HTTP
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .set_json(&json!({"refresh_token":refresh}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let rotated: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_ne!(rotated["refresh_token"].as_str().unwrap(), refresh);

    // garbage refresh token -> 401
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .set_json(&json!({"refresh_token":"nope"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
#[serial_test::serial]
async fn board_ownership_and_privilege_matrix() {
    ensure_secret();
    let repo = repo();
    let store: Arc<MockImageStore> = Arc::new(MockImageStore::default());
    let app = app!(repo, store);
    let author = seed_user(&repo, Role::User).await;
    let stranger = seed_user(&repo, Role::User).await;
    let admin = seed_user(&repo, Role::Admin).await;

    // author creates an ordinary board
    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer(&author))
        .set_json(&json!({"title":"T","content":"C","category":"free"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let board: Board = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // a stranger may neither update nor delete it
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", board.id))
        .insert_header(bearer(&stranger))
        .set_json(&json!({"title":"X"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/boards/{}", board.id))
        .insert_header(bearer(&stranger))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // the author and an admin both may update
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", board.id))
        .insert_header(bearer(&author))
        .set_json(&json!({"title":"by author"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", board.id))
        .insert_header(bearer(&admin))
        .set_json(&json!({"title":"by admin"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // notices: plain users cannot create them
    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer(&author))
        .set_json(&json!({"title":"N","content":"C","category":"notices"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer(&admin))
        .set_json(&json!({"title":"N","content":"C","category":"notices"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    // a user cannot move their own board into the privileged category
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", board.id))
        .insert_header(bearer(&author))
        .set_json(&json!({"category":"notices"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // even the *author* of a notice cannot touch it without the admin role
    let owned_notice = repo
        .create_board(NewBoard {
            title: "owned notice".into(),
            content: "c".into(),
            category: Category::Notices,
            author_id: author.id,
            image_url: None,
        })
        .await
        .unwrap();
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", owned_notice.id))
        .insert_header(bearer(&author))
        .set_json(&json!({"title":"edit"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/boards/{}", owned_notice.id))
        .insert_header(bearer(&author))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/boards/{}", owned_notice.id))
        .insert_header(bearer(&admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
#[serial_test::serial]
async fn board_read_bumps_view_counter() {
    ensure_secret();
    let repo = repo();
    let store: Arc<MockImageStore> = Arc::new(MockImageStore::default());
    let app = app!(repo, store);
    let author = seed_user(&repo, Role::User).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer(&author))
        .set_json(&json!({"title":"T","content":"C","category":"qna"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let board: Board = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(board.views, 0);

    // each successful read bumps the counter for the next one
    for expected in 0..3i64 {
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/boards/{}", board.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let b: Board = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert_eq!(b.views, expected);
    }
}

#[actix_web::test]
#[serial_test::serial]
async fn comment_flow_with_threading_and_authorization() {
    ensure_secret();
    let repo = repo();
    let store: Arc<MockImageStore> = Arc::new(MockImageStore::default());
    let app = app!(repo, store);
    let author = seed_user(&repo, Role::User).await;
    let other = seed_user(&repo, Role::User).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer(&author))
        .set_json(&json!({"title":"T","content":"C","category":"free"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let board: Board = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // anonymous commenting is rejected
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/boards/{}/comments", board.id))
        .set_json(&json!({"content":"anon"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/boards/{}/comments", board.id))
        .insert_header(bearer(&author))
        .set_json(&json!({"content":"top"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let top: Comment = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/boards/{}/comments", board.id))
        .insert_header(bearer(&other))
        .set_json(&json!({"content":"reply","parent_id":top.id}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let reply: Comment = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(reply.parent_id, Some(top.id));

    // listing groups the reply under its parent
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/boards/{}/comments", board.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let threads: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(threads.as_array().unwrap().len(), 1);
    assert_eq!(threads[0]["replies"].as_array().unwrap().len(), 1);

    // only the author (or an admin) may edit or delete a comment
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/comments/{}", top.id))
        .insert_header(bearer(&other))
        .set_json(&json!({"content":"defaced"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/comments/{}", top.id))
        .insert_header(bearer(&author))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // the parent and its reply are both gone from the listing
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/boards/{}/comments", board.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let threads: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(threads.as_array().unwrap().is_empty());
    assert!(repo.get_comment(reply.id).await.is_err());
}

#[actix_web::test]
#[serial_test::serial]
async fn replacing_a_board_image_deletes_the_old_object() {
    ensure_secret();
    let repo = repo();
    let store: Arc<MockImageStore> = Arc::new(MockImageStore::default());
    let app = app!(repo, store);
    let author = seed_user(&repo, Role::User).await;
    let stranger = seed_user(&repo, Role::User).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer(&author))
        .set_json(&json!({"title":"T","content":"C","category":"free","image_url":"mock://old"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let board: Board = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // a rejected update must not touch the stored object
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", board.id))
        .insert_header(bearer(&stranger))
        .set_json(&json!({"image_url":"mock://hijack"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    assert!(store.deleted.lock().unwrap().is_empty());

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", board.id))
        .insert_header(bearer(&author))
        .set_json(&json!({"image_url":"mock://new"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let updated: Board = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(updated.image_url.as_deref(), Some("mock://new"));
    assert_eq!(store.deleted.lock().unwrap().as_slice(), ["mock://old"]);
}

// End-to-end lifecycle: ordinary user content, a foreign actor, an admin,
// then a cascading account deletion.
#[actix_web::test]
#[serial_test::serial]
async fn account_deletion_cascades_over_http() {
    ensure_secret();
    let repo = repo();
    let store: Arc<MockImageStore> = Arc::new(MockImageStore::default());
    let app = app!(repo, store);
    let a = seed_user(&repo, Role::User).await;
    let c = seed_user(&repo, Role::User).await;
    let admin = seed_user(&repo, Role::Admin).await;

    // A creates board B1
    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer(&a))
        .set_json(&json!({"title":"B1","content":"body","category":"free"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let b1: Board = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // comments by A and by C on B1
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/boards/{}/comments", b1.id))
        .insert_header(bearer(&a))
        .set_json(&json!({"content":"mine"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let a_comment: Comment = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/boards/{}/comments", b1.id))
        .insert_header(bearer(&c))
        .set_json(&json!({"content":"theirs"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let c_comment: Comment = serde_json::from_slice(&test::read_body(resp).await).unwrap();

    // C cannot update B1, an admin can
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", b1.id))
        .insert_header(bearer(&c))
        .set_json(&json!({"content":"hijack"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{}", b1.id))
        .insert_header(bearer(&admin))
        .set_json(&json!({"content":"moderated"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // C cannot delete A's account; A can
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/users/{}", a.id))
        .insert_header(bearer(&c))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/users/{}", a.id))
        .insert_header(bearer(&a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let deleted_a: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let stamp = deleted_a["deleted_at"].as_str().unwrap().to_string();

    // B1 and A's comment went down with the account, stamped together
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/boards/{}", b1.id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let b1_row = repo.get_board_any(b1.id).await.unwrap();
    let a_comment_row = repo.get_comment_any(a_comment.id).await.unwrap();
    let stamp: chrono::DateTime<chrono::Utc> = stamp.parse().unwrap();
    assert_eq!(b1_row.deleted_at, Some(stamp));
    assert_eq!(b1_row.deleted_at, a_comment_row.deleted_at);

    // C's comment on B1 is untouched
    assert!(repo.get_comment(c_comment.id).await.is_ok());

    // and A's account is gone for login purposes
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{}", a.id))
        .insert_header(bearer(&admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use sha2::{Digest, Sha256};

use crate::auth::{self, Auth, Role, TokenPair};
use crate::authz;
use crate::error::ApiError;
use crate::lifecycle;
use crate::models::*;
use crate::repo::Repo;
use crate::storage::ImageStore;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/users")
                    .route(web::post().to(register))
                    .route(web::get().to(list_users)),
            )
            .service(
                web::resource("/users/{id}")
                    .route(web::get().to(get_user))
                    .route(web::patch().to(update_user))
                    .route(web::delete().to(delete_user)),
            )
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_token)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(
                web::resource("/boards")
                    .route(web::get().to(list_boards))
                    .route(web::post().to(create_board)),
            )
            .service(
                web::resource("/boards/{id}")
                    .route(web::get().to(get_board))
                    .route(web::patch().to(update_board))
                    .route(web::delete().to(delete_board)),
            )
            .service(
                web::resource("/boards/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(
                web::resource("/comments/{id}")
                    .route(web::patch().to(update_comment))
                    .route(web::delete().to(delete_comment)),
            )
            .service(web::resource("/images").route(web::post().to(upload_image))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
}

const MIN_PASSWORD_LEN: usize = 6;

// ---------------- users -----------------------------------------------

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = User),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    if req.password.len() < MIN_PASSWORD_LEN || req.user_name.is_empty() || !req.email.contains('@')
    {
        return Err(ApiError::BadRequest);
    }
    let password_hash = auth::hash_password(&req.password)?;
    let user = data
        .repo
        .create_user(NewUser {
            email: req.email,
            user_name: req.user_name,
            password_hash,
            role: req.role,
        })
        .await?;
    Ok(HttpResponse::Created().json(user))
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "List users", body = [User]),
        (status = 403, description = "Forbidden - Admins only")
    )
)]
pub async fn list_users(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    authz::require_role(&auth.0, Role::Admin)?;
    let users = data.repo.list_users().await?;
    Ok(HttpResponse::Ok().json(users))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.find_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct UpdateUserRequest {
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/{id}",
    request_body = UpdateUserRequest,
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    authz::require_owner_or_admin(&auth.0, id)?;
    let req = payload.into_inner();
    let password_hash = match req.password {
        Some(p) if p.len() < MIN_PASSWORD_LEN => return Err(ApiError::BadRequest),
        Some(p) => Some(auth::hash_password(&p)?),
        None => None,
    };
    let user = data
        .repo
        .update_user(
            id,
            UpdateUser {
                email: req.email,
                user_name: req.user_name,
                password_hash,
                role: req.role,
            },
        )
        .await?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User soft-deleted (boards and comments cascade)", body = User),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = lifecycle::delete_user(data.repo.as_ref(), &auth.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

// ---------------- auth ------------------------------------------------

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let pair = auth::login(data.repo.as_ref(), &payload.email, &payload.password).await?;
    Ok(HttpResponse::Ok().json(pair))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Invalid refresh token")
    )
)]
pub async fn refresh_token(
    data: web::Data<AppState>,
    payload: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    let pair = auth::refresh(data.repo.as_ref(), &payload.refresh_token).await?;
    Ok(HttpResponse::Ok().json(pair))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    pub id: Id,
    pub email: String,
    pub role: Role,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current identity", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    let me = MeResponse {
        id: auth.0.sub,
        email: auth.0.email.clone(),
        role: auth.0.role,
    };
    Ok(HttpResponse::Ok().json(me))
}

// ---------------- boards ----------------------------------------------

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct CreateBoardRequest {
    pub title: String,
    pub content: String,
    pub category: Category,
    pub image_url: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/boards",
    request_body = CreateBoardRequest,
    responses(
        (status = 201, description = "Board created", body = Board),
        (status = 403, description = "Forbidden - notices are admin-only")
    )
)]
pub async fn create_board(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreateBoardRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    authz::require_category_privilege(&auth.0, req.category)?;
    let board = data
        .repo
        .create_board(NewBoard {
            title: req.title,
            content: req.content,
            category: req.category,
            author_id: auth.0.sub,
            image_url: req.image_url,
        })
        .await?;
    Ok(HttpResponse::Created().json(board))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards",
    responses((status = 200, description = "List boards, newest first", body = [Board]))
)]
pub async fn list_boards(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let boards = data.repo.list_boards().await?;
    Ok(HttpResponse::Ok().json(boards))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards/{id}",
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board (view counter bumped)", body = Board),
        (status = 404, description = "Board not found")
    )
)]
pub async fn get_board(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let board = lifecycle::get_board(data.repo.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(board))
}

#[utoipa::path(
    patch,
    path = "/api/v1/boards/{id}",
    request_body = UpdateBoard,
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board updated", body = Board),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Board not found")
    )
)]
pub async fn update_board(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateBoard>,
) -> Result<HttpResponse, ApiError> {
    let board = lifecycle::update_board(
        data.repo.as_ref(),
        &data.image_store,
        &auth.0,
        path.into_inner(),
        payload.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(board))
}

#[utoipa::path(
    delete,
    path = "/api/v1/boards/{id}",
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board soft-deleted (comments cascade)", body = Board),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Board not found")
    )
)]
pub async fn delete_board(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let board = lifecycle::delete_board(data.repo.as_ref(), &auth.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(board))
}

// ---------------- comments --------------------------------------------

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_id: Option<Id>,
}

#[utoipa::path(
    post,
    path = "/api/v1/boards/{id}/comments",
    request_body = CreateCommentRequest,
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 404, description = "Board or parent comment not found")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CreateCommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let comment = data
        .repo
        .create_comment(NewComment {
            content: req.content,
            board_id: path.into_inner(),
            author_id: auth.0.sub,
            parent_id: req.parent_id,
        })
        .await?;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards/{id}/comments",
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Top-level comments with direct replies", body = [CommentThread]),
        (status = 404, description = "Board not found")
    )
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let board_id = path.into_inner();
    // listing comments of a deleted board is a 404, not an empty list
    data.repo.get_board(board_id).await?;
    let threads = data.repo.list_comments(board_id).await?;
    Ok(HttpResponse::Ok().json(threads))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[utoipa::path(
    patch,
    path = "/api/v1/comments/{id}",
    request_body = UpdateCommentRequest,
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment updated", body = Comment),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn update_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateCommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let comment = lifecycle::update_comment(
        data.repo.as_ref(),
        &auth.0,
        path.into_inner(),
        payload.into_inner().content,
    )
    .await?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment soft-deleted (direct replies cascade)", body = Comment),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn delete_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let comment = lifecycle::delete_comment(data.repo.as_ref(), &auth.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comment))
}

// ---------------- images ----------------------------------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImageUploadResponse {
    pub url: String,
    pub mime: String,
    pub size: usize,
}

const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/images",
    responses(
        (status = 201, description = "Image stored, URL returned", body = ImageUploadResponse),
        (status = 415, description = "Unsupported media type"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn upload_image(
    _auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        match field.content_disposition().get_name() {
            Some("image") => {}
            _ => continue,
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        // content-addressed object key
        let key = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let url = match data.image_store.save(&key, &mime, &bytes).await {
            Ok(url) => url,
            Err(e) => {
                log::error!("image_store save error: {e}");
                return Err(ApiError::Internal);
            }
        };
        let resp = ImageUploadResponse {
            url,
            mime,
            size: bytes.len(),
        };
        return Ok(HttpResponse::Created().json(resp));
    }
    Ok(HttpResponse::BadRequest().finish())
}

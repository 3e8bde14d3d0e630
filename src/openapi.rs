use crate::auth::{Role, TokenPair};
use crate::models::{
    Board, Category, Comment, CommentThread, NewBoard, NewComment, NewUser, UpdateBoard,
    UpdateUser, User,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::list_users,
        crate::routes::get_user,
        crate::routes::update_user,
        crate::routes::delete_user,
        crate::routes::login,
        crate::routes::refresh_token,
        crate::routes::auth_me,
        crate::routes::create_board,
        crate::routes::list_boards,
        crate::routes::get_board,
        crate::routes::update_board,
        crate::routes::delete_board,
        crate::routes::create_comment,
        crate::routes::list_comments,
        crate::routes::update_comment,
        crate::routes::delete_comment,
        crate::routes::upload_image,
    ),
    components(schemas(
        User, NewUser, UpdateUser, Role,
        Board, NewBoard, UpdateBoard, Category,
        Comment, NewComment, CommentThread,
        TokenPair,
        crate::routes::RegisterRequest, crate::routes::UpdateUserRequest,
        crate::routes::LoginRequest, crate::routes::RefreshRequest,
        crate::routes::MeResponse,
        crate::routes::CreateBoardRequest,
        crate::routes::CreateCommentRequest, crate::routes::UpdateCommentRequest,
        crate::routes::ImageUploadResponse,
    )),
    tags(
        (name = "users", description = "User accounts"),
        (name = "auth", description = "Login, refresh and identity"),
        (name = "boards", description = "Board posts"),
        (name = "comments", description = "Comments and replies"),
    )
)]
pub struct ApiDoc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

/// Board categories. `Notices` is privileged: its lifecycle operations
/// (create/update/delete) require the admin role regardless of authorship.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "post_category", rename_all = "lowercase")
)]
pub enum Category {
    Notices,
    Free,
    Qna,
}

impl Category {
    pub fn is_privileged(self) -> bool {
        matches!(self, Category::Notices)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct User {
    pub id: Id,
    pub email: String,
    pub user_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    // Last refresh token issued to this user; overwritten on every rotation.
    #[serde(skip_serializing, default)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>, // soft delete marker
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    pub user_name: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub user_name: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Board {
    pub id: Id,
    pub title: String,
    pub content: String,
    pub category: Category,
    pub author_id: Id,
    pub image_url: Option<String>, // opaque object-store URL
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>, // soft delete marker
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewBoard {
    pub title: String,
    pub content: String,
    pub category: Category,
    pub author_id: Id,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateBoard {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<Category>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Comment {
    pub id: Id,
    pub content: String,
    pub board_id: Id,
    pub author_id: Id,
    // One level of threading: a comment with `parent_id` set is never itself
    // a parent.
    pub parent_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>, // soft delete marker
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub content: String,
    pub board_id: Id,
    pub author_id: Id,
    pub parent_id: Option<Id>,
}

/// A top-level comment with its direct replies, as returned by the
/// comments-by-board listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentThread {
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

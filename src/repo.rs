use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Rows removed by one purge sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub boards: u64,
    pub comments: u64,
}

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    /// Lookup by email, excluding soft-deleted rows.
    async fn find_user_by_email(&self, email: &str) -> RepoResult<User>;
    /// Lookup by id, excluding soft-deleted rows.
    async fn find_user(&self, id: Id) -> RepoResult<User>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User>;
    /// Overwrite the persisted refresh token (login / rotation).
    async fn set_refresh_token(&self, id: Id, token: &str) -> RepoResult<()>;
    /// Soft-delete the user and every non-deleted Board and Comment they
    /// authored, atomically, all stamped with the same timestamp.
    async fn soft_delete_user(&self, id: Id) -> RepoResult<User>;
}

#[async_trait]
pub trait BoardRepo: Send + Sync {
    async fn create_board(&self, new: NewBoard) -> RepoResult<Board>;
    /// Lookup by id, excluding soft-deleted rows.
    async fn get_board(&self, id: Id) -> RepoResult<Board>;
    /// Lookup by id regardless of deletion state (audit reads).
    async fn get_board_any(&self, id: Id) -> RepoResult<Board>;
    async fn list_boards(&self) -> RepoResult<Vec<Board>>;
    async fn update_board(&self, id: Id, upd: UpdateBoard) -> RepoResult<Board>;
    /// View-counter bump; not required to serialize with concurrent reads.
    async fn increment_views(&self, id: Id) -> RepoResult<()>;
    /// Soft-delete the board and every non-deleted comment on it, atomically,
    /// all stamped with the same timestamp.
    async fn soft_delete_board(&self, id: Id) -> RepoResult<Board>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    /// Lookup by id, excluding soft-deleted rows.
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    /// Lookup by id regardless of deletion state (audit reads).
    async fn get_comment_any(&self, id: Id) -> RepoResult<Comment>;
    /// Non-deleted top-level comments of a board with their non-deleted
    /// direct replies.
    async fn list_comments(&self, board_id: Id) -> RepoResult<Vec<CommentThread>>;
    async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment>;
    /// Soft-delete the comment and its direct replies, atomically, all
    /// stamped with the same timestamp. The cascade does not recurse: only
    /// one level of threading is modeled.
    async fn soft_delete_comment(&self, id: Id) -> RepoResult<Comment>;
}

#[async_trait]
pub trait PurgeRepo: Send + Sync {
    /// Hard-delete Board and Comment rows soft-deleted at or before `cutoff`.
    /// Never touches rows with `deleted_at = NULL`. User rows are exempt from
    /// purge (retained behavior of the upstream service).
    async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> RepoResult<PurgeStats>;
}

pub trait Repo: UserRepo + BoardRepo + CommentRepo + PurgeRepo {}

impl<T> Repo for T where T: UserRepo + BoardRepo + CommentRepo + PurgeRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default)]
    struct State {
        users: HashMap<Id, User>,
        boards: HashMap<Id, Board>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    // `User` skips its secret fields when serialized (it doubles as the API
    // response shape), so the snapshot stores users through a row type that
    // keeps every column. Boards and comments serialize fully as-is.
    #[derive(Serialize, Deserialize)]
    struct UserRow {
        id: Id,
        email: String,
        user_name: String,
        password_hash: String,
        role: crate::auth::Role,
        refresh_token: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    }

    impl From<User> for UserRow {
        fn from(u: User) -> Self {
            Self {
                id: u.id,
                email: u.email,
                user_name: u.user_name,
                password_hash: u.password_hash,
                role: u.role,
                refresh_token: u.refresh_token,
                created_at: u.created_at,
                updated_at: u.updated_at,
                deleted_at: u.deleted_at,
            }
        }
    }

    impl From<UserRow> for User {
        fn from(r: UserRow) -> Self {
            Self {
                id: r.id,
                email: r.email,
                user_name: r.user_name,
                password_hash: r.password_hash,
                role: r.role,
                refresh_token: r.refresh_token,
                created_at: r.created_at,
                updated_at: r.updated_at,
                deleted_at: r.deleted_at,
            }
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Snapshot {
        users: HashMap<Id, UserRow>,
        boards: HashMap<Id, Board>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    impl From<Snapshot> for State {
        fn from(s: Snapshot) -> Self {
            Self {
                users: s.users.into_iter().map(|(k, v)| (k, v.into())).collect(),
                boards: s.boards,
                comments: s.comments,
                next_id: s.next_id,
            }
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("AGORA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("AGORA_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s.into()
                    }
                    Err(e) => {
                        log::warn!(
                            "failed to parse snapshot '{}': {e}; starting empty",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            let snap = {
                let s = self.state.read().unwrap();
                Snapshot {
                    users: s.users.iter().map(|(k, v)| (*k, v.clone().into())).collect(),
                    boards: s.boards.clone(),
                    comments: s.comments.clone(),
                    next_id: s.next_id,
                }
            };
            if let Ok(bytes) = serde_json::to_vec_pretty(&snap) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, bytes) {
                    log::warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            // email is unique across all rows, soft-deleted included,
            // mirroring the database unique constraint
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let user = User {
                id,
                email: new.email,
                user_name: new.user_name,
                password_hash: new.password_hash,
                role: new.role,
                refresh_token: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.email == email && u.deleted_at.is_none())
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn find_user(&self, id: Id) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .get(&id)
                .filter(|u| u.deleted_at.is_none())
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .users
                .values()
                .filter(|u| u.deleted_at.is_none())
                .cloned()
                .collect();
            v.sort_by_key(|u| u.id);
            Ok(v)
        }

        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();

            // uniqueness check before taking the mutable borrow
            if let Some(ref email) = upd.email {
                if s.users.values().any(|u| u.email == *email && u.id != id) {
                    return Err(RepoError::Conflict);
                }
            }

            let user = s
                .users
                .get_mut(&id)
                .filter(|u| u.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;

            if let Some(email) = upd.email { user.email = email; }
            if let Some(name) = upd.user_name { user.user_name = name; }
            if let Some(hash) = upd.password_hash { user.password_hash = hash; }
            if let Some(role) = upd.role { user.role = role; }
            user.updated_at = Utc::now();

            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn set_refresh_token(&self, id: Id, token: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let user = s
                .users
                .get_mut(&id)
                .filter(|u| u.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            user.refresh_token = Some(token.to_string());
            user.updated_at = Utc::now();
            drop(s);
            self.persist();
            Ok(())
        }

        async fn soft_delete_user(&self, id: Id) -> RepoResult<User> {
            // single write lock: the whole cascade is one atomic step
            let mut s = self.state.write().unwrap();
            let now = Utc::now();
            let user = s
                .users
                .get_mut(&id)
                .filter(|u| u.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            user.deleted_at = Some(now);
            user.updated_at = now;
            let deleted = user.clone();
            for b in s.boards.values_mut() {
                if b.author_id == id && b.deleted_at.is_none() {
                    b.deleted_at = Some(now);
                }
            }
            for c in s.comments.values_mut() {
                if c.author_id == id && c.deleted_at.is_none() {
                    c.deleted_at = Some(now);
                }
            }
            drop(s);
            self.persist();
            Ok(deleted)
        }
    }

    #[async_trait]
    impl BoardRepo for InMemRepo {
        async fn create_board(&self, new: NewBoard) -> RepoResult<Board> {
            let mut s = self.state.write().unwrap();
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let board = Board {
                id,
                title: new.title,
                content: new.content,
                category: new.category,
                author_id: new.author_id,
                image_url: new.image_url,
                views: 0,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            s.boards.insert(id, board.clone());
            drop(s);
            self.persist();
            Ok(board)
        }

        async fn get_board(&self, id: Id) -> RepoResult<Board> {
            let s = self.state.read().unwrap();
            s.boards
                .get(&id)
                .filter(|b| b.deleted_at.is_none())
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn get_board_any(&self, id: Id) -> RepoResult<Board> {
            let s = self.state.read().unwrap();
            s.boards.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_boards(&self) -> RepoResult<Vec<Board>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .boards
                .values()
                .filter(|b| b.deleted_at.is_none())
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at)); // latest first
            Ok(v)
        }

        async fn update_board(&self, id: Id, upd: UpdateBoard) -> RepoResult<Board> {
            let mut s = self.state.write().unwrap();
            let board = s
                .boards
                .get_mut(&id)
                .filter(|b| b.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title { board.title = title; }
            if let Some(content) = upd.content { board.content = content; }
            if let Some(category) = upd.category { board.category = category; }
            if let Some(url) = upd.image_url { board.image_url = Some(url); }
            board.updated_at = Utc::now();
            let updated = board.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn increment_views(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let board = s
                .boards
                .get_mut(&id)
                .filter(|b| b.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            board.views += 1;
            // counter only; skip snapshot persist on the hot read path
            Ok(())
        }

        async fn soft_delete_board(&self, id: Id) -> RepoResult<Board> {
            let mut s = self.state.write().unwrap();
            let now = Utc::now();
            let board = s
                .boards
                .get_mut(&id)
                .filter(|b| b.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            board.deleted_at = Some(now);
            board.updated_at = now;
            let deleted = board.clone();
            for c in s.comments.values_mut() {
                if c.board_id == id && c.deleted_at.is_none() {
                    c.deleted_at = Some(now);
                }
            }
            drop(s);
            self.persist();
            Ok(deleted)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            match s.boards.get(&new.board_id) {
                Some(b) if b.deleted_at.is_none() => {}
                _ => return Err(RepoError::NotFound),
            }
            if let Some(parent_id) = new.parent_id {
                match s.comments.get(&parent_id) {
                    Some(p) if p.deleted_at.is_none() && p.board_id == new.board_id => {}
                    _ => return Err(RepoError::NotFound),
                }
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                content: new.content,
                board_id: new.board_id,
                author_id: new.author_id,
                parent_id: new.parent_id,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let s = self.state.read().unwrap();
            s.comments
                .get(&id)
                .filter(|c| c.deleted_at.is_none())
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn get_comment_any(&self, id: Id) -> RepoResult<Comment> {
            let s = self.state.read().unwrap();
            s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_comments(&self, board_id: Id) -> RepoResult<Vec<CommentThread>> {
            let s = self.state.read().unwrap();
            let mut top: Vec<_> = s
                .comments
                .values()
                .filter(|c| {
                    c.board_id == board_id && c.parent_id.is_none() && c.deleted_at.is_none()
                })
                .cloned()
                .collect();
            top.sort_by(|a, b| a.created_at.cmp(&b.created_at)); // ascending
            let threads = top
                .into_iter()
                .map(|comment| {
                    let mut replies: Vec<_> = s
                        .comments
                        .values()
                        .filter(|c| c.parent_id == Some(comment.id) && c.deleted_at.is_none())
                        .cloned()
                        .collect();
                    replies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                    CommentThread { comment, replies }
                })
                .collect();
            Ok(threads)
        }

        async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            let comment = s
                .comments
                .get_mut(&id)
                .filter(|c| c.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            comment.content = content;
            comment.updated_at = Utc::now();
            let updated = comment.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn soft_delete_comment(&self, id: Id) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            let now = Utc::now();
            let comment = s
                .comments
                .get_mut(&id)
                .filter(|c| c.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            comment.deleted_at = Some(now);
            comment.updated_at = now;
            let deleted = comment.clone();
            // direct replies only; the cascade never recurses
            for c in s.comments.values_mut() {
                if c.parent_id == Some(id) && c.deleted_at.is_none() {
                    c.deleted_at = Some(now);
                }
            }
            drop(s);
            self.persist();
            Ok(deleted)
        }
    }

    #[async_trait]
    impl PurgeRepo for InMemRepo {
        async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> RepoResult<PurgeStats> {
            let mut s = self.state.write().unwrap();
            let before_boards = s.boards.len();
            let before_comments = s.comments.len();
            s.boards
                .retain(|_, b| !matches!(b.deleted_at, Some(ts) if ts <= cutoff));
            s.comments
                .retain(|_, c| !matches!(c.deleted_at, Some(ts) if ts <= cutoff));
            let stats = PurgeStats {
                boards: (before_boards - s.boards.len()) as u64,
                comments: (before_comments - s.comments.len()) as u64,
            };
            drop(s);
            self.persist();
            Ok(stats)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            _ => RepoError::Internal(e.to_string()),
        }
    }

    const USER_COLS: &str =
        "id, email, user_name, password_hash, role, refresh_token, created_at, updated_at, deleted_at";
    const BOARD_COLS: &str =
        "id, title, content, category, author_id, image_url, views, created_at, updated_at, deleted_at";
    const COMMENT_COLS: &str =
        "id, content, board_id, author_id, parent_id, created_at, updated_at, deleted_at";

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let sql = format!(
                "INSERT INTO users (email, user_name, password_hash, role) \
                 VALUES ($1,$2,$3,$4) RETURNING {USER_COLS}"
            );
            sqlx::query_as::<_, User>(&sql)
                .bind(&new.email)
                .bind(&new.user_name)
                .bind(&new.password_hash)
                .bind(new.role)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<User> {
            let sql =
                format!("SELECT {USER_COLS} FROM users WHERE email = $1 AND deleted_at IS NULL");
            sqlx::query_as::<_, User>(&sql)
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn find_user(&self, id: Id) -> RepoResult<User> {
            let sql = format!("SELECT {USER_COLS} FROM users WHERE id = $1 AND deleted_at IS NULL");
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let sql = format!("SELECT {USER_COLS} FROM users WHERE deleted_at IS NULL ORDER BY id");
            sqlx::query_as::<_, User>(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
            let sql = format!(
                "UPDATE users SET \
                   email = COALESCE($2, email), \
                   user_name = COALESCE($3, user_name), \
                   password_hash = COALESCE($4, password_hash), \
                   role = COALESCE($5, role), \
                   updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLS}"
            );
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .bind(upd.email)
                .bind(upd.user_name)
                .bind(upd.password_hash)
                .bind(upd.role)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn set_refresh_token(&self, id: Id, token: &str) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE users SET refresh_token = $2, updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn soft_delete_user(&self, id: Id) -> RepoResult<User> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            // one timestamp for the parent and the whole cascade
            let now = Utc::now();
            let sql = format!(
                "UPDATE users SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLS}"
            );
            let user = sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_err)?;
            sqlx::query("UPDATE boards SET deleted_at = $2 WHERE author_id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            sqlx::query("UPDATE comments SET deleted_at = $2 WHERE author_id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            Ok(user)
        }
    }

    #[async_trait]
    impl BoardRepo for PgRepo {
        async fn create_board(&self, new: NewBoard) -> RepoResult<Board> {
            let sql = format!(
                "INSERT INTO boards (title, content, category, author_id, image_url) \
                 VALUES ($1,$2,$3,$4,$5) RETURNING {BOARD_COLS}"
            );
            sqlx::query_as::<_, Board>(&sql)
                .bind(&new.title)
                .bind(&new.content)
                .bind(new.category)
                .bind(new.author_id)
                .bind(&new.image_url)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn get_board(&self, id: Id) -> RepoResult<Board> {
            let sql =
                format!("SELECT {BOARD_COLS} FROM boards WHERE id = $1 AND deleted_at IS NULL");
            sqlx::query_as::<_, Board>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn get_board_any(&self, id: Id) -> RepoResult<Board> {
            let sql = format!("SELECT {BOARD_COLS} FROM boards WHERE id = $1");
            sqlx::query_as::<_, Board>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn list_boards(&self) -> RepoResult<Vec<Board>> {
            let sql = format!(
                "SELECT {BOARD_COLS} FROM boards WHERE deleted_at IS NULL ORDER BY created_at DESC"
            );
            sqlx::query_as::<_, Board>(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn update_board(&self, id: Id, upd: UpdateBoard) -> RepoResult<Board> {
            let sql = format!(
                "UPDATE boards SET \
                   title = COALESCE($2, title), \
                   content = COALESCE($3, content), \
                   category = COALESCE($4, category), \
                   image_url = COALESCE($5, image_url), \
                   updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {BOARD_COLS}"
            );
            sqlx::query_as::<_, Board>(&sql)
                .bind(id)
                .bind(upd.title)
                .bind(upd.content)
                .bind(upd.category)
                .bind(upd.image_url)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn increment_views(&self, id: Id) -> RepoResult<()> {
            sqlx::query("UPDATE boards SET views = views + 1 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(())
        }

        async fn soft_delete_board(&self, id: Id) -> RepoResult<Board> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let now = Utc::now();
            let sql = format!(
                "UPDATE boards SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {BOARD_COLS}"
            );
            let board = sqlx::query_as::<_, Board>(&sql)
                .bind(id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_err)?;
            sqlx::query("UPDATE comments SET deleted_at = $2 WHERE board_id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            Ok(board)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            // the liveness checks and the insert are one statement, so a
            // concurrent board soft-delete cannot slip between them and
            // leave a live comment on a dead board
            let sql = format!(
                "INSERT INTO comments (content, board_id, author_id, parent_id) \
                 SELECT $1, $2, $3, $4 \
                 WHERE EXISTS (SELECT 1 FROM boards WHERE id = $2 AND deleted_at IS NULL) \
                   AND ($4::BIGINT IS NULL OR EXISTS ( \
                       SELECT 1 FROM comments \
                       WHERE id = $4 AND board_id = $2 AND deleted_at IS NULL)) \
                 RETURNING {COMMENT_COLS}"
            );
            sqlx::query_as::<_, Comment>(&sql)
                .bind(&new.content)
                .bind(new.board_id)
                .bind(new.author_id)
                .bind(new.parent_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?
                .ok_or(RepoError::NotFound)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let sql =
                format!("SELECT {COMMENT_COLS} FROM comments WHERE id = $1 AND deleted_at IS NULL");
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn get_comment_any(&self, id: Id) -> RepoResult<Comment> {
            let sql = format!("SELECT {COMMENT_COLS} FROM comments WHERE id = $1");
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn list_comments(&self, board_id: Id) -> RepoResult<Vec<CommentThread>> {
            let top_sql = format!(
                "SELECT {COMMENT_COLS} FROM comments \
                 WHERE board_id = $1 AND parent_id IS NULL AND deleted_at IS NULL \
                 ORDER BY created_at ASC"
            );
            let top = sqlx::query_as::<_, Comment>(&top_sql)
                .bind(board_id)
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)?;
            let reply_sql = format!(
                "SELECT {COMMENT_COLS} FROM comments \
                 WHERE board_id = $1 AND parent_id IS NOT NULL AND deleted_at IS NULL \
                 ORDER BY created_at ASC"
            );
            let replies = sqlx::query_as::<_, Comment>(&reply_sql)
                .bind(board_id)
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(top
                .into_iter()
                .map(|comment| {
                    let replies = replies
                        .iter()
                        .filter(|r| r.parent_id == Some(comment.id))
                        .cloned()
                        .collect();
                    CommentThread { comment, replies }
                })
                .collect())
        }

        async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment> {
            let sql = format!(
                "UPDATE comments SET content = $2, updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {COMMENT_COLS}"
            );
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .bind(content)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)
        }

        async fn soft_delete_comment(&self, id: Id) -> RepoResult<Comment> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let now = Utc::now();
            let sql = format!(
                "UPDATE comments SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING {COMMENT_COLS}"
            );
            let comment = sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_err)?;
            // direct replies only; sufficient because a reply is never a parent
            sqlx::query("UPDATE comments SET deleted_at = $2 WHERE parent_id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            Ok(comment)
        }
    }

    #[async_trait]
    impl PurgeRepo for PgRepo {
        async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> RepoResult<PurgeStats> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            // comments first: board_id references boards. A cascaded comment
            // is never stamped later than its board, so one sweep removes
            // both sides of the reference.
            let comments = sqlx::query(
                "DELETE FROM comments WHERE deleted_at IS NOT NULL AND deleted_at <= $1",
            )
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?
            .rows_affected();
            let boards = sqlx::query(
                "DELETE FROM boards WHERE deleted_at IS NOT NULL AND deleted_at <= $1",
            )
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?
            .rows_affected();
            tx.commit().await.map_err(map_err)?;
            Ok(PurgeStats { boards, comments })
        }
    }
}

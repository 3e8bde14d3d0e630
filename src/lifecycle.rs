//! Content lifecycle: authorized soft-delete entry points with their
//! cascades, plus the view-counted board read. Each entity moves
//! `Active -> SoftDeleted -> Purged` and never back; the repo layer stamps
//! parent and cascaded children atomically with one timestamp.

use std::sync::Arc;

use crate::auth::Claims;
use crate::authz;
use crate::error::ApiError;
use crate::models::{Board, Comment, Id, UpdateBoard, User};
use crate::repo::Repo;
use crate::storage::ImageStore;

/// Non-deleted board read. Bumps the view counter as a side effect; the
/// counter is eventually consistent, so a lost increment under concurrency
/// is acceptable and the bump never blocks the read.
pub async fn get_board(repo: &dyn Repo, id: Id) -> Result<Board, ApiError> {
    let board = repo.get_board(id).await?;
    if let Err(e) = repo.increment_views(id).await {
        log::warn!("view bump failed for board {id}: {e}");
    }
    Ok(board)
}

/// Board update: author-or-admin, and admin-only when either the current or
/// the requested category is privileged. When the image is replaced the old
/// object is deleted from the store only after the row update succeeds, so a
/// failed update never leaves the row pointing at a missing blob (best
/// effort; the URL on the row is the contract, not the blob).
pub async fn update_board(
    repo: &dyn Repo,
    image_store: &Arc<dyn ImageStore>,
    actor: &Claims,
    id: Id,
    upd: UpdateBoard,
) -> Result<Board, ApiError> {
    let board = repo.get_board(id).await?;
    authz::require_owner_or_admin(actor, board.author_id)?;
    authz::require_category_privilege(actor, board.category)?;
    if let Some(new_category) = upd.category {
        authz::require_category_privilege(actor, new_category)?;
    }
    let replaced = board.image_url;
    let updated = repo.update_board(id, upd).await?;
    if let Some(old) = replaced {
        if updated.image_url.as_deref() != Some(old.as_str()) {
            if let Err(e) = image_store.delete(&old).await {
                log::warn!("failed to delete replaced image '{old}': {e}");
            }
        }
    }
    Ok(updated)
}

/// Board soft delete: author-or-admin plus category privilege; cascades to
/// every non-deleted comment of the board regardless of comment author.
pub async fn delete_board(repo: &dyn Repo, actor: &Claims, id: Id) -> Result<Board, ApiError> {
    let board = repo.get_board(id).await?;
    authz::require_owner_or_admin(actor, board.author_id)?;
    authz::require_category_privilege(actor, board.category)?;
    Ok(repo.soft_delete_board(id).await?)
}

/// Comment update: authorship-or-admin.
pub async fn update_comment(
    repo: &dyn Repo,
    actor: &Claims,
    id: Id,
    content: String,
) -> Result<Comment, ApiError> {
    let comment = repo.get_comment(id).await?;
    authz::require_owner_or_admin(actor, comment.author_id)?;
    Ok(repo.update_comment(id, content).await?)
}

/// Comment soft delete: authorship-or-admin; cascades to direct replies
/// only. With a single level of threading that is exhaustive: a reply never
/// has children of its own.
pub async fn delete_comment(repo: &dyn Repo, actor: &Claims, id: Id) -> Result<Comment, ApiError> {
    let comment = repo.get_comment(id).await?;
    authz::require_owner_or_admin(actor, comment.author_id)?;
    Ok(repo.soft_delete_comment(id).await?)
}

/// User soft delete: self-or-admin; one transaction stamps the user and
/// every Board and Comment they authored with the same timestamp.
pub async fn delete_user(repo: &dyn Repo, actor: &Claims, id: Id) -> Result<User, ApiError> {
    authz::require_owner_or_admin(actor, id)?;
    Ok(repo.soft_delete_user(id).await?)
}

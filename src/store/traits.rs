//! `Backend` trait — single async interface to the hosted data service.
//!
//! Rows, auth and object storage all live behind this seam so the board and
//! document controllers never see HTTP.

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::Session;
use crate::documents::model::{Document, DocumentPatch, NewDocument};
use crate::error::ApiError;
use crate::tasks::model::{NewTask, Task, TaskPatch};
use crate::users::User;

/// Backend-agnostic data service covering auth, rows and storage.
#[async_trait]
pub trait Backend: Send + Sync {
    // ── Auth ────────────────────────────────────────────────────────

    /// Exchange email + password for a session. Subsequent calls act as
    /// that user.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ApiError>;

    /// End the current session. Subsequent calls fall back to the anon role.
    async fn sign_out(&self) -> Result<(), ApiError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn list_users(&self) -> Result<Vec<User>, ApiError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// All tasks, ordered by position ascending then newest first.
    async fn list_tasks(&self) -> Result<Vec<Task>, ApiError>;

    /// Insert a task and return the stored row.
    async fn insert_task(&self, task: &NewTask) -> Result<Task, ApiError>;

    /// Partial update. `NotFound` if no row has this id.
    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<(), ApiError>;

    /// Delete a task; the store cascades to its subtasks.
    async fn delete_task(&self, id: Uuid) -> Result<(), ApiError>;

    // ── Documents ───────────────────────────────────────────────────

    /// All documents, newest first.
    async fn list_documents(&self) -> Result<Vec<Document>, ApiError>;

    async fn insert_document(&self, doc: &NewDocument) -> Result<Document, ApiError>;

    async fn update_document(&self, id: Uuid, patch: &DocumentPatch) -> Result<(), ApiError>;

    async fn delete_document(&self, id: Uuid) -> Result<(), ApiError>;

    // ── Object storage ──────────────────────────────────────────────

    /// Upload bytes under `path` in the documents bucket.
    async fn upload_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ApiError>;

    async fn download_object(&self, path: &str) -> Result<Vec<u8>, ApiError>;

    async fn remove_object(&self, path: &str) -> Result<(), ApiError>;

    /// Public retrieval URL: `<base>/storage/v1/object/public/<bucket>/<path>`.
    fn public_url(&self, path: &str) -> String;
}

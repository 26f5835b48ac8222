//! In-process `Backend` — the same contract as the hosted service, held in
//! memory. Used by tests and offline demos. Failures can be scripted,
//! responses can be held in flight, and every call is recorded.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::SecretString;
use tokio::sync::{Notify, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::auth::Session;
use crate::documents::model::{Document, DocumentPatch, NewDocument};
use crate::error::ApiError;
use crate::store::traits::Backend;
use crate::tasks::model::{NewTask, Task, TaskPatch};
use crate::users::User;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SignIn,
    SignOut,
    ListUsers,
    ListTasks,
    InsertTask,
    UpdateTask,
    DeleteTask,
    ListDocuments,
    InsertDocument,
    UpdateDocument,
    DeleteDocument,
    UploadObject,
    DownloadObject,
    RemoveObject,
}

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SignIn { email: String },
    SignOut,
    ListUsers,
    ListTasks,
    InsertTask { task: NewTask },
    UpdateTask { id: Uuid, patch: TaskPatch },
    DeleteTask { id: Uuid },
    ListDocuments,
    InsertDocument { doc: NewDocument },
    UpdateDocument { id: Uuid, patch: DocumentPatch },
    DeleteDocument { id: Uuid },
    UploadObject { path: String },
    DownloadObject { path: String },
    RemoveObject { path: String },
}

struct Account {
    password: String,
    user_id: Uuid,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    signed_in: Option<Uuid>,
    users: Vec<User>,
    tasks: Vec<Task>,
    documents: Vec<Document>,
    objects: HashMap<String, Vec<u8>>,
    fail_once: HashSet<Op>,
    fail_always: HashSet<Op>,
    calls: Vec<Call>,
}

fn not_found(entity: &str, id: impl ToString) -> ApiError {
    ApiError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

impl MemoryState {
    /// Log the call, then fail it if a failure is scripted.
    fn begin(&mut self, op: Op, call: Call) -> Result<(), ApiError> {
        self.calls.push(call);
        if self.fail_always.contains(&op) || self.fail_once.remove(&op) {
            debug!(op = ?op, "Injected backend failure");
            return Err(ApiError::Status {
                endpoint: format!("{op:?}"),
                status: 503,
                message: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn sign_in(&mut self, email: &str, password: &str) -> Result<Session, ApiError> {
        self.begin(
            Op::SignIn,
            Call::SignIn {
                email: email.to_string(),
            },
        )?;
        let user_id = match self.accounts.get(email) {
            Some(account) if account.password == password => account.user_id,
            _ => return Err(ApiError::Unauthorized("Invalid login credentials".into())),
        };
        self.signed_in = Some(user_id);
        Ok(Session {
            user_id,
            email: Some(email.to_string()),
            access_token: SecretString::from(format!("memory-{}", Uuid::new_v4())),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    fn sign_out(&mut self) -> Result<(), ApiError> {
        self.begin(Op::SignOut, Call::SignOut)?;
        self.signed_in = None;
        Ok(())
    }

    fn list_users(&mut self) -> Result<Vec<User>, ApiError> {
        self.begin(Op::ListUsers, Call::ListUsers)?;
        Ok(self.users.clone())
    }

    fn list_tasks(&mut self) -> Result<Vec<Task>, ApiError> {
        self.begin(Op::ListTasks, Call::ListTasks)?;
        let mut tasks = self.tasks.clone();
        tasks.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(tasks)
    }

    fn insert_task(&mut self, task: &NewTask) -> Result<Task, ApiError> {
        self.begin(Op::InsertTask, Call::InsertTask { task: task.clone() })?;
        if let Some(parent) = task.parent_id {
            if !self.tasks.iter().any(|t| t.id == parent) {
                return Err(ApiError::Status {
                    endpoint: "tasks".into(),
                    status: 409,
                    message: format!("parent task {parent} does not exist"),
                });
            }
        }
        let row = task.clone().into_task(Uuid::new_v4(), Utc::now());
        self.tasks.push(row.clone());
        Ok(row)
    }

    fn update_task(&mut self, id: Uuid, patch: &TaskPatch) -> Result<(), ApiError> {
        self.begin(
            Op::UpdateTask,
            Call::UpdateTask {
                id,
                patch: patch.clone(),
            },
        )?;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found("task", id))?;
        patch.apply(task);
        Ok(())
    }

    fn delete_task(&mut self, id: Uuid) -> Result<(), ApiError> {
        self.begin(Op::DeleteTask, Call::DeleteTask { id })?;
        if !self.tasks.iter().any(|t| t.id == id) {
            return Err(not_found("task", id));
        }
        // Cascade like the foreign key does.
        let mut doomed: HashSet<Uuid> = HashSet::from([id]);
        loop {
            let before = doomed.len();
            for task in &self.tasks {
                if task.parent_id.is_some_and(|p| doomed.contains(&p)) {
                    doomed.insert(task.id);
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        self.tasks.retain(|t| !doomed.contains(&t.id));
        Ok(())
    }

    fn list_documents(&mut self) -> Result<Vec<Document>, ApiError> {
        self.begin(Op::ListDocuments, Call::ListDocuments)?;
        let mut documents = self.documents.clone();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(documents)
    }

    fn insert_document(&mut self, doc: &NewDocument) -> Result<Document, ApiError> {
        self.begin(Op::InsertDocument, Call::InsertDocument { doc: doc.clone() })?;
        let row = doc.clone().into_document(Uuid::new_v4(), Utc::now());
        self.documents.push(row.clone());
        Ok(row)
    }

    fn update_document(&mut self, id: Uuid, patch: &DocumentPatch) -> Result<(), ApiError> {
        self.begin(
            Op::UpdateDocument,
            Call::UpdateDocument {
                id,
                patch: patch.clone(),
            },
        )?;
        let doc = self
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| not_found("document", id))?;
        patch.apply(doc);
        Ok(())
    }

    fn delete_document(&mut self, id: Uuid) -> Result<(), ApiError> {
        self.begin(Op::DeleteDocument, Call::DeleteDocument { id })?;
        let before = self.documents.len();
        self.documents.retain(|d| d.id != id);
        if self.documents.len() == before {
            return Err(not_found("document", id));
        }
        Ok(())
    }

    fn upload_object(&mut self, path: &str, bytes: Vec<u8>) -> Result<(), ApiError> {
        self.begin(
            Op::UploadObject,
            Call::UploadObject {
                path: path.to_string(),
            },
        )?;
        if self.objects.contains_key(path) {
            return Err(ApiError::Status {
                endpoint: "storage".into(),
                status: 409,
                message: "The resource already exists".into(),
            });
        }
        self.objects.insert(path.to_string(), bytes);
        Ok(())
    }

    fn download_object(&mut self, path: &str) -> Result<Vec<u8>, ApiError> {
        self.begin(
            Op::DownloadObject,
            Call::DownloadObject {
                path: path.to_string(),
            },
        )?;
        self.objects
            .get(path)
            .cloned()
            .ok_or_else(|| not_found("object", path))
    }

    fn remove_object(&mut self, path: &str) -> Result<(), ApiError> {
        self.begin(
            Op::RemoveObject,
            Call::RemoveObject {
                path: path.to_string(),
            },
        )?;
        self.objects.remove(path);
        Ok(())
    }
}

/// In-memory backend.
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    /// Responses held back until the test releases them.
    holds: Mutex<HashMap<Op, Arc<Notify>>>,
    bucket: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            holds: Mutex::new(HashMap::new()),
            bucket: crate::config::DEFAULT_BUCKET.to_string(),
        }
    }

    /// Seed a user row plus login credentials. Returns the user.
    pub async fn add_account(&self, email: &str, password: &str, name: &str, is_ai: bool) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: Some(email.to_string()),
            avatar_url: None,
            is_ai,
            created_at: Utc::now(),
        };
        let mut state = self.state.write().await;
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user_id: user.id,
            },
        );
        state.users.push(user.clone());
        user
    }

    /// Seed rows directly, bypassing the call log.
    pub async fn seed_tasks(&self, tasks: Vec<Task>) {
        self.state.write().await.tasks.extend(tasks);
    }

    pub async fn seed_documents(&self, documents: Vec<Document>) {
        self.state.write().await.documents.extend(documents);
    }

    /// Make the next call of `op` fail.
    pub async fn fail_next(&self, op: Op) {
        self.state.write().await.fail_once.insert(op);
    }

    /// Make every call of `op` fail until [`Self::recover`].
    pub async fn fail_always(&self, op: Op) {
        self.state.write().await.fail_always.insert(op);
    }

    pub async fn recover(&self) {
        let mut state = self.state.write().await;
        state.fail_once.clear();
        state.fail_always.clear();
    }

    /// Hold back the response of the next `op` call. The call takes effect
    /// immediately but does not return until the handle is notified.
    pub fn hold(&self, op: Op) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        if let Ok(mut holds) = self.holds.lock() {
            holds.insert(op, Arc::clone(&gate));
        }
        gate
    }

    /// Run `f` against the store. A held response waits for its release after
    /// the call has taken effect.
    async fn respond<T>(
        &self,
        op: Op,
        f: impl FnOnce(&mut MemoryState) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let gate = self.holds.lock().ok().and_then(|mut holds| holds.remove(&op));
        let result = f(&mut *self.state.write().await);
        if let Some(gate) = gate {
            debug!(op = ?op, "Holding backend response");
            gate.notified().await;
        }
        result
    }

    /// Calls recorded so far.
    pub async fn calls(&self) -> Vec<Call> {
        self.state.read().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Snapshot of stored task rows, in storage order.
    pub async fn stored_tasks(&self) -> Vec<Task> {
        self.state.read().await.tasks.clone()
    }

    pub async fn stored_object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.read().await.objects.get(path).cloned()
    }

    pub async fn signed_in_user(&self) -> Option<Uuid> {
        self.state.read().await.signed_in
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        self.respond(Op::SignIn, |s| s.sign_in(email, password)).await
    }

    async fn sign_out(&self) -> Result<(), ApiError> {
        self.respond(Op::SignOut, |s| s.sign_out()).await
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.respond(Op::ListUsers, |s| s.list_users()).await
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.respond(Op::ListTasks, |s| s.list_tasks()).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        self.respond(Op::InsertTask, |s| s.insert_task(task)).await
    }

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<(), ApiError> {
        self.respond(Op::UpdateTask, |s| s.update_task(id, patch)).await
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), ApiError> {
        self.respond(Op::DeleteTask, |s| s.delete_task(id)).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        self.respond(Op::ListDocuments, |s| s.list_documents()).await
    }

    async fn insert_document(&self, doc: &NewDocument) -> Result<Document, ApiError> {
        self.respond(Op::InsertDocument, |s| s.insert_document(doc)).await
    }

    async fn update_document(&self, id: Uuid, patch: &DocumentPatch) -> Result<(), ApiError> {
        self.respond(Op::UpdateDocument, |s| s.update_document(id, patch)).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<(), ApiError> {
        self.respond(Op::DeleteDocument, |s| s.delete_document(id)).await
    }

    async fn upload_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), ApiError> {
        self.respond(Op::UploadObject, |s| s.upload_object(path, bytes)).await
    }

    async fn download_object(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        self.respond(Op::DownloadObject, |s| s.download_object(path)).await
    }

    async fn remove_object(&self, path: &str) -> Result<(), ApiError> {
        self.respond(Op::RemoveObject, |s| s.remove_object(path)).await
    }

    fn public_url(&self, path: &str) -> String {
        format!("memory:///storage/v1/object/public/{}/{path}", self.bucket)
    }
}

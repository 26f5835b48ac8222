//! Document library — uploads, edits and removals over the shared document list.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::grouping::{DocumentGroup, group_documents};
use super::model::{Document, DocumentPatch, NewDocument, split_extension};
use crate::error::ApiError;
use crate::store::Backend;

const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Document list changes.
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    Synced { documents: usize },
    DocumentAdded { id: Uuid },
    DocumentChanged { id: Uuid },
    DocumentRemoved { id: Uuid },
    Failed { message: String },
    ErrorCleared,
}

/// A file to upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Display name; defaults to the file stem.
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            name: None,
            description: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Default)]
struct LibraryState {
    documents: Vec<Document>,
    error: Option<String>,
    applied_seq: u64,
}

pub struct DocumentLibrary {
    backend: Arc<dyn Backend>,
    state: RwLock<LibraryState>,
    fetch_seq: AtomicU64,
    tx: broadcast::Sender<LibraryEvent>,
}

impl DocumentLibrary {
    pub fn new(backend: Arc<dyn Backend>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            backend,
            state: RwLock::new(LibraryState::default()),
            fetch_seq: AtomicU64::new(0),
            tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.tx.subscribe()
    }

    /// Re-fetch the list. On failure the previous list stays visible.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let seq = self.next_seq();
        match self.backend.list_documents().await {
            Ok(documents) => {
                self.apply_fetch(seq, documents).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch documents");
                self.fail(format!("Failed to fetch documents: {e}")).await;
                Err(e)
            }
        }
    }

    /// Corrective re-fetch after a failed mutation. If it fails too, the
    /// mutation's banner stays up.
    async fn resync(&self) {
        let seq = self.next_seq();
        match self.backend.list_documents().await {
            Ok(documents) => self.apply_fetch(seq, documents).await,
            Err(e) => warn!(error = %e, "Corrective fetch failed, keeping banner"),
        }
    }

    fn next_seq(&self) -> u64 {
        self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn apply_fetch(&self, seq: u64, documents: Vec<Document>) {
        let count = documents.len();
        {
            let mut state = self.state.write().await;
            if seq < state.applied_seq {
                debug!(seq, "Dropping stale document fetch");
                return;
            }
            state.documents = documents;
            state.applied_seq = seq;
        }
        let _ = self.tx.send(LibraryEvent::Synced { documents: count });
    }

    /// Store the file under `<uuid>/<file_name>`, then insert its row.
    ///
    /// If the row insert fails the stored object is removed again.
    pub async fn upload(&self, created_by: Uuid, upload: Upload) -> Result<Document, ApiError> {
        let (stem, format) = split_extension(&upload.file_name);
        let name = upload
            .name
            .clone()
            .unwrap_or_else(|| stem.trim().to_string());
        let file_path = format!("{}/{}", Uuid::new_v4(), upload.file_name);
        let new = NewDocument {
            name,
            description: upload.description.clone(),
            file_name: upload.file_name.clone(),
            file_path: file_path.clone(),
            file_size: upload.bytes.len() as i64,
            mime_type: format.mime_type().to_string(),
            created_by,
        };

        if let Err(e) = self
            .backend
            .upload_object(&file_path, upload.bytes, format.mime_type())
            .await
        {
            warn!(file_name = %upload.file_name, error = %e, "Upload failed");
            self.fail(format!("Failed to upload {}: {e}", upload.file_name)).await;
            return Err(e);
        }

        match self.backend.insert_document(&new).await {
            Ok(doc) => {
                info!(document_id = %doc.id, file_name = %doc.file_name, "Document uploaded");
                let _ = self.tx.send(LibraryEvent::DocumentAdded { id: doc.id });
                let _ = self.refresh().await;
                Ok(doc)
            }
            Err(e) => {
                warn!(file_path = %file_path, error = %e, "Insert failed, removing object");
                if let Err(cleanup) = self.backend.remove_object(&file_path).await {
                    warn!(file_path = %file_path, error = %cleanup, "Object left in storage");
                }
                self.fail(format!("Failed to save {}: {e}", upload.file_name)).await;
                Err(e)
            }
        }
    }

    pub async fn rename(&self, id: Uuid, name: impl Into<String>) -> Result<(), ApiError> {
        let patch = DocumentPatch {
            name: Some(name.into()),
            updated_at: Some(Utc::now()),
            ..DocumentPatch::default()
        };
        self.update(id, patch).await
    }

    pub async fn describe(&self, id: Uuid, description: Option<String>) -> Result<(), ApiError> {
        let patch = DocumentPatch {
            description: Some(description),
            updated_at: Some(Utc::now()),
            ..DocumentPatch::default()
        };
        self.update(id, patch).await
    }

    async fn update(&self, id: Uuid, patch: DocumentPatch) -> Result<(), ApiError> {
        {
            let mut state = self.state.write().await;
            if let Some(doc) = state.documents.iter_mut().find(|d| d.id == id) {
                patch.apply(doc);
            }
        }
        let _ = self.tx.send(LibraryEvent::DocumentChanged { id });

        match self.backend.update_document(id, &patch).await {
            Ok(()) => {
                info!(document_id = %id, "Document updated");
                Ok(())
            }
            Err(e) => {
                warn!(document_id = %id, error = %e, "Document update failed, re-fetching");
                self.fail(format!("Failed to update document: {e}")).await;
                self.resync().await;
                Err(e)
            }
        }
    }

    /// Remove the row, then its stored object. A failed object removal is
    /// only logged.
    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let removed = {
            let mut state = self.state.write().await;
            let pos = state
                .documents
                .iter()
                .position(|d| d.id == id)
                .ok_or_else(|| ApiError::NotFound {
                    entity: "document".into(),
                    id: id.to_string(),
                })?;
            state.documents.remove(pos)
        };
        let _ = self.tx.send(LibraryEvent::DocumentRemoved { id });

        if let Err(e) = self.backend.delete_document(id).await {
            warn!(document_id = %id, error = %e, "Document delete failed, re-fetching");
            self.fail(format!("Failed to delete {}: {e}", removed.file_name)).await;
            self.resync().await;
            return Err(e);
        }
        info!(document_id = %id, file_name = %removed.file_name, "Document deleted");

        if let Err(e) = self.backend.remove_object(&removed.file_path).await {
            warn!(file_path = %removed.file_path, error = %e, "Failed to remove stored object");
        }
        Ok(())
    }

    /// Fetch the stored bytes of a document.
    pub async fn download(&self, id: Uuid) -> Result<Vec<u8>, ApiError> {
        let doc = self.get(id).await.ok_or_else(|| ApiError::NotFound {
            entity: "document".into(),
            id: id.to_string(),
        })?;
        match self.backend.download_object(&doc.file_path).await {
            Ok(bytes) => {
                debug!(document_id = %id, bytes = bytes.len(), "Document downloaded");
                Ok(bytes)
            }
            Err(e) => {
                warn!(document_id = %id, error = %e, "Download failed");
                self.fail(format!("Failed to download {}: {e}", doc.file_name)).await;
                Err(e)
            }
        }
    }

    pub fn public_url(&self, doc: &Document) -> String {
        self.backend.public_url(&doc.file_path)
    }

    pub async fn get(&self, id: Uuid) -> Option<Document> {
        self.state
            .read()
            .await
            .documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    /// Flat list, newest first.
    pub async fn documents(&self) -> Vec<Document> {
        self.state.read().await.documents.clone()
    }

    pub async fn groups(&self) -> Vec<DocumentGroup> {
        group_documents(self.documents().await)
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn dismiss_error(&self) {
        let cleared = self.state.write().await.error.take().is_some();
        if cleared {
            let _ = self.tx.send(LibraryEvent::ErrorCleared);
        }
    }

    async fn fail(&self, message: String) {
        self.state.write().await.error = Some(message.clone());
        let _ = self.tx.send(LibraryEvent::Failed { message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::model::DocumentFormat;
    use crate::store::memory::{Call, MemoryBackend, Op};

    const OWNER: Uuid = Uuid::from_u128(7);

    async fn setup() -> (Arc<MemoryBackend>, Arc<DocumentLibrary>) {
        let backend = Arc::new(MemoryBackend::new());
        let library = DocumentLibrary::new(backend.clone());
        library.refresh().await.unwrap();
        (backend, library)
    }

    #[tokio::test]
    async fn upload_stores_object_then_row() {
        let (backend, library) = setup().await;
        let doc = library
            .upload(OWNER, Upload::new("Report.pdf", b"%PDF".to_vec()))
            .await
            .unwrap();

        assert_eq!(doc.name, "Report");
        assert_eq!(doc.mime_type, "application/pdf");
        assert_eq!(doc.file_size, 4);
        assert!(doc.file_path.ends_with("/Report.pdf"));
        assert_eq!(backend.stored_object(&doc.file_path).await, Some(b"%PDF".to_vec()));
        assert_eq!(library.documents().await.len(), 1);
        assert_eq!(library.download(doc.id).await.unwrap(), b"%PDF".to_vec());
        assert!(library.public_url(&doc).ends_with(&doc.file_path));
    }

    #[tokio::test]
    async fn failed_insert_removes_uploaded_object() {
        let (backend, library) = setup().await;
        backend.fail_next(Op::InsertDocument).await;
        let err = library
            .upload(OWNER, Upload::new("notes.md", b"# hi".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { .. }));

        let calls = backend.calls().await;
        let path = calls
            .iter()
            .find_map(|c| match c {
                Call::UploadObject { path } => Some(path.clone()),
                _ => None,
            })
            .unwrap();
        assert!(calls.contains(&Call::RemoveObject { path: path.clone() }));
        assert!(backend.stored_object(&path).await.is_none());
        assert!(library.error().await.is_some());
    }

    #[tokio::test]
    async fn variants_group_under_one_stem() {
        let (_backend, library) = setup().await;
        for name in ["Report.html", "Report.pdf", "Report.docx", "Notes.txt"] {
            library
                .upload(OWNER, Upload::new(name, b"x".to_vec()))
                .await
                .unwrap();
        }
        let groups = library.groups().await;
        assert_eq!(groups.len(), 2);
        let report = groups.iter().find(|g| g.stem == "Report").unwrap();
        assert_eq!(
            report.formats(),
            vec![DocumentFormat::Pdf, DocumentFormat::Docx, DocumentFormat::Html]
        );
    }

    #[tokio::test]
    async fn rename_failure_restores_stored_name() {
        let (backend, library) = setup().await;
        let doc = library
            .upload(OWNER, Upload::new("plan.txt", b"x".to_vec()).with_name("Plan"))
            .await
            .unwrap();

        backend.fail_next(Op::UpdateDocument).await;
        assert!(library.rename(doc.id, "Roadmap").await.is_err());
        assert_eq!(library.get(doc.id).await.unwrap().name, "Plan");

        library.rename(doc.id, "Roadmap").await.unwrap();
        library.describe(doc.id, Some("Q4".into())).await.unwrap();
        let stored = library.get(doc.id).await.unwrap();
        assert_eq!(stored.name, "Roadmap");
        assert_eq!(stored.description.as_deref(), Some("Q4"));
    }

    #[tokio::test]
    async fn delete_removes_row_and_object() {
        let (backend, library) = setup().await;
        let doc = library
            .upload(OWNER, Upload::new("a.pdf", b"x".to_vec()))
            .await
            .unwrap();
        library.delete(doc.id).await.unwrap();
        assert!(library.documents().await.is_empty());
        assert!(backend.stored_object(&doc.file_path).await.is_none());
    }

    #[tokio::test]
    async fn object_removal_failure_is_not_surfaced() {
        let (backend, library) = setup().await;
        let doc = library
            .upload(OWNER, Upload::new("a.pdf", b"x".to_vec()))
            .await
            .unwrap();
        backend.fail_next(Op::RemoveObject).await;
        library.delete(doc.id).await.unwrap();
        assert!(library.error().await.is_none());
    }

    #[tokio::test]
    async fn failed_row_delete_refetches() {
        let (backend, library) = setup().await;
        let doc = library
            .upload(OWNER, Upload::new("a.pdf", b"x".to_vec()))
            .await
            .unwrap();
        backend.fail_next(Op::DeleteDocument).await;
        assert!(library.delete(doc.id).await.is_err());
        assert!(library.get(doc.id).await.is_some());
        assert!(backend.stored_object(&doc.file_path).await.is_some());

        library.dismiss_error().await;
        assert!(library.error().await.is_none());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_previous_list() {
        let (backend, library) = setup().await;
        let doc = library
            .upload(OWNER, Upload::new("a.pdf", b"x".to_vec()))
            .await
            .unwrap();

        backend.fail_next(Op::ListDocuments).await;
        let err = library.refresh().await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 503, .. }));

        let docs = library.documents().await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, doc.id);
        assert!(library.error().await.is_some());
    }

    #[tokio::test]
    async fn failed_object_upload_inserts_no_row() {
        let (backend, library) = setup().await;
        backend.fail_next(Op::UploadObject).await;
        assert!(
            library
                .upload(OWNER, Upload::new("notes.md", b"# hi".to_vec()))
                .await
                .is_err()
        );

        let calls = backend.calls().await;
        assert!(!calls.iter().any(|c| matches!(c, Call::InsertDocument { .. })));
        assert!(library.documents().await.is_empty());
        let banner = library.error().await.unwrap();
        assert!(banner.contains("notes.md"), "{banner}");
    }

    #[tokio::test]
    async fn failed_corrective_fetch_keeps_mutation_banner() {
        let (backend, library) = setup().await;
        let doc = library
            .upload(OWNER, Upload::new("a.pdf", b"x".to_vec()))
            .await
            .unwrap();
        backend.fail_next(Op::UpdateDocument).await;
        backend.fail_next(Op::ListDocuments).await;

        assert!(library.rename(doc.id, "b").await.is_err());
        assert_eq!(backend.calls().await.last(), Some(&Call::ListDocuments));
        let banner = library.error().await.unwrap();
        assert!(banner.starts_with("Failed to update document"), "{banner}");
    }
}

//! REST backend — talks to the hosted service over HTTP.
//!
//! Rows go through the PostgREST endpoint (`/rest/v1`), sessions through the
//! auth endpoint (`/auth/v1`), files through object storage
//! (`/storage/v1/object`). Every request carries the anon key as `apikey` and
//! the session token (or the anon key when signed out) as the bearer.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Session;
use crate::config::ServiceConfig;
use crate::documents::model::{Document, DocumentPatch, NewDocument};
use crate::error::ApiError;
use crate::store::traits::Backend;
use crate::tasks::model::{NewTask, Task, TaskPatch};
use crate::users::User;

/// Sort order the board expects rows in.
const TASK_ORDER: &str = "position.asc,created_at.desc";

/// HTTP implementation of [`Backend`].
pub struct RestBackend {
    base_url: String,
    anon_key: SecretString,
    bucket: String,
    client: reqwest::Client,
    access_token: RwLock<Option<SecretString>>,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    user: AuthUser,
}

#[derive(serde::Deserialize)]
struct AuthUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl RestBackend {
    pub fn new(config: &ServiceConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::RequestFailed {
                endpoint: config.url.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            bucket: config.bucket.clone(),
            client,
            access_token: RwLock::new(None),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    /// `<base>/storage/v1/object/<segments...>/<bucket>/<path>`, percent-encoded.
    fn object_url(&self, prefix: &[&str], path: &str) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ApiError::RequestFailed {
            endpoint: self.base_url.clone(),
            reason: format!("invalid base URL: {e}"),
        })?;
        url.path_segments_mut()
            .map_err(|_| ApiError::RequestFailed {
                endpoint: self.base_url.clone(),
                reason: "base URL cannot carry a path".into(),
            })?
            .pop_if_empty()
            .extend(["storage", "v1", "object"])
            .extend(prefix)
            .push(&self.bucket)
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> RequestBuilder {
        let bearer = match self.access_token.read().await.as_ref() {
            Some(token) => token.expose_secret().to_string(),
            None => self.anon_key.expose_secret().to_string(),
        };
        self.client
            .request(method, url)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(bearer)
    }

    /// Send and turn non-2xx responses into [`ApiError`].
    async fn send(&self, endpoint: &str, builder: RequestBuilder) -> Result<Response, ApiError> {
        let resp = builder.send().await.map_err(|e| ApiError::RequestFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = error_message(&body, status);
        debug!(endpoint = %endpoint, status = status.as_u16(), message = %message, "Backend error");
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(message));
        }
        Err(ApiError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(endpoint: &str, resp: Response) -> Result<T, ApiError> {
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        order: &str,
    ) -> Result<Vec<T>, ApiError> {
        let builder = self
            .request(Method::GET, self.rest_url(table))
            .await
            .query(&[("select", "*"), ("order", order)]);
        let resp = self.send(table, builder).await?;
        Self::json(table, resp).await
    }

    async fn insert<B, T>(&self, table: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self
            .request(Method::POST, self.rest_url(table))
            .await
            .header("Prefer", "return=representation")
            .json(body);
        let resp = self.send(table, builder).await?;
        let mut rows: Vec<T> = Self::json(table, resp).await?;
        if rows.is_empty() {
            return Err(ApiError::InvalidResponse {
                endpoint: table.to_string(),
                reason: "insert returned no rows".into(),
            });
        }
        Ok(rows.swap_remove(0))
    }

    /// PATCH or DELETE one row by id, failing with `NotFound` if nothing matched.
    async fn mutate_row<B>(
        &self,
        method: Method,
        table: &str,
        entity: &str,
        id: Uuid,
        body: Option<&B>,
    ) -> Result<(), ApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let mut builder = self
            .request(method, self.rest_url(table))
            .await
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = self.send(table, builder).await?;
        let rows: Vec<serde_json::Value> = Self::json(table, resp).await?;
        if rows.is_empty() {
            return Err(ApiError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

/// Pull a readable message out of an error body (PostgREST, auth or storage).
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error_description", "msg", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.chars().take(200).collect()
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let endpoint = "auth/token";
        let builder = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", self.anon_key.expose_secret())
            .json(&serde_json::json!({ "email": email, "password": password }));

        let resp = match self.send(endpoint, builder).await {
            // The auth endpoint answers bad credentials with 400.
            Err(ApiError::Status {
                status: 400,
                message,
                ..
            }) => return Err(ApiError::Unauthorized(message)),
            other => other?,
        };
        let token: TokenResponse = Self::json(endpoint, resp).await?;

        let access_token = SecretString::from(token.access_token);
        *self.access_token.write().await = Some(access_token.clone());
        info!(user_id = %token.user.id, "Backend session established");

        Ok(Session {
            user_id: token.user.id,
            email: token.user.email,
            access_token,
            refresh_token: token.refresh_token.map(SecretString::from),
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }

    async fn sign_out(&self) -> Result<(), ApiError> {
        let builder = self
            .request(Method::POST, format!("{}/auth/v1/logout", self.base_url))
            .await;
        let result = self.send("auth/logout", builder).await.map(|_| ());
        *self.access_token.write().await = None;
        result
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.select("users", "name.asc").await
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.select("tasks", TASK_ORDER).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        self.insert("tasks", task).await
    }

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<(), ApiError> {
        self.mutate_row(Method::PATCH, "tasks", "task", id, Some(patch)).await
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), ApiError> {
        self.mutate_row::<()>(Method::DELETE, "tasks", "task", id, None).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        self.select("documents", "created_at.desc").await
    }

    async fn insert_document(&self, doc: &NewDocument) -> Result<Document, ApiError> {
        self.insert("documents", doc).await
    }

    async fn update_document(&self, id: Uuid, patch: &DocumentPatch) -> Result<(), ApiError> {
        self.mutate_row(Method::PATCH, "documents", "document", id, Some(patch)).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<(), ApiError> {
        self.mutate_row::<()>(Method::DELETE, "documents", "document", id, None).await
    }

    async fn upload_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ApiError> {
        let url = self.object_url(&[], path)?;
        let builder = self
            .request(Method::POST, url)
            .await
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes);
        self.send("storage/upload", builder).await?;
        Ok(())
    }

    async fn download_object(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.object_url(&["public"], path)?;
        let builder = self.request(Method::GET, url).await;
        let resp = self.send("storage/download", builder).await?;
        let bytes = resp.bytes().await.map_err(|e| ApiError::InvalidResponse {
            endpoint: "storage/download".into(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn remove_object(&self, path: &str) -> Result<(), ApiError> {
        let url = self.object_url(&[], path)?;
        let builder = self.request(Method::DELETE, url).await;
        self.send("storage/remove", builder).await?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        match self.object_url(&["public"], path) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}/storage/v1/object/public/{}/{path}",
                self.base_url, self.bucket
            ),
        }
    }
}

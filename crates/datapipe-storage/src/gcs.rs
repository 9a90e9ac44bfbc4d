//! Google Cloud Storage (and Firebase Storage buckets) via the JSON upload API.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::{read_local, ObjectStore, StoredObject};

/// Public GCS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Uploads objects with a simple media upload and a bearer token.
///
/// OAuth access tokens expire after about an hour, so a long-running
/// scheduler should use [`GcsStore::with_token_file`] and keep the file
/// refreshed from outside; a static token only suits one-shot runs.
pub struct GcsStore {
    inner: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
    token_file: Option<PathBuf>,
}

impl GcsStore {
    /// Create a store for `bucket`. Uploads fail with
    /// [`StorageError::MissingCredential`] while `token` is `None`.
    pub fn new(bucket: impl Into<String>, token: Option<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bucket: bucket.into(),
            token,
            token_file: None,
        }
    }

    /// Builder method to read the bearer token from `path` on every upload.
    /// Takes precedence over the static token.
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// Builder method to point at another endpoint (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket)
    }

    async fn bearer_token(&self) -> Result<String, StorageError> {
        let Some(path) = &self.token_file else {
            return self.token.clone().ok_or(StorageError::MissingCredential);
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StorageError::TokenFile {
                path: path.clone(),
                source,
            })?;
        let token = contents.trim();
        if token.is_empty() {
            return Err(StorageError::MissingCredential);
        }
        Ok(token.to_string())
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<StoredObject, StorageError> {
        let token = self.bearer_token().await?;
        let bytes = read_local(local_path).await?;
        let size_bytes = bytes.len() as u64;

        let url = self.upload_url();
        debug!(url = %url, key = %key, size_bytes, "Uploading object");

        let response = self
            .inner
            .post(&url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(&token)
            .header(CONTENT_TYPE, content_type(local_path))
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StorageError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(bucket = %self.bucket, key = %key, size_bytes, "Object uploaded");
        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::extract::{Path as UrlPath, Query, State};
    use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode as HttpStatus};
    use axum::routing::post;
    use axum::Router;

    type Objects = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    async fn upload(
        State(objects): State<Objects>,
        UrlPath(bucket): UrlPath<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> HttpStatus {
        if bucket == "broken" {
            return HttpStatus::INTERNAL_SERVER_ERROR;
        }
        let auth = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if auth != Some("Bearer good-token") {
            return HttpStatus::UNAUTHORIZED;
        }
        if query.get("uploadType").map(String::as_str) != Some("media") {
            return HttpStatus::BAD_REQUEST;
        }
        let Some(name) = query.get("name") else {
            return HttpStatus::BAD_REQUEST;
        };
        objects
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, name), body.to_vec());
        HttpStatus::OK
    }

    async fn serve(objects: Objects) -> String {
        let router = Router::new()
            .route("/upload/storage/v1/b/:bucket/o", post(upload))
            .with_state(objects);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn artifact(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("world_data.csv");
        std::fs::write(&path, "Country Name,Country Code\nAruba,ABW\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_same_key_twice_is_one_object() {
        let objects = Objects::default();
        let endpoint = serve(objects.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path());

        let store = GcsStore::new("world-bucket", Some("good-token".to_string()))
            .with_endpoint(&endpoint);
        let first = store.put(&path, "04-03-2024/world_data.csv").await.unwrap();
        let second = store.put(&path, "04-03-2024/world_data.csv").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.size_bytes, 36);
        let objects = objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        assert!(objects.contains_key("world-bucket/04-03-2024/world_data.csv"));
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthorized() {
        let endpoint = serve(Objects::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let store = GcsStore::new("world-bucket", Some("stale".to_string()))
            .with_endpoint(&endpoint);

        let err = store.put(&artifact(dir.path()), "k").await.unwrap_err();
        assert!(matches!(err, StorageError::Unauthorized { status: 401 }));
    }

    #[tokio::test]
    async fn test_missing_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = GcsStore::new("world-bucket", None).with_endpoint("http://127.0.0.1:9");
        let err = store.put(&artifact(dir.path()), "k").await.unwrap_err();
        assert!(matches!(err, StorageError::MissingCredential));
    }

    #[tokio::test]
    async fn test_token_file_is_reread_on_each_put() {
        let objects = Objects::default();
        let endpoint = serve(objects.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(dir.path());
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "expired\n").unwrap();

        let store = GcsStore::new("world-bucket", Some("good-token".to_string()))
            .with_endpoint(&endpoint)
            .with_token_file(&token_path);

        let err = store.put(&path, "k").await.unwrap_err();
        assert!(matches!(err, StorageError::Unauthorized { status: 401 }));

        std::fs::write(&token_path, "good-token\n").unwrap();
        store.put(&path, "k").await.unwrap();
        assert!(objects.lock().unwrap().contains_key("world-bucket/k"));
    }

    #[tokio::test]
    async fn test_unreadable_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = GcsStore::new("world-bucket", None)
            .with_endpoint("http://127.0.0.1:9")
            .with_token_file(dir.path().join("absent-token"));

        let err = store.put(&artifact(dir.path()), "k").await.unwrap_err();
        assert!(matches!(err, StorageError::TokenFile { .. }));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = GcsStore::new("world-bucket", Some("good-token".to_string()))
            .with_endpoint("http://127.0.0.1:9");
        let err = store
            .put(&dir.path().join("absent.csv"), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingFile(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_rejected() {
        let endpoint = serve(Objects::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let store = GcsStore::new("broken", Some("good-token".to_string()))
            .with_endpoint(&endpoint);

        let err = store.put(&artifact(dir.path()), "k").await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected { status: 500, .. }));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a/world_data.csv")), "text/csv");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }
}

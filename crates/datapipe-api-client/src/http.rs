//! HTTP client for the indicator endpoints.

use std::time::Duration;

use datapipe_core::RawRecord;
use serde_json::Value;
use tracing::debug;

use crate::error::ClientError;
use crate::response::{self, PageMeta};

/// Rows requested per page unless overridden.
pub const DEFAULT_PER_PAGE: u32 = 1000;

/// Indicator endpoint of the public World Bank API, all countries.
pub const DEFAULT_BASE_URL: &str = "http://api.worldbank.org/v2/countries/all/indicators";

/// HTTP client for the paginated indicator API.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: reqwest::Client,
    base_url: String,
    per_page: u32,
}

impl ApiClient {
    /// Create a client with reqwest's default settings.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(inner, base_url))
    }

    fn with_client(inner: reqwest::Client, base_url: &str) -> Self {
        Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
            per_page: DEFAULT_PER_PAGE,
        }
    }

    /// Builder method to set the page size.
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn indicator_url(&self, code: &str, page: Option<u32>) -> String {
        let mut url = format!(
            "{}/{}?format=json&per_page={}",
            self.base_url, code, self.per_page
        );
        if let Some(page) = page {
            url.push_str(&format!("&page={}", page));
        }
        url
    }

    /// Discover how many pages the indicator spans.
    ///
    /// A count of zero is an error: there is nothing to pivot.
    pub async fn page_count(&self, code: &str) -> Result<PageMeta, ClientError> {
        let body = self.get_json(&self.indicator_url(code, None)).await?;
        let meta = response::parse_meta(&body)?;
        if meta.pages == 0 {
            return Err(ClientError::NoPages(code.to_string()));
        }
        debug!(indicator = %code, pages = meta.pages, total = meta.total, "Discovered page count");
        Ok(meta)
    }

    /// Fetch one page of rows (pages are 1-based).
    pub async fn fetch_page(&self, code: &str, page: u32) -> Result<Vec<RawRecord>, ClientError> {
        let body = self.get_json(&self.indicator_url(code, Some(page))).await?;
        let rows = response::parse_rows(&body)?;
        debug!(indicator = %code, page, rows = rows.len(), "Fetched page");
        Ok(rows)
    }

    /// Get JSON from a URL, failing on any non-success status.
    async fn get_json(&self, url: &str) -> Result<Value, ClientError> {
        debug!(url = %url, "GET request");

        let response = self.inner.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/indicators", addr)
    }

    async fn indicator(
        Path(code): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> axum::response::Response {
        match code.as_str() {
            "SP.POP.TOTL" => {
                let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
                Json(json!([
                    {"page": page, "pages": 2, "per_page": params.get("per_page"), "total": 2},
                    [{
                        "country": {"id": "X", "value": format!("Entity {}", page)},
                        "countryiso3code": format!("E{}", page),
                        "date": "2020",
                        "value": page
                    }]
                ]))
                .into_response()
            }
            "EMPTY" => Json(json!([{"page": 0, "pages": 0, "total": 0}, null])).into_response(),
            "BROKEN" => (StatusCode::OK, "<html>oops</html>").into_response(),
            _ => StatusCode::BAD_GATEWAY.into_response(),
        }
    }

    fn router() -> Router {
        Router::new().route("/indicators/:code", get(indicator))
    }

    #[test]
    fn test_indicator_url() {
        let client = ApiClient::new("http://api.example.org/v2/").with_per_page(50);
        assert_eq!(
            client.indicator_url("SP.POP.TOTL", Some(3)),
            "http://api.example.org/v2/SP.POP.TOTL?format=json&per_page=50&page=3"
        );
        assert_eq!(
            client.indicator_url("SP.POP.TOTL", None),
            "http://api.example.org/v2/SP.POP.TOTL?format=json&per_page=50"
        );
    }

    #[tokio::test]
    async fn test_page_count_and_fetch() {
        let base = serve(router()).await;
        let client = ApiClient::new(&base);

        let meta = client.page_count("SP.POP.TOTL").await.unwrap();
        assert_eq!(meta.pages, 2);

        let rows = client.fetch_page("SP.POP.TOTL", 2).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity_code, "E2");
        assert_eq!(rows[0].year, 2020);
        assert_eq!(rows[0].value, Some(2.0));
    }

    #[tokio::test]
    async fn test_zero_pages_is_error() {
        let base = serve(router()).await;
        let err = ApiClient::new(&base).page_count("EMPTY").await.unwrap_err();
        assert!(matches!(err, ClientError::NoPages(ref code) if code == "EMPTY"));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let base = serve(router()).await;
        let err = ApiClient::new(&base).fetch_page("UNKNOWN", 1).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let base = serve(router()).await;
        let err = ApiClient::new(&base).fetch_page("BROKEN", 1).await.unwrap_err();
        assert!(matches!(err, ClientError::Json(_)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let client = ApiClient::with_timeout("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.page_count("SP.POP.TOTL").await.unwrap_err();
        assert!(matches!(err, ClientError::Http(_)));
    }
}

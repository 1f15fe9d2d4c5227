use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

use super::api_types::{error_from_body, parse_content_range_total};
use super::filter::{Predicate, Select};
use crate::config::BackendConfig;
use crate::error::{ApiError, ApiResult};

/// Rows returned by a read, with the exact total when it was requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
  pub rows: Vec<Value>,
  pub total: Option<u64>,
}

/// Hosted relational backend addressed by table name.
///
/// Every method is exactly one round trip. Implementations translate
/// failures into [`ApiError`] and never cache.
#[async_trait]
pub trait Backend: Send + Sync {
  /// Read rows matching a [`Select`].
  async fn select(&self, query: &Select) -> ApiResult<Rows>;

  /// Insert one row (object) or many (array); returns the stored rows.
  async fn insert(&self, table: &str, rows: Value) -> ApiResult<Vec<Value>>;

  /// Patch every row matching `filters`; returns the updated rows.
  async fn update(&self, table: &str, filters: &[Predicate], patch: Value)
    -> ApiResult<Vec<Value>>;

  /// Delete every row matching `filters`; returns the deleted rows.
  async fn delete(&self, table: &str, filters: &[Predicate]) -> ApiResult<Vec<Value>>;

  /// Call a stored function.
  async fn rpc(&self, function: &str, args: Value) -> ApiResult<Value>;
}

struct Endpoint {
  rest_url: Url,
  anon_key: String,
}

/// REST client for the hosted backend.
#[derive(Clone)]
pub struct RestClient {
  http: reqwest::Client,
  endpoint: Result<Arc<Endpoint>, String>,
}

impl RestClient {
  /// Build a client from backend settings.
  ///
  /// Missing or invalid settings are logged and remembered: the client is
  /// still constructed, and every request fails with [`ApiError::Config`].
  pub fn new(config: &BackendConfig) -> ApiResult<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.request_timeout())
      .build()
      .map_err(|e| ApiError::config(format!("Failed to build HTTP client: {}", e)))?;

    let endpoint = Self::endpoint_from(config).map(Arc::new);
    if let Err(message) = &endpoint {
      error!("{}", message);
    }

    Ok(Self { http, endpoint })
  }

  fn endpoint_from(config: &BackendConfig) -> Result<Endpoint, String> {
    let url = config
      .url
      .as_deref()
      .filter(|u| !u.trim().is_empty())
      .ok_or("Backend URL is not configured. Set CRM_BACKEND_URL or backend.url.")?;
    let anon_key = config
      .anon_key
      .clone()
      .filter(|k| !k.trim().is_empty())
      .ok_or("Backend anon key is not configured. Set CRM_BACKEND_ANON_KEY.")?;

    let rest_url = Url::parse(&format!("{}/rest/v1/", url.trim_end_matches('/')))
      .map_err(|e| format!("Invalid backend URL {}: {}", url, e))?;

    Ok(Endpoint { rest_url, anon_key })
  }

  fn endpoint(&self) -> ApiResult<&Endpoint> {
    self
      .endpoint
      .as_deref()
      .map_err(|message| ApiError::config(message.clone()))
  }

  fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
    let endpoint = self.endpoint()?;
    let url = endpoint
      .rest_url
      .join(path)
      .map_err(|e| ApiError::config(format!("Invalid path {}: {}", path, e)))?;

    let mut headers = HeaderMap::new();
    let key = HeaderValue::from_str(&endpoint.anon_key)
      .map_err(|e| ApiError::config(format!("Invalid anon key: {}", e)))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", endpoint.anon_key))
      .map_err(|e| ApiError::config(format!("Invalid anon key: {}", e)))?;
    headers.insert("apikey", key);
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    debug!(%method, %url, "backend request");
    Ok(self.http.request(method, url).headers(headers))
  }

  /// Send a request, mapping non-success statuses to backend errors.
  async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(
      status.as_u16(),
      status.canonical_reason(),
      &body,
    ))
  }

  async fn rows(response: Response) -> ApiResult<Vec<Value>> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
      return Ok(Vec::new());
    }
    match serde_json::from_slice::<Value>(&bytes)? {
      Value::Array(rows) => Ok(rows),
      Value::Null => Ok(Vec::new()),
      other => Ok(vec![other]),
    }
  }
}

fn filter_pairs(filters: &[Predicate]) -> Vec<(String, String)> {
  filters.iter().map(Predicate::to_query_pair).collect()
}

#[async_trait]
impl Backend for RestClient {
  async fn select(&self, query: &Select) -> ApiResult<Rows> {
    let mut request = self
      .request(Method::GET, &query.table)?
      .query(&query.to_query_pairs());
    if query.count {
      request = request.header("Prefer", "count=exact");
    }

    let response = self.send(request).await?;
    let total = response
      .headers()
      .get(CONTENT_RANGE)
      .and_then(|v| v.to_str().ok())
      .and_then(parse_content_range_total);
    let rows = Self::rows(response).await?;

    Ok(Rows { rows, total })
  }

  async fn insert(&self, table: &str, rows: Value) -> ApiResult<Vec<Value>> {
    let request = self
      .request(Method::POST, table)?
      .header("Prefer", "return=representation")
      .json(&rows);
    let response = self.send(request).await?;
    Self::rows(response).await
  }

  async fn update(
    &self,
    table: &str,
    filters: &[Predicate],
    patch: Value,
  ) -> ApiResult<Vec<Value>> {
    let request = self
      .request(Method::PATCH, table)?
      .query(&filter_pairs(filters))
      .header("Prefer", "return=representation")
      .json(&patch);
    let response = self.send(request).await?;
    Self::rows(response).await
  }

  async fn delete(&self, table: &str, filters: &[Predicate]) -> ApiResult<Vec<Value>> {
    let request = self
      .request(Method::DELETE, table)?
      .query(&filter_pairs(filters))
      .header("Prefer", "return=representation");
    let response = self.send(request).await?;
    Self::rows(response).await
  }

  async fn rpc(&self, function: &str, args: Value) -> ApiResult<Value> {
    let request = self
      .request(Method::POST, &format!("rpc/{}", function))?
      .json(&args);
    let response = self.send(request).await?;
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
      return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
  }
}

//! # Quarry HTTP Client
//!
//! Thin wrapper over the control surface, used by the CLI commands that
//! talk to a running daemon.

use crate::api::{CommandResponse, IndexResponse, PauseResponse, QueryResponse};
use quarry_core::{GraphName, Query};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Errors from the HTTP client layer.
#[derive(Debug)]
pub enum ClientError {
    /// The daemon is not reachable.
    ConnectionFailed(String),
    /// 401: the API key is missing or wrong.
    Unauthorized,
    /// The daemon answered with a 5xx.
    ServerError(u16, String),
    /// The body was not what the endpoint returns.
    ParseError(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(url) => write!(f, "Cannot reach the quarry daemon at {url}"),
            Self::Unauthorized => write!(f, "Unauthorized: set QUARRY_API_KEY to the daemon's key"),
            Self::ServerError(status, msg) => write!(f, "Daemon error ({status}): {msg}"),
            Self::ParseError(msg) => write!(f, "Unexpected response: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Client for one daemon.
#[derive(Debug, Clone)]
pub struct QuarryClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QuarryClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, &url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// 4xx bodies are still JSON replies carrying `success: false`, so only
    /// 401 and 5xx are turned into errors here.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        if status.is_server_error() && status != reqwest::StatusCode::SERVICE_UNAVAILABLE {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::ServerError(status.as_u16(), body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("{}: {e}", self.base_url)))?;
        self.handle_response(resp).await
    }

    /// GET /health
    pub async fn health(&self) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::GET, "/health"))
            .await
    }

    /// GET /status
    pub async fn status(&self) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::GET, "/status"))
            .await
    }

    /// POST /index. Waits until the daemon has handled the location.
    pub async fn index(
        &self,
        path: &Path,
        recursive: bool,
        graphs: Option<BTreeSet<GraphName>>,
    ) -> Result<IndexResponse, ClientError> {
        let body = serde_json::json!({
            "path": path,
            "recursive": recursive,
            "graphs": graphs,
        });
        self.send(self.request(reqwest::Method::POST, "/index").json(&body))
            .await
    }

    pub async fn start(&self) -> Result<CommandResponse, ClientError> {
        self.send(self.request(reqwest::Method::POST, "/start"))
            .await
    }

    pub async fn stop(&self) -> Result<CommandResponse, ClientError> {
        self.send(self.request(reqwest::Method::POST, "/stop"))
            .await
    }

    /// POST /pause. The returned cookie releases the pause.
    pub async fn pause(
        &self,
        application: &str,
        reason: &str,
    ) -> Result<PauseResponse, ClientError> {
        let body = serde_json::json!({ "application": application, "reason": reason });
        self.send(self.request(reqwest::Method::POST, "/pause").json(&body))
            .await
    }

    pub async fn resume(&self, cookie: u32) -> Result<CommandResponse, ClientError> {
        let body = serde_json::json!({ "cookie": cookie });
        self.send(self.request(reqwest::Method::POST, "/resume").json(&body))
            .await
    }

    /// POST /query
    pub async fn query(&self, query: &Query) -> Result<QueryResponse, ClientError> {
        self.send(self.request(reqwest::Method::POST, "/query").json(query))
            .await
    }
}

//! Client for the application's own web API.
//!
//! Background jobs run outside the async runtime, so the client carries a
//! runtime [`Handle`] and can dispatch requests without blocking the caller.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::CoreError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ApiClient {
    base: String,
    client: reqwest::Client,
    runtime: Handle,
}

impl ApiClient {
    /// Build a client for `base` (e.g. `http://127.0.0.1:8789`) whose requests
    /// are bounded by `timeout` and spawned onto `runtime`.
    pub fn new(base: impl Into<String>, timeout: Duration, runtime: Handle) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Network(e.to_string()))?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { base, client, runtime })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    /// GET `path` and return the response body.
    pub async fn get(&self, path: &str) -> Result<String, CoreError> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoreError::Status { url, status: status.as_u16() });
        }
        resp.text().await.map_err(|e| CoreError::Parse(e.to_string()))
    }

    /// Fire-and-forget GET. Safe to call from any thread; failures are logged
    /// and dropped.
    pub fn spawn_get(&self, path: &str) -> JoinHandle<()> {
        let this = self.clone();
        let path = path.to_string();
        self.runtime.spawn(async move {
            match this.get(&path).await {
                Ok(body) => debug!(%path, bytes = body.len(), "background api call finished"),
                Err(e) => warn!(%path, error = %e, "background api call failed"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{routing::get, Router};
    use tokio::net::TcpListener;

    async fn serve(hits: Arc<AtomicUsize>) -> anyhow::Result<String> {
        let app = Router::new().route(
            "/api/startup_tasks",
            get(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{}", addr))
    }

    #[test]
    fn url_joins_with_and_without_slash() {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let api = ApiClient::new("http://localhost:8789/", DEFAULT_TIMEOUT, rt.handle().clone()).expect("client");
        assert_eq!(api.base(), "http://localhost:8789");
        assert_eq!(api.url("/api/versions?method=check"), "http://localhost:8789/api/versions?method=check");
        assert_eq!(api.url("api/startup_tasks"), "http://localhost:8789/api/startup_tasks");
    }

    #[tokio::test]
    async fn get_and_spawn_get_hit_the_server() -> anyhow::Result<()> {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(Arc::clone(&hits)).await?;
        let api = ApiClient::new(base, DEFAULT_TIMEOUT, Handle::current())?;

        assert_eq!(api.get("/api/startup_tasks").await?, "ok");
        api.spawn_get("/api/startup_tasks").await?;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let err = api.get("/missing").await.unwrap_err();
        assert!(matches!(err, CoreError::Status { status: 404, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn spawn_get_swallows_connection_errors() {
        let api = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(2), Handle::current()).expect("client");
        // The task completes normally even though the request fails.
        assert!(api.spawn_get("/api/versions?method=check").await.is_ok());
    }
}

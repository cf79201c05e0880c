use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EndpointSpec, EngineError, NetworkEngine, NetworkInfo, SandboxSpec};

#[derive(Debug, Serialize)]
struct EndpointAttach<'a> {
    sandbox_id: &'a str,
}

#[derive(Debug, Serialize)]
struct EndpointDelete<'a> {
    name: &'a str,
    force: bool,
}

/// The engine answers an attach either with the bare sandbox key or with full
/// interface details.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AttachResponse {
    Key(String),
    Info(NetworkInfo),
}

impl From<AttachResponse> for NetworkInfo {
    fn from(resp: AttachResponse) -> Self {
        match resp {
            AttachResponse::Key(sandbox_key) => NetworkInfo {
                sandbox_key,
                ..Default::default()
            },
            AttachResponse::Info(info) => info,
        }
    }
}

/// HTTP client for the engine's sandbox/service resource API
#[derive(Clone)]
pub struct HttpEngineClient {
    client: Client,
    base_url: String,
}

impl HttpEngineClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Http(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Engine call: {} {}", method, url);

        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(|e| EngineError::Http(e.to_string()))
    }

    async fn expect_json<T: DeserializeOwned>(response: Response) -> Result<T, EngineError> {
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))
    }

    /// Success, or 404: the resource is already gone
    async fn expect_removed(response: Response) -> Result<(), EngineError> {
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Engine resource already removed: {}", response.url());
            return Ok(());
        }
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: Response) -> Result<Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(EngineError::Api {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

#[async_trait]
impl NetworkEngine for HttpEngineClient {
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<String, EngineError> {
        let response = self.call(Method::POST, "/sandboxes", Some(spec)).await?;
        Self::expect_json(response).await
    }

    async fn delete_sandbox(&self, sandbox_id: &str) -> Result<(), EngineError> {
        let response = self
            .call::<()>(Method::DELETE, &format!("/sandboxes/{}", sandbox_id), None)
            .await?;
        Self::expect_removed(response).await
    }

    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<String, EngineError> {
        let response = self.call(Method::POST, "/services", Some(spec)).await?;
        Self::expect_json(response).await
    }

    async fn delete_endpoint(&self, endpoint_id: &str) -> Result<(), EngineError> {
        let body = EndpointDelete {
            name: endpoint_id,
            force: true,
        };
        let response = self
            .call(
                Method::DELETE,
                &format!("/services/{}", endpoint_id),
                Some(&body),
            )
            .await?;
        Self::expect_removed(response).await
    }

    async fn attach(
        &self,
        endpoint_id: &str,
        sandbox_id: &str,
    ) -> Result<NetworkInfo, EngineError> {
        let body = EndpointAttach { sandbox_id };
        let response = self
            .call(
                Method::POST,
                &format!("/services/{}/backend", endpoint_id),
                Some(&body),
            )
            .await?;
        let resp: AttachResponse = Self::expect_json(response).await?;
        Ok(resp.into())
    }

    async fn detach(&self, endpoint_id: &str, sandbox_id: &str) -> Result<(), EngineError> {
        let response = self
            .call::<()>(
                Method::DELETE,
                &format!("/services/{}/backend/{}", endpoint_id, sandbox_id),
                None,
            )
            .await?;
        Self::expect_removed(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_response_bare_key() {
        let resp: AttachResponse = serde_json::from_str(r#""/var/run/docker/netns/abc""#).unwrap();
        let info: NetworkInfo = resp.into();
        assert_eq!(info.sandbox_key, "/var/run/docker/netns/abc");
        assert!(info.interfaces.is_empty());
    }

    #[test]
    fn test_attach_response_full_info() {
        let json = r#"{
            "sandbox_key": "/var/run/docker/netns/abc",
            "interfaces": [{"name": "eth1", "mac": "02:42:ac:11:00:02"}],
            "ips": [{"address": "10.0.0.5/24", "gateway": "10.0.0.1", "interface": 0}]
        }"#;
        let info: NetworkInfo = serde_json::from_str::<AttachResponse>(json).unwrap().into();
        assert_eq!(info.interfaces[0].name, "eth1");
        assert_eq!(info.ips[0].gateway.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpEngineClient::new("http://127.0.0.1:2389/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:2389");
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_http_error() {
        let client = HttpEngineClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = client.delete_sandbox("sb-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Http(_)));
    }
}

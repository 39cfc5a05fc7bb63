//! Docker Engine API client over the daemon's Unix socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioIo;
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use dbb_config::DockerSettings;

use crate::api::{
    AttachStream, ByteStream, ContainerSpec, ContainerSummary, DockerApi, ImageSummary,
};
use crate::error::{DockerError, Result};

const AUTO_VERSION: &str = "auto";

/// Error body returned by the daemon.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionResponse {
    api_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
}

/// Docker Engine API client.
pub struct DockerClient {
    client: Client<UnixConnector, Full<Bytes>>,
    socket: PathBuf,
    api_version: String,
    prefix: OnceCell<String>,
}

impl DockerClient {
    /// Create a client for the daemon listening on `socket`.
    ///
    /// `api_version` is either an explicit version such as `1.41` or `auto`,
    /// which asks the daemon for its version on first use.
    pub fn new(socket: impl Into<PathBuf>, api_version: impl Into<String>) -> Self {
        Self {
            client: Client::unix(),
            socket: socket.into(),
            api_version: api_version.into(),
            prefix: OnceCell::new(),
        }
    }

    /// Create a client from configuration.
    #[must_use]
    pub fn from_settings(settings: &DockerSettings) -> Self {
        Self::new(settings.socket.clone(), settings.api_version.clone())
    }

    /// Path of the daemon socket.
    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Versioned path prefix, e.g. `/v1.43`.
    async fn prefix(&self) -> Result<&str> {
        let prefix = self
            .prefix
            .get_or_try_init(|| async {
                let version = if self.api_version == AUTO_VERSION {
                    let response = self.send(Method::GET, "/version", None).await?;
                    let response = check_status(response, false).await?;
                    let version: VersionResponse = read_json(response).await?;
                    debug!(api_version = %version.api_version, "negotiated Docker API version");
                    version.api_version
                } else {
                    self.api_version.trim_start_matches('v').to_owned()
                };
                Ok::<_, DockerError>(format!("/v{version}"))
            })
            .await?;
        Ok(prefix)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(&'static str, Bytes)>,
    ) -> Result<Response<Incoming>> {
        let url: hyper::Uri = Uri::new(&self.socket, path).into();

        let mut builder = Request::builder().method(method).uri(url);
        let body = match body {
            Some((content_type, bytes)) => {
                builder = builder.header(CONTENT_TYPE, content_type);
                Full::new(bytes)
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder
            .body(body)
            .map_err(|e| DockerError::Transport(format!("failed to build request: {e}")))?;

        debug!("Sending {} {}", request.method(), path);

        self.client.request(request).await.map_err(|e| {
            DockerError::Transport(format!(
                "request to {} failed: {e}",
                self.socket.display()
            ))
        })
    }

    /// Send a request to a versioned endpoint and check the response status.
    async fn api_request(
        &self,
        method: Method,
        path: &str,
        body: Option<(&'static str, Bytes)>,
        allow_not_modified: bool,
    ) -> Result<Response<Incoming>> {
        let path = format!("{}{path}", self.prefix().await?);
        let response = self.send(method, &path, body).await?;
        check_status(response, allow_not_modified).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.api_request(Method::GET, path, None, false).await?;
        read_json(response).await
    }
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("socket", &self.socket)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

async fn check_status(
    response: Response<Incoming>,
    allow_not_modified: bool,
) -> Result<Response<Incoming>> {
    let status = response.status();
    if status.is_success() || (allow_not_modified && status == StatusCode::NOT_MODIFIED) {
        return Ok(response);
    }

    let body = read_body(response).await?;
    let message = serde_json::from_slice::<ErrorResponse>(&body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_owned());

    Err(DockerError::ApiError {
        status: status.as_u16(),
        message,
    })
}

async fn read_body(response: Response<Incoming>) -> Result<Bytes> {
    let collected = response
        .collect()
        .await
        .map_err(|e| DockerError::Transport(format!("failed to read response: {e}")))?;
    Ok(collected.to_bytes())
}

async fn read_json<T: DeserializeOwned>(response: Response<Incoming>) -> Result<T> {
    let body = read_body(response).await?;
    Ok(serde_json::from_slice(&body)?)
}

fn body_stream(response: Response<Incoming>) -> ByteStream {
    response
        .into_body()
        .into_data_stream()
        .map_err(|e| DockerError::Transport(format!("stream interrupted: {e}")))
        .boxed()
}

fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[async_trait]
impl DockerApi for DockerClient {
    async fn info(&self) -> Result<Value> {
        self.get_json("/info").await
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        self.get_json("/images/json").await
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let all = if all { "1" } else { "0" };
        self.get_json(&format!("/containers/json?{}", query(&[("all", all)])))
            .await
    }

    async fn build_image(&self, context: Bytes, tag: &str) -> Result<ByteStream> {
        let path = format!("/build?{}", query(&[("t", tag), ("rm", "1")]));
        let response = self
            .api_request(Method::POST, &path, Some(("application/x-tar", context)), false)
            .await?;
        Ok(body_stream(response))
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let path = format!("/containers/create?{}", query(&[("name", name)]));
        let body = Bytes::from(serde_json::to_vec(&spec.to_create_body())?);
        let response = self
            .api_request(Method::POST, &path, Some(("application/json", body)), false)
            .await?;
        let created: CreateResponse = read_json(response).await?;
        Ok(created.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.api_request(Method::POST, &format!("/containers/{name}/start"), None, true)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.api_request(Method::POST, &format!("/containers/{name}/stop"), None, true)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.api_request(Method::DELETE, &format!("/containers/{name}"), None, false)
            .await?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Value> {
        self.get_json(&format!("/containers/{name}/json")).await
    }

    async fn inspect_image(&self, name: &str) -> Result<Value> {
        self.get_json(&format!("/images/{name}/json")).await
    }

    async fn logs(&self, name: &str) -> Result<ByteStream> {
        let path = format!(
            "/containers/{name}/logs?{}",
            query(&[("follow", "1"), ("stdout", "1"), ("stderr", "1")])
        );
        let response = self.api_request(Method::GET, &path, None, false).await?;
        Ok(body_stream(response))
    }

    async fn attach(&self, name: &str) -> Result<AttachStream> {
        let path = format!(
            "{}/containers/{name}/attach?{}",
            self.prefix().await?,
            query(&[("stream", "1"), ("stdin", "1"), ("stdout", "1"), ("stderr", "1")])
        );
        let url: hyper::Uri = Uri::new(&self.socket, &path).into();
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "tcp")
            .body(Full::new(Bytes::new()))
            .map_err(|e| DockerError::Transport(format!("failed to build request: {e}")))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| DockerError::Transport(format!("attach request failed: {e}")))?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            check_status(response, false).await?;
            return Err(DockerError::Transport(
                "daemon did not upgrade the attach connection".to_owned(),
            ));
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| DockerError::Transport(format!("attach upgrade failed: {e}")))?;
        Ok(Box::new(TokioIo::new(upgraded)))
    }

    async fn resize_tty(&self, name: &str, width: u16, height: u16) -> Result<()> {
        let (w, h) = (width.to_string(), height.to_string());
        let path = format!("/containers/{name}/resize?{}", query(&[("h", &h), ("w", &w)]));
        self.api_request(Method::POST, &path, None, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_url_encoded() {
        assert_eq!(query(&[("t", "ci1"), ("rm", "1")]), "t=ci1&rm=1");
        assert_eq!(query(&[("name", "a b/c")]), "name=a+b%2Fc");
    }

    #[test]
    fn client_from_settings() {
        let client = DockerClient::from_settings(&DockerSettings::default());
        assert_eq!(client.socket(), Path::new("/var/run/docker.sock"));
        assert_eq!(client.api_version, "auto");
    }

    #[tokio::test]
    async fn explicit_version_skips_negotiation() {
        let client = DockerClient::new("/nonexistent/docker.sock", "v1.41");
        assert_eq!(client.prefix().await.ok(), Some("/v1.41"));
    }

    #[tokio::test]
    async fn missing_socket_is_a_transport_error() {
        let client = DockerClient::new("/nonexistent/docker.sock", "1.41");
        let err = client.list_images().await;
        assert!(matches!(err, Err(DockerError::Transport(_))));
    }
}

//! HTTP client for the DigitalOcean v2 API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use dbb_config::DigitalOceanSettings;

use crate::api::{CloudApi, CreateDroplet, Droplet, Image};
use crate::error::{CloudError, CloudResult};

const PAGE_SIZE: &str = "200";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct DropletBody {
    droplet: Droplet,
}

/// DigitalOcean API client.
#[derive(Clone)]
pub struct DigitalOceanClient {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for DigitalOceanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalOceanClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DigitalOceanClient {
    /// Create a client from configuration. The API token is required.
    pub fn new(settings: &DigitalOceanSettings) -> CloudResult<Self> {
        Self::with_url(&settings.api_url, settings.token()?)
    }

    /// Create a client for a custom base URL.
    pub fn with_url(url: &str, token: &str) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    /// Fetch every page of a list endpoint, collecting the items under `key`.
    async fn list_all<T: DeserializeOwned>(&self, path: &str, key: &str) -> CloudResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(format!("{}{path}", self.base_url));

        while let Some(url) = next {
            debug!(%url, "fetching page");
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;
            let mut page: Value = check(response).await?.json().await?;

            if let Some(batch) = page.get_mut(key).map(Value::take) {
                items.extend(serde_json::from_value::<Vec<T>>(batch)?);
            }
            next = next_page(&page);
        }

        Ok(items)
    }
}

fn next_page(page: &Value) -> Option<String> {
    page.pointer("/links/pages/next")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

async fn check(response: Response) -> CloudResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await?;
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    Err(CloudError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CloudApi for DigitalOceanClient {
    async fn list_images(&self) -> CloudResult<Vec<Image>> {
        self.list_all(&format!("/images?private=true&per_page={PAGE_SIZE}"), "images")
            .await
    }

    async fn list_droplets(&self) -> CloudResult<Vec<Droplet>> {
        self.list_all(&format!("/droplets?per_page={PAGE_SIZE}"), "droplets")
            .await
    }

    async fn create_droplet(&self, request: &CreateDroplet) -> CloudResult<Droplet> {
        let url = format!("{}/droplets", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let body: DropletBody = check(response).await?.json().await?;
        Ok(body.droplet)
    }

    async fn destroy_droplet(&self, id: u64) -> CloudResult<()> {
        let url = format!("{}/droplets/{id}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn requires_token() {
        let err = DigitalOceanClient::new(&DigitalOceanSettings::default()).unwrap_err();
        assert!(matches!(err, CloudError::Config(_)));
    }

    #[test]
    fn base_url_is_normalised() {
        let client = DigitalOceanClient::with_url("https://api.example/v2/", "t").unwrap();
        assert_eq!(client.base_url, "https://api.example/v2");
    }

    #[test]
    fn next_page_follows_links() {
        let page = serde_json::json!({
            "droplets": [],
            "links": {"pages": {"next": "https://api.example/v2/droplets?page=2"}}
        });
        assert_eq!(
            next_page(&page).as_deref(),
            Some("https://api.example/v2/droplets?page=2")
        );
        assert_eq!(next_page(&serde_json::json!({"links": {}})), None);
    }

    #[test]
    fn create_request_serialises_provider_fields() {
        let request = CreateDroplet {
            name: "cloud1".to_owned(),
            region: "nyc3".to_owned(),
            size: "s-1vcpu-1gb".to_owned(),
            image: 42,
            backups: false,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "cloud1", "region": "nyc3", "size": "s-1vcpu-1gb",
                "image": 42, "backups": false
            })
        );
    }
}

//! Cloud provider API surface used by the provisioner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CloudResult;

/// Status a droplet reports once it is up.
pub const STATUS_ACTIVE: &str = "active";

/// An image owned by the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub name: String,
}

/// A droplet as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    /// `new`, `active`, `off` or `archive`.
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub networks: Networks,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Droplet {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Public IPv4 address, once assigned.
    #[must_use]
    pub fn ip_address(&self) -> Option<&str> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address.as_str())
    }
}

/// Parameters for creating a droplet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateDroplet {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: u64,
    pub backups: bool,
}

/// Calls the provisioner makes against the cloud provider.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Images owned by the account.
    async fn list_images(&self) -> CloudResult<Vec<Image>>;

    /// All droplets in the account.
    async fn list_droplets(&self) -> CloudResult<Vec<Droplet>>;

    async fn create_droplet(&self, request: &CreateDroplet) -> CloudResult<Droplet>;

    async fn destroy_droplet(&self, id: u64) -> CloudResult<()>;
}

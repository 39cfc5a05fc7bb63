//! In-memory cloud provider for tests.
//!
//! Droplets change state as they are polled: a created droplet reports `new`
//! until it has been listed a configurable number of times, and a destroyed
//! droplet keeps appearing for a configurable number of listings.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::api::{CloudApi, CreateDroplet, Droplet, Image, NetworkV4, Networks, STATUS_ACTIVE};
use crate::error::{CloudError, CloudResult};

/// A call made against [`MockCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    ListImages,
    ListDroplets,
    Create(CreateDroplet),
    Destroy(u64),
}

#[derive(Debug)]
struct MockDroplet {
    droplet: Droplet,
    polls_until_active: u32,
    polls_until_gone: Option<u32>,
}

#[derive(Debug, Default)]
struct CloudState {
    images: Vec<Image>,
    droplets: Vec<MockDroplet>,
    calls: Vec<CloudCall>,
    activate_after: u32,
    vanish_after: u32,
    lose_created: bool,
    terminate_on_destroy: bool,
    next_id: u64,
}

/// In-memory cloud provider recording every call.
#[derive(Debug, Default)]
pub struct MockCloud {
    state: Mutex<CloudState>,
}

fn poisoned() -> CloudError {
    CloudError::Task("lock poisoned".to_owned())
}

fn droplet(id: u64, name: &str, status: &str) -> Droplet {
    Droplet {
        id,
        name: name.to_owned(),
        status: status.to_owned(),
        created_at: Utc::now(),
        networks: Networks {
            v4: vec![NetworkV4 {
                ip_address: format!("192.0.2.{}", id % 250),
                kind: "public".to_owned(),
            }],
        },
    }
}

impl MockCloud {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(self, f: impl FnOnce(&mut CloudState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
        self
    }

    /// Add an account-owned image.
    #[must_use]
    pub fn with_image(self, id: u64, name: &str) -> Self {
        self.with_state(|state| {
            state.images.push(Image {
                id,
                name: name.to_owned(),
            });
        })
    }

    /// Add an existing droplet with the given status.
    #[must_use]
    pub fn with_droplet(self, name: &str, status: &str) -> Self {
        self.with_state(|state| {
            state.next_id += 1;
            state.droplets.push(MockDroplet {
                droplet: droplet(state.next_id, name, status),
                polls_until_active: 0,
                polls_until_gone: None,
            });
        })
    }

    /// Created droplets become active after this many listings.
    #[must_use]
    pub fn activate_after(self, polls: u32) -> Self {
        self.with_state(|state| state.activate_after = polls)
    }

    /// Destroyed droplets disappear after this many listings.
    #[must_use]
    pub fn vanish_after(self, polls: u32) -> Self {
        self.with_state(|state| state.vanish_after = polls)
    }

    /// Accept create requests without ever creating the droplet.
    #[must_use]
    pub fn losing_created_droplets(self) -> Self {
        self.with_state(|state| state.lose_created = true)
    }

    /// Droplets are terminated externally just before a destroy request
    /// reaches them, so the request itself sees a 404.
    #[must_use]
    pub fn terminated_during_destroy(self) -> Self {
        self.with_state(|state| state.terminate_on_destroy = true)
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&CloudCall) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    /// Names of droplets currently present.
    #[must_use]
    pub fn droplet_names(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.droplets.iter().map(|d| d.droplet.name.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, call: CloudCall) -> CloudResult<std::sync::MutexGuard<'_, CloudState>> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.calls.push(call);
        Ok(state)
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    async fn list_images(&self) -> CloudResult<Vec<Image>> {
        let state = self.record(CloudCall::ListImages)?;
        Ok(state.images.clone())
    }

    async fn list_droplets(&self) -> CloudResult<Vec<Droplet>> {
        let mut state = self.record(CloudCall::ListDroplets)?;

        for entry in &mut state.droplets {
            if entry.polls_until_active > 0 {
                entry.polls_until_active -= 1;
                if entry.polls_until_active == 0 {
                    entry.droplet.status = STATUS_ACTIVE.to_owned();
                }
            }
            if let Some(polls) = entry.polls_until_gone.as_mut() {
                *polls = polls.saturating_sub(1);
            }
        }
        state.droplets.retain(|d| d.polls_until_gone != Some(0));

        Ok(state.droplets.iter().map(|d| d.droplet.clone()).collect())
    }

    async fn create_droplet(&self, request: &CreateDroplet) -> CloudResult<Droplet> {
        let mut state = self.record(CloudCall::Create(request.clone()))?;
        state.next_id += 1;
        let created = droplet(state.next_id, &request.name, "new");

        if !state.lose_created {
            let activate_after = state.activate_after;
            let mut entry = MockDroplet {
                droplet: created.clone(),
                polls_until_active: activate_after,
                polls_until_gone: None,
            };
            if activate_after == 0 {
                entry.droplet.status = STATUS_ACTIVE.to_owned();
            }
            state.droplets.push(entry);
        }
        Ok(created)
    }

    async fn destroy_droplet(&self, id: u64) -> CloudResult<()> {
        let mut state = self.record(CloudCall::Destroy(id))?;
        if state.terminate_on_destroy {
            state.droplets.retain(|d| d.droplet.id != id);
        }
        let vanish_after = state.vanish_after;
        let entry = state
            .droplets
            .iter_mut()
            .find(|d| d.droplet.id == id)
            .ok_or_else(|| CloudError::Api {
                status: 404,
                message: "The resource you were accessing could not be found.".to_owned(),
            })?;
        entry.polls_until_gone = Some(vanish_after);
        if vanish_after == 0 {
            state.droplets.retain(|d| d.droplet.id != id);
        }
        Ok(())
    }
}

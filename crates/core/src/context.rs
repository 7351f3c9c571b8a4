//! Request-scoped collaborators.
//!
//! Every handler operation receives a [`RequestContext`] instead of reaching for ambient
//! globals: the store, the optional federation endpoint, the acting user and the clock.

use crate::config::BridgeConfig;
use crate::federation::RemoteReportSource;
use crate::model::VoidInfo;
use crate::store::ClinicalStore;
use chrono::{DateTime, Utc};

pub struct RequestContext<'a> {
    store: &'a mut dyn ClinicalStore,
    config: &'a BridgeConfig,
    remote: Option<&'a dyn RemoteReportSource>,
    user: String,
    now: DateTime<Utc>,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        store: &'a mut dyn ClinicalStore,
        config: &'a BridgeConfig,
        user: impl Into<String>,
    ) -> Self {
        Self {
            store,
            config,
            remote: None,
            user: user.into(),
            now: Utc::now(),
        }
    }

    pub fn with_remote(mut self, remote: &'a dyn RemoteReportSource) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Pin the request clock, used for audit timestamps.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn store(&self) -> &dyn ClinicalStore {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut dyn ClinicalStore {
        &mut *self.store
    }

    pub fn config(&self) -> &'a BridgeConfig {
        self.config
    }

    pub fn remote(&self) -> Option<&'a dyn RemoteReportSource> {
        self.remote
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn void_info(&self, reason: impl Into<String>) -> VoidInfo {
        VoidInfo {
            reason: reason.into(),
            voided_by: self.user.clone(),
            date_voided: self.now,
        }
    }
}

//! Health reporting.
//!
//! [`Platform::health`](crate::Platform::health) aggregates one
//! [`HealthStatus`] per service into a [`HealthReport`]. Overall status is
//! `healthy` when every service is running, `degraded` when some are, and
//! `unhealthy` otherwise.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::ServiceState;

/// Health of one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    name: String,
    state: ServiceState,
    protocol: String,
    version: String,
    uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    metadata: BTreeMap<String, String>,
}

impl HealthStatus {
    /// Creates a status snapshot.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        state: ServiceState,
        protocol: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            state,
            protocol: protocol.into(),
            version: version.into(),
            uptime_seconds: 0,
            started_at: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the start instant and uptime.
    #[must_use]
    pub fn with_uptime(mut self, started_at: DateTime<Utc>, uptime: Duration) -> Self {
        self.started_at = Some(started_at);
        self.uptime_seconds = uptime.as_secs();
        self
    }

    /// Sets the extra fields.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ServiceState {
        self.state
    }

    /// Returns the protocol tag.
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Returns the reported version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns seconds since the service started.
    #[must_use]
    pub const fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds
    }

    /// Returns when the service started, if it has.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns the extra fields.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Returns `true` while running.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == ServiceState::Running
    }
}

/// Health of every service on a platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    status: String,
    services: Vec<HealthStatus>,
}

impl HealthReport {
    /// Aggregates per-service statuses.
    #[must_use]
    pub fn new(services: Vec<HealthStatus>) -> Self {
        let running = services.iter().filter(|s| s.is_healthy()).count();
        let status = if !services.is_empty() && running == services.len() {
            "healthy"
        } else if running > 0 {
            "degraded"
        } else {
            "unhealthy"
        };
        Self {
            status: status.to_string(),
            services,
        }
    }

    /// Returns `healthy`, `degraded` or `unhealthy`.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Returns `true` when every service is running.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    /// Returns the per-service statuses.
    #[must_use]
    pub fn services(&self) -> &[HealthStatus] {
        &self.services
    }

    /// Returns the status of one service.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&HealthStatus> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str, state: ServiceState) -> HealthStatus {
        HealthStatus::new(name, state, "http", "1.0.0")
    }

    #[test]
    fn test_overall_status() {
        let all = HealthReport::new(vec![
            status("a", ServiceState::Running),
            status("b", ServiceState::Running),
        ]);
        assert_eq!(all.status(), "healthy");

        let some = HealthReport::new(vec![
            status("a", ServiceState::Running),
            status("b", ServiceState::Failed),
        ]);
        assert_eq!(some.status(), "degraded");
        assert_eq!(some.service("b").map(HealthStatus::state), Some(ServiceState::Failed));

        assert_eq!(HealthReport::new(Vec::new()).status(), "unhealthy");
    }

    #[test]
    fn test_status_json_shape() {
        let mut metadata = BTreeMap::new();
        metadata.insert("addr".to_string(), "127.0.0.1:8080".to_string());
        let s = status("api", ServiceState::Running).with_metadata(metadata);

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["protocol"], "http");
        assert_eq!(json["metadata"]["addr"], "127.0.0.1:8080");
        assert!(json.get("started_at").is_none());
    }
}

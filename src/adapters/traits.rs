//! Light controller abstraction
//!
//! The control loop only needs a handful of operations from the bridge:
//! authenticate, enumerate lights and set one attribute on one light.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A light known to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    /// Bridge-assigned id, as used in API paths ("1", "2", ...)
    pub id: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("request to bridge failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bridge answered with HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("bridge error {kind}: {description}")]
    Bridge { kind: u64, description: String },

    #[error("link button on the bridge was not pressed")]
    LinkButtonNotPressed,

    #[error("not connected to the bridge")]
    NotConnected,

    #[error("unexpected bridge response: {0}")]
    InvalidResponse(String),
}

impl ControllerError {
    /// Network hiccups and server-side failures are worth another try;
    /// errors reported by the bridge itself are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Http(_) => true,
            ControllerError::Status(status) => status.is_server_error(),
            _ => false,
        }
    }

    /// The bridge no longer knows the addressed light (error type 3).
    pub fn is_missing_resource(&self) -> bool {
        matches!(self, ControllerError::Bridge { kind: 3, .. })
    }
}

/// Capability the control loop drives.
#[async_trait]
pub trait LightController: Send + Sync {
    /// Authenticate against the bridge.
    async fn connect(&mut self) -> Result<(), ControllerError>;

    /// Refresh the light list from the bridge and return it.
    async fn fetch_state(&mut self) -> Result<Vec<Light>, ControllerError>;

    /// Lights seen by the last `fetch_state`, ordered by id.
    fn lights(&self) -> &[Light];

    /// Set a single state attribute (e.g. `"hue"`) on one light.
    async fn set_light(
        &self,
        light_id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), ControllerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ControllerError::Status(reqwest::StatusCode::BAD_GATEWAY).is_transient());
        assert!(!ControllerError::Status(reqwest::StatusCode::NOT_FOUND).is_transient());
        assert!(!ControllerError::LinkButtonNotPressed.is_transient());
        assert!(!ControllerError::Bridge {
            kind: 1,
            description: "unauthorized user".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn test_missing_resource() {
        let missing = ControllerError::Bridge {
            kind: 3,
            description: "resource, /lights/7, not available".to_string(),
        };
        assert!(missing.is_missing_resource());
        assert!(!missing.is_transient());
        assert!(!ControllerError::Bridge {
            kind: 1,
            description: "unauthorized user".to_string(),
        }
        .is_missing_resource());
    }
}

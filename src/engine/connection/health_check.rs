//! Engine API health checks.

use std::time::Duration;

use bollard::Docker;

use super::error_classification::classify_ping_error;
use super::{EngineConnector, HEALTH_CHECK_TIMEOUT_SECS};
use crate::error::{ContainerError, ScpError};

impl EngineConnector {
    /// Pings the engine behind `docker`, bounded by the health check
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::SocketNotFound` or
    /// `ContainerError::PermissionDenied` when `socket` cannot be opened,
    /// `ContainerError::HealthCheckTimeout` if the ping times out, and
    /// `ContainerError::ConnectionFailed` otherwise.
    pub async fn ping(docker: &Docker, socket: &str) -> Result<(), ScpError> {
        let timeout = Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS);
        tokio::time::timeout(timeout, docker.ping())
            .await
            .map_err(|_| ContainerError::HealthCheckTimeout {
                seconds: HEALTH_CHECK_TIMEOUT_SECS,
            })?
            .map_err(|error| classify_ping_error(&error, socket))?;
        Ok(())
    }

    /// Connect to the engine at `socket` and verify it responds.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::connect`] and [`Self::ping`].
    pub async fn connect_and_verify_async(socket: &str) -> Result<Docker, ScpError> {
        let docker = Self::connect(socket)?;
        Self::ping(&docker, socket).await?;
        tracing::debug!(event = "engine.api_ready", socket = %socket);
        Ok(docker)
    }
}

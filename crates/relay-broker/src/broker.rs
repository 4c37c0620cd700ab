//! Wiring: builds the broker context, binds the endpoint, and starts the
//! background tasks.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::application::{BrokerContext, RelayTransport};
use crate::domain::{BrokerConfig, BrokerError};
use crate::infrastructure::{EndpointFile, RelayListener, SerialDevice, TransportManager};
use crate::shutdown::ShutdownCoordinator;

/// A started broker.
///
/// Dropping it does not stop anything; call [`RelayBroker::shutdown`].
pub struct RelayBroker {
    context: Arc<BrokerContext>,
    transport: Arc<TransportManager>,
    endpoint: Arc<EndpointFile>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl RelayBroker {
    /// Validates `config`, binds the endpoint and spawns the accept loop and
    /// the transport monitor.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] for an invalid configuration and
    /// [`BrokerError::EndpointBind`] / [`BrokerError::EndpointPermissions`]
    /// if the endpoint cannot be created.  Nothing is left running on error.
    pub fn start(config: &BrokerConfig, device: Arc<dyn SerialDevice>) -> Result<Self, BrokerError> {
        config.validate()?;

        let listener = RelayListener::bind(&config.endpoint_path, config.endpoint_mode)?;
        let endpoint = listener.endpoint();

        let transport = Arc::new(TransportManager::new(device, config));
        let context = Arc::new(BrokerContext::new(
            Arc::clone(&transport) as Arc<dyn RelayTransport>,
            config.max_line_len,
            config.shutdown_timeout,
        ));

        let monitor = {
            let transport = Arc::clone(&transport);
            let stop = context.stop.clone();
            tokio::spawn(async move { transport.run_monitor(stop).await })
        };
        let accept = tokio::spawn(listener.run(Arc::clone(&context), config.accept_poll_interval));

        let coordinator = Arc::new(ShutdownCoordinator::new(
            context.stop.clone(),
            context.registry.clone(),
            Arc::clone(&context.transport),
            Arc::clone(&endpoint),
            vec![accept, monitor],
            config.shutdown_timeout,
        ));

        info!(
            endpoint = %config.endpoint_path.display(),
            device = %transport.device_id(),
            "relay broker started"
        );

        Ok(Self {
            context,
            transport,
            endpoint,
            coordinator,
        })
    }

    pub fn context(&self) -> &Arc<BrokerContext> {
        &self.context
    }

    pub fn transport(&self) -> &Arc<TransportManager> {
        &self.transport
    }

    pub fn endpoint_path(&self) -> &Path {
        self.endpoint.path()
    }

    /// Handle for shutting down from another task (e.g. a signal handler).
    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}

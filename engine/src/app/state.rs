//! Application state management

use std::sync::Arc;

use rumqttc::EventLoop;
use tokio::sync::mpsc;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::command::CommandDeployer;
use crate::deploy::executor::DeploymentExecutor;
use crate::discovery::gateway::{CandidateDevicesNotification, DiscoveryGateway};
use crate::engine::{DiscoveryEngine, Repositories};
use crate::errors::DiscoveryError;
use crate::messaging::local::LocalBus;
use crate::messaging::PubSub;
use crate::mqtt::client::MqttBus;
use crate::storage::repository::DocumentStore;

/// Broker connection owned by the MQTT worker
pub struct MqttConnection {
    pub bus: Arc<MqttBus>,
    pub eventloop: EventLoop,
}

/// Main application state
pub struct AppState {
    /// Templates, request topics and deployments
    pub store: Arc<DocumentStore>,

    pub bus: Arc<dyn PubSub>,

    pub gateway: Arc<DiscoveryGateway>,

    pub engine: DiscoveryEngine,
}

impl AppState {
    /// Initialize application state.
    ///
    /// Returns the receiving end of the gateway's notifications and, when the
    /// broker is enabled, the connection the MQTT worker must drive.
    pub async fn init(
        options: &AppOptions,
    ) -> Result<
        (
            Self,
            mpsc::UnboundedReceiver<CandidateDevicesNotification>,
            Option<MqttConnection>,
        ),
        DiscoveryError,
    > {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        layout.setup().await?;
        let store = Arc::new(
            DocumentStore::open(layout.repositories_dir(), options.storage.persist_repositories)
                .await?,
        );

        let (bus, connection) = if options.enable_mqtt_worker {
            let (mqtt_bus, eventloop) = MqttBus::new(&options.mqtt_worker.broker_address)?;
            let mqtt_bus = Arc::new(mqtt_bus);
            let bus: Arc<dyn PubSub> = mqtt_bus.clone();
            let connection = MqttConnection {
                bus: mqtt_bus,
                eventloop,
            };
            (bus, Some(connection))
        } else {
            info!("MQTT host not configured, using the in-process bus");
            let bus: Arc<dyn PubSub> = Arc::new(LocalBus::new());
            (bus, None)
        };

        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(DiscoveryGateway::new(bus.clone(), notifications_tx));

        let executor =
            DeploymentExecutor::new(Arc::new(CommandDeployer::new(options.deployer.clone())));
        let engine = DiscoveryEngine::new(
            options.engine.clone(),
            Repositories {
                templates: store.clone(),
                request_topics: store.clone(),
                deployments: store.clone(),
            },
            gateway.clone(),
            executor,
        )?;

        let state = Self {
            store,
            bus,
            gateway,
            engine,
        };
        Ok((state, notifications_rx, connection))
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DiscoveryError> {
        info!("Waiting for running discovery tasks...");
        self.engine.wait_idle().await;
        Ok(())
    }
}

//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, MqttConnection};
use crate::discovery::gateway::CandidateDevicesNotification;
use crate::errors::DiscoveryError;
use crate::workers::{dispatcher, mqtt};

/// Run the discovery daemon
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DiscoveryError> {
    info!("Initializing discovery daemon...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start discovery daemon: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, DiscoveryError> {
    let (app_state, notifications, connection) = AppState::init(options).await?;
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    if let Some(connection) = connection {
        init_mqtt_worker(options.mqtt_worker.clone(), connection, shutdown_manager)?;
    }

    init_dispatch_worker(
        app_state.clone(),
        notifications,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.resume_on_startup {
        app_state.engine.initialize().await?;
    }

    Ok(app_state)
}

/// The MQTT worker is stopped last, after the engine drained, so it has its own signal
fn init_mqtt_worker(
    options: mqtt::Options,
    connection: MqttConnection,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DiscoveryError> {
    info!("Initializing MQTT worker...");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let mqtt_handle = tokio::spawn(async move {
        mqtt::run(
            &options,
            connection.bus,
            connection.eventloop,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = stop_rx.await;
            }),
        )
        .await;
    });

    shutdown_manager.with_mqtt_worker_handle(mqtt_handle, stop_tx)
}

fn init_dispatch_worker(
    app_state: Arc<AppState>,
    notifications: mpsc::UnboundedReceiver<CandidateDevicesNotification>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DiscoveryError> {
    info!("Initializing dispatch worker...");

    let engine = app_state.engine.clone();
    let dispatch_handle = tokio::spawn(async move {
        dispatcher::run(
            engine,
            notifications,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_dispatch_worker_handle(dispatch_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    dispatch_worker_handle: Option<JoinHandle<()>>,
    mqtt_worker_handle: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            dispatch_worker_handle: None,
            mqtt_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), DiscoveryError> {
        if self.app_state.is_some() {
            return Err(DiscoveryError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_dispatch_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), DiscoveryError> {
        if self.dispatch_worker_handle.is_some() {
            return Err(DiscoveryError::ShutdownError("dispatch_handle already set".to_string()));
        }
        self.dispatch_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_mqtt_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
        stop_tx: oneshot::Sender<()>,
    ) -> Result<(), DiscoveryError> {
        if self.mqtt_worker_handle.is_some() {
            return Err(DiscoveryError::ShutdownError("mqtt_handle already set".to_string()));
        }
        self.mqtt_worker_handle = Some((handle, stop_tx));
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DiscoveryError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DiscoveryError> {
        info!("Shutting down discovery daemon...");

        // 1. Stop feeding notifications into the engine
        if let Some(handle) = self.dispatch_worker_handle.take() {
            handle.await.map_err(|e| DiscoveryError::ShutdownError(e.to_string()))?;
        }

        // 2. Let running tasks finish while the broker is still reachable
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        // 3. MQTT worker
        if let Some((handle, stop_tx)) = self.mqtt_worker_handle.take() {
            let _ = stop_tx.send(());
            handle.await.map_err(|e| DiscoveryError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

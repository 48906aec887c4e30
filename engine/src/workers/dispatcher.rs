//! Dispatch worker feeding repository notifications into the engine

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::discovery::gateway::CandidateDevicesNotification;
use crate::engine::DiscoveryEngine;

/// Run the dispatch worker until shutdown or until the gateway is dropped
pub async fn run(
    engine: DiscoveryEngine,
    mut notifications: mpsc::UnboundedReceiver<CandidateDevicesNotification>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Dispatch worker starting...");

    loop {
        let notification = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatch worker shutting down...");
                return;
            }
            notification = notifications.recv() => notification,
        };

        let Some(notification) = notification else {
            info!("Notification channel closed, dispatch worker exiting");
            return;
        };

        debug!(
            "{} changed candidates of {}",
            notification.repository_name, notification.template_id
        );
        if let Err(e) = engine.on_candidate_devices_changed(notification).await {
            error!("Failed to handle candidate devices change: {}", e);
        }
    }
}

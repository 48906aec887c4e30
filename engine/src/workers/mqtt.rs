//! MQTT worker driving the broker connection of the bus

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{Event, EventLoop, Packet};
use tracing::{debug, error, info, warn};

use crate::mqtt::client::{MqttAddress, MqttBus};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// MQTT worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// MQTT broker address
    pub broker_address: MqttAddress,

    /// Backoff between reconnect attempts
    pub reconnect_cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            broker_address: MqttAddress::default(),
            reconnect_cooldown: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        }
    }
}

/// Run the MQTT worker.
///
/// Polls the event loop, hands incoming publishes to the bus and restores the
/// broker subscriptions after every (re)connect.
pub async fn run<S, F>(
    options: &Options,
    bus: Arc<MqttBus>,
    mut eventloop: EventLoop,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "MQTT worker connecting to {}:{}",
        options.broker_address.host, options.broker_address.port
    );

    let mut failed_attempts: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT worker shutting down...");
                if let Err(e) = bus.disconnect().await {
                    debug!("MQTT disconnect failed: {}", e);
                }
                return;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivered = bus.deliver(&publish.topic, &publish.payload);
                debug!(
                    "Received {} bytes on {} for {} subscribers",
                    publish.payload.len(),
                    publish.topic,
                    delivered
                );
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                failed_attempts = 0;
                let bus = bus.clone();
                tokio::spawn(async move {
                    if let Err(e) = bus.resubscribe_all().await {
                        error!("Failed to restore broker subscriptions: {}", e);
                    }
                });
            }
            Ok(_) => {}
            Err(e) => {
                let delay = calc_exp_backoff(&options.reconnect_cooldown, failed_attempts);
                failed_attempts = failed_attempts.saturating_add(1);
                warn!("MQTT connection error: {}, retrying in {:?}", e, delay);
                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("MQTT worker shutting down...");
                        return;
                    }
                    _ = sleep_fn(delay) => {}
                }
            }
        }
    }
}

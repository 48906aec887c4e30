//! MQTT backed publish/subscribe bus

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::errors::DiscoveryError;
use crate::messaging::{PubSub, SubscriberRegistry, Subscription, SubscriptionId};

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 8883,
            use_tls: true,
            ca_cert_path: None,
            client_id: "discoveryd".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Bus over one broker connection.
///
/// Local subscribers share broker subscriptions: a filter is subscribed at the
/// broker for its first local subscriber and unsubscribed with its last.
pub struct MqttBus {
    client: AsyncClient,
    registry: SubscriberRegistry,
}

impl MqttBus {
    /// Creates the bus; the returned event loop must be polled by the MQTT worker
    pub fn new(address: &MqttAddress) -> Result<(Self, EventLoop), DiscoveryError> {
        if address.host.is_empty() {
            return Err(DiscoveryError::MqttError("MQTT host is not configured".to_string()));
        }

        let mut options = MqttOptions::new(&address.client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &address.username {
            let password = address
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let root_cert_store = root_certificates(address.ca_cert_path.as_deref())?;

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        Ok((
            Self {
                client,
                registry: SubscriberRegistry::new(),
            },
            eventloop,
        ))
    }

    /// Hands an incoming publish to the local subscribers
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        self.registry.dispatch(topic, payload)
    }

    /// Re-establishes all broker subscriptions after a (re)connect
    pub async fn resubscribe_all(&self) -> Result<(), DiscoveryError> {
        let filters = self.registry.filters();
        for filter in &filters {
            self.client
                .subscribe(filter.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| DiscoveryError::MqttError(e.to_string()))?;
        }
        if !filters.is_empty() {
            info!("Restored {} broker subscriptions", filters.len());
        }
        Ok(())
    }

    /// Disconnect from broker
    pub async fn disconnect(&self) -> Result<(), DiscoveryError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| DiscoveryError::MqttError(e.to_string()))?;
        info!("MQTT disconnected");
        Ok(())
    }
}

#[async_trait]
impl PubSub for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DiscoveryError::MqttError(e.to_string()))?;
        debug!("Published to: {}", topic);
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str) -> Result<Subscription, DiscoveryError> {
        let (subscription, first) = self.registry.register(topic_filter)?;
        if first {
            if let Err(e) = self.client.subscribe(topic_filter, QoS::AtLeastOnce).await {
                let _ = self.registry.remove(topic_filter, subscription.id());
                return Err(DiscoveryError::MqttError(e.to_string()));
            }
            debug!("Subscribed to: {}", topic_filter);
        }
        Ok(subscription)
    }

    async fn unsubscribe(
        &self,
        topic_filter: &str,
        subscription_id: SubscriptionId,
    ) -> Result<(), DiscoveryError> {
        if self.registry.remove(topic_filter, subscription_id)? {
            self.client
                .unsubscribe(topic_filter)
                .await
                .map_err(|e| DiscoveryError::MqttError(e.to_string()))?;
            debug!("Unsubscribed from: {}", topic_filter);
        }
        Ok(())
    }
}

/// Trust anchors from a PEM file, or the platform's native roots.
///
/// Unusable certificates are skipped with a warning; a CA file without any
/// usable certificate is an error.
fn root_certificates(ca_cert_path: Option<&str>) -> Result<rustls::RootCertStore, DiscoveryError> {
    let mut store = rustls::RootCertStore::empty();

    let Some(ca_path) = ca_cert_path else {
        let certs = match rustls_native_certs::load_native_certs() {
            Ok(certs) => certs,
            Err(e) => {
                warn!("Failed to load native root certificates: {}", e);
                Vec::new()
            }
        };
        let (added, ignored) = store.add_parsable_certificates(certs);
        if ignored > 0 {
            warn!("Ignored {} unusable native root certificates", ignored);
        }
        debug!("Loaded {} native root certificates", added);
        return Ok(store);
    };

    let ca_pem = std::fs::read(ca_path).map_err(|e| {
        DiscoveryError::MqttError(format!("Failed to read CA cert {ca_path}: {e}"))
    })?;
    let mut cursor = std::io::Cursor::new(ca_pem);
    for cert in rustls_pemfile::certs(&mut cursor) {
        let added = cert
            .map_err(|e| e.to_string())
            .and_then(|cert| store.add(cert).map_err(|e| e.to_string()));
        if let Err(e) = added {
            warn!("Skipping certificate in {}: {}", ca_path, e);
        }
    }
    if store.is_empty() {
        return Err(DiscoveryError::MqttError(format!(
            "no usable certificate in {ca_path}"
        )));
    }
    Ok(store)
}

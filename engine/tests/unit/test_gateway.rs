//! Discovery gateway unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use discovery_engine::discovery::gateway::DiscoveryGateway;
use discovery_engine::errors::DiscoveryError;
use discovery_engine::messaging::local::LocalBus;
use async_trait::async_trait;
use discovery_engine::messaging::{PubSub, Subscription, SubscriptionId};
use discovery_engine::models::candidates::{CandidateDevicesRevision, RevisionOperation};
use discovery_engine::models::description::DeviceDescription;
use discovery_engine::models::messages::{
    CancelSubscriptionsMessage, CandidateDevicesReply, CandidateDevicesRequest, CommandMessage,
    ReplyMessage, RepositoryTestReply, RepositoryTestRequest, RequestMessage,
};
use discovery_engine::models::template::DeviceTemplate;
use discovery_engine::models::topic::RequestTopic;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn device(mac: &str) -> DeviceDescription {
    let mut d = DeviceDescription::default();
    d.identifiers.mac_address = Some(mac.to_string());
    d
}

fn template(id: &str) -> DeviceTemplate {
    DeviceTemplate {
        id: id.to_string(),
        name: String::new(),
        owner: "alice".to_string(),
        requirements: vec![],
        scoring_criteria: vec![],
    }
}

fn lab_topic(expected_replies: usize) -> RequestTopic {
    RequestTopic::new("rt1", "alice", "lab")
        .with_timeout(300)
        .with_expected_replies(expected_replies)
}

fn replace(reference_id: &str, devices: Vec<DeviceDescription>) -> CandidateDevicesRevision {
    CandidateDevicesRevision {
        reference_ids: vec![reference_id.to_string()],
        operations: vec![RevisionOperation::Replace {
            device_descriptions: devices,
        }],
    }
}

struct FakeRepository {
    notification_topic: Arc<Mutex<Option<String>>>,
    cancelled: mpsc::UnboundedReceiver<Vec<String>>,
    handle: JoinHandle<()>,
}

/// Discovery repository listening on `alice/discovery/lab`
async fn spawn_repository(
    bus: Arc<LocalBus>,
    name: &'static str,
    devices: Vec<DeviceDescription>,
) -> FakeRepository {
    let mut requests = bus.subscribe("alice/discovery/lab/+").await.unwrap();
    let notification_topic = Arc::new(Mutex::new(None));
    let (cancelled_tx, cancelled) = mpsc::unbounded_channel();

    let topic = notification_topic.clone();
    let handle = tokio::spawn(async move {
        while let Some(message) = requests.recv().await {
            if message.topic.ends_with("/query") {
                let request: RequestMessage<CandidateDevicesRequest> =
                    message.parse_json().unwrap();
                if let Some(t) = &request.message.notification_topic {
                    *topic.lock().unwrap() = Some(t.clone());
                }
                let reply = ReplyMessage::new(
                    CandidateDevicesReply {
                        revisions: vec![replace(&request.message.reference_id, devices.clone())],
                    },
                    name,
                    Some(request.correlation_id.clone()),
                );
                bus.publish(&request.return_topic, serde_json::to_vec(&reply).unwrap())
                    .await
                    .unwrap();
            } else if message.topic.ends_with("/test") {
                let request: RequestMessage<RepositoryTestRequest> = message.parse_json().unwrap();
                let reply = ReplyMessage::new(
                    RepositoryTestReply {
                        devices_count: devices.len(),
                    },
                    name,
                    Some(request.correlation_id.clone()),
                );
                bus.publish(&request.return_topic, serde_json::to_vec(&reply).unwrap())
                    .await
                    .unwrap();
            } else if message.topic.ends_with("/cancel") {
                let command: CommandMessage<CancelSubscriptionsMessage> =
                    message.parse_json().unwrap();
                let _ = cancelled_tx.send(command.message.reference_ids.into_iter().collect());
            }
        }
    });

    FakeRepository {
        notification_topic,
        cancelled,
        handle,
    }
}

/// Local bus whose publishes fail while `failing` is set
struct FlakyBus {
    inner: Arc<LocalBus>,
    failing: AtomicBool,
}

#[async_trait]
impl PubSub for FlakyBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DiscoveryError::MessagingError(format!("broker refused {}", topic)));
        }
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(&self, topic_filter: &str) -> Result<Subscription, DiscoveryError> {
        self.inner.subscribe(topic_filter).await
    }

    async fn unsubscribe(
        &self,
        topic_filter: &str,
        subscription_id: SubscriptionId,
    ) -> Result<(), DiscoveryError> {
        self.inner.unsubscribe(topic_filter, subscription_id).await
    }
}

#[tokio::test]
async fn test_get_candidate_devices_from_two_repositories() {
    let bus = Arc::new(LocalBus::new());
    let repo_a = spawn_repository(bus.clone(), "repo-a", vec![device("01"), device("02")]).await;
    let repo_b = spawn_repository(bus.clone(), "repo-b", vec![device("03")]).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let gateway = DiscoveryGateway::new(bus.clone(), tx);

    let container = gateway
        .get_candidate_devices(&template("t1"), &[lab_topic(2)])
        .await
        .unwrap();

    assert_eq!(container.template_id, "t1");
    assert_eq!(container.collections_count(), 2);
    assert_eq!(container.collection("repo-a").unwrap().len(), 2);
    assert_eq!(container.collection("repo-b").unwrap().len(), 1);
    assert!(!gateway.is_subscribed("t1").await);
    assert!(repo_a.notification_topic.lock().unwrap().is_none());

    repo_a.handle.abort();
    repo_b.handle.abort();
}

#[tokio::test]
async fn test_rejects_empty_request_topics() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let gateway = DiscoveryGateway::new(Arc::new(LocalBus::new()), tx);

    let result = gateway.get_candidate_devices(&template("t1"), &[]).await;
    assert!(matches!(result, Err(DiscoveryError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_failed_query_releases_new_subscription() {
    let local = Arc::new(LocalBus::new());
    let repo = spawn_repository(local.clone(), "repo-a", vec![device("01")]).await;
    let bus = Arc::new(FlakyBus {
        inner: local.clone(),
        failing: AtomicBool::new(true),
    });
    let (tx, _rx) = mpsc::unbounded_channel();
    let gateway = DiscoveryGateway::new(bus.clone(), tx);

    let result = gateway
        .get_candidate_devices_with_subscription(&template("t1"), &[lab_topic(1)])
        .await;
    assert!(matches!(result, Err(DiscoveryError::MessagingError(_))));
    assert!(!gateway.is_subscribed("t1").await);
    assert!(local.subscribed_filters().iter().all(|f| !f.starts_with("r/")));

    // a failed refresh keeps a subscription made earlier
    bus.failing.store(false, Ordering::SeqCst);
    gateway
        .get_candidate_devices_with_subscription(&template("t1"), &[lab_topic(1)])
        .await
        .unwrap();
    bus.failing.store(true, Ordering::SeqCst);
    let result = gateway
        .get_candidate_devices_with_subscription(&template("t1"), &[lab_topic(1)])
        .await;
    assert!(result.is_err());
    assert!(gateway.is_subscribed("t1").await);

    repo.handle.abort();
}

#[tokio::test]
async fn test_available_repositories() {
    let bus = Arc::new(LocalBus::new());
    let repo = spawn_repository(bus.clone(), "repo-a", vec![device("01"), device("02")]).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let gateway = DiscoveryGateway::new(bus.clone(), tx);

    let repositories = gateway.available_repositories(&lab_topic(1)).await.unwrap();
    assert_eq!(repositories.len(), 1);
    assert_eq!(repositories.get("repo-a"), Some(&2));

    repo.handle.abort();
}

#[tokio::test]
async fn test_subscription_forwards_notifications_until_cancelled() {
    let bus = Arc::new(LocalBus::new());
    let mut repo = spawn_repository(bus.clone(), "repo-a", vec![device("01")]).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let gateway = DiscoveryGateway::new(bus.clone(), tx);
    let t1 = template("t1");

    let container = gateway
        .get_candidate_devices_with_subscription(&t1, &[lab_topic(1)])
        .await
        .unwrap();
    assert_eq!(container.devices_count(), 1);
    assert!(gateway.is_subscribed("t1").await);

    let notification_topic = repo.notification_topic.lock().unwrap().clone().unwrap();
    assert!(notification_topic.starts_with("r/alice/discovery/"));

    // revision for an unsubscribed template comes first and is skipped
    let change = ReplyMessage::new(
        CandidateDevicesReply {
            revisions: vec![CandidateDevicesRevision {
                reference_ids: vec!["t9".to_string(), "t1".to_string()],
                operations: vec![RevisionOperation::Delete {
                    mac_addresses: vec!["01".to_string()],
                }],
            }],
        },
        "repo-a",
        None,
    );
    bus.publish(&notification_topic, serde_json::to_vec(&change).unwrap())
        .await
        .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.template_id, "t1");
    assert_eq!(notification.repository_name, "repo-a");
    assert_eq!(notification.revision.operations.len(), 1);

    gateway.cancel_subscription(&t1, &[]).await.unwrap();
    let cancelled = tokio::time::timeout(Duration::from_secs(1), repo.cancelled.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled, vec!["t1".to_string()]);
    assert!(!gateway.is_subscribed("t1").await);
    assert!(!bus.subscribed_filters().contains(&notification_topic));

    repo.handle.abort();
}

#[tokio::test]
async fn test_owner_channel_is_shared_between_templates() {
    let bus = Arc::new(LocalBus::new());
    let mut repo = spawn_repository(bus.clone(), "repo-a", vec![device("01")]).await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let gateway = DiscoveryGateway::new(bus.clone(), tx);

    gateway
        .get_candidate_devices_with_subscription(&template("t1"), &[lab_topic(1)])
        .await
        .unwrap();
    let first = repo.notification_topic.lock().unwrap().clone().unwrap();
    gateway
        .get_candidate_devices_with_subscription(&template("t2"), &[lab_topic(1)])
        .await
        .unwrap();
    let second = repo.notification_topic.lock().unwrap().clone().unwrap();
    assert_eq!(first, second);

    gateway.cancel_subscription(&template("t1"), &[]).await.unwrap();
    assert!(bus.subscribed_filters().contains(&first));

    gateway
        .cancel_subscriptions_for_request_topic(&[template("t2")], &lab_topic(1))
        .await
        .unwrap();
    assert_eq!(repo.cancelled.recv().await.unwrap(), vec!["t1".to_string()]);
    assert_eq!(repo.cancelled.recv().await.unwrap(), vec!["t2".to_string()]);

    repo.handle.abort();
}

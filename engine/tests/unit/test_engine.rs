//! Discovery engine unit tests

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use discovery_engine::deploy::executor::DeploymentExecutor;
use discovery_engine::deploy::Deployer;
use discovery_engine::discovery::gateway::{CandidateDevicesNotification, DiscoveryGateway};
use discovery_engine::engine::log::LogMessageType;
use discovery_engine::engine::tasks::TaskKind;
use discovery_engine::engine::{DiscoveryEngine, EngineOptions, Repositories};
use discovery_engine::errors::DiscoveryError;
use discovery_engine::messaging::local::LocalBus;
use discovery_engine::messaging::PubSub;
use discovery_engine::models::candidates::{CandidateDevicesRevision, RevisionOperation};
use discovery_engine::models::deployment::{
    DeviceDetails, DynamicDeployment, DynamicDeploymentState,
};
use discovery_engine::models::description::{
    CapabilityValue, DeviceCapability, DeviceDescription, SshDetails,
};
use discovery_engine::models::messages::{
    CancelSubscriptionsMessage, CandidateDevicesReply, CandidateDevicesRequest, CommandMessage,
    ReplyMessage, RequestMessage,
};
use discovery_engine::models::template::{DeviceTemplate, ScoringCriterion, StringOperator};
use discovery_engine::models::topic::RequestTopic;
use discovery_engine::storage::repository::{
    DeviceTemplateRepository, DocumentStore, DynamicDeploymentRepository, RequestTopicRepository,
};
use discovery_engine::workers::dispatcher;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

const GOLD: &str = "aa:00:00:00:00:01";
const SILVER: &str = "aa:00:00:00:00:02";
const BRONZE: &str = "aa:00:00:00:00:03";

fn device(mac: &str, tier: &str) -> DeviceDescription {
    let mut d = DeviceDescription {
        name: Some(format!("node-{}", tier)),
        ssh: Some(SshDetails {
            ip_address: format!("10.0.0.{}", &mac[mac.len() - 1..]),
            port: 22,
            username: "pi".to_string(),
            password: None,
            private_key: None,
        }),
        ..Default::default()
    };
    d.identifiers.mac_address = Some(mac.to_string());
    d.capabilities.push(DeviceCapability {
        name: "tier".to_string(),
        value: CapabilityValue::Text(tier.to_string()),
    });
    d
}

fn tier_criterion(tier: &str, score_increment: f64) -> ScoringCriterion {
    ScoringCriterion::StringCapability {
        capability_name: "tier".to_string(),
        operator: StringOperator::Equals,
        pattern: tier.to_string(),
        score_increment,
    }
}

fn template() -> DeviceTemplate {
    DeviceTemplate {
        id: "t1".to_string(),
        name: "Edge nodes".to_string(),
        owner: "alice".to_string(),
        requirements: vec![],
        scoring_criteria: vec![tier_criterion("gold", 10.0), tier_criterion("silver", 5.0)],
    }
}

fn upsert(devices: Vec<DeviceDescription>) -> CandidateDevicesNotification {
    CandidateDevicesNotification {
        template_id: "t1".to_string(),
        repository_name: "repo-a".to_string(),
        revision: CandidateDevicesRevision {
            reference_ids: vec!["t1".to_string()],
            operations: vec![RevisionOperation::Upsert {
                device_descriptions: devices,
            }],
        },
    }
}

/// Records installations; devices listed in `failing` refuse the operator
#[derive(Default)]
struct FakeDeployer {
    failing: Mutex<HashSet<String>>,
    running: Mutex<HashSet<String>>,
    deploy_calls: AtomicUsize,
    undeploy_calls: AtomicUsize,
}

impl FakeDeployer {
    fn fail_on(&self, mac: &str) {
        self.failing.lock().unwrap().insert(mac.to_string());
    }

    fn is_running_on(&self, mac: &str) -> bool {
        self.running.lock().unwrap().contains(mac)
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(
        &self,
        _deployment: &DynamicDeployment,
        device: &DeviceDetails,
    ) -> Result<bool, DiscoveryError> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&device.mac_address) {
            return Err(DiscoveryError::DeployError(format!(
                "{} is unreachable",
                device.mac_address
            )));
        }
        self.running
            .lock()
            .unwrap()
            .insert(device.mac_address.clone());
        Ok(true)
    }

    async fn undeploy(
        &self,
        _deployment: &DynamicDeployment,
        device: &DeviceDetails,
    ) -> Result<(), DiscoveryError> {
        self.undeploy_calls.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().remove(&device.mac_address);
        Ok(())
    }

    async fn is_deployed(&self, _deployment: &DynamicDeployment, device: &DeviceDetails) -> bool {
        self.is_running_on(&device.mac_address)
    }
}

/// Discovery repository answering queries on `alice/discovery/lab`
struct FakeRepository {
    devices: Arc<Mutex<Vec<DeviceDescription>>>,
    queries: Arc<AtomicUsize>,
    /// Stops answering queries while set
    silent: Arc<AtomicBool>,
    notification_topic: Arc<Mutex<Option<String>>>,
    cancelled: mpsc::UnboundedReceiver<Vec<String>>,
    handle: JoinHandle<()>,
}

async fn spawn_repository(bus: Arc<LocalBus>, devices: Vec<DeviceDescription>) -> FakeRepository {
    let mut requests = bus.subscribe("alice/discovery/lab/+").await.unwrap();
    let devices = Arc::new(Mutex::new(devices));
    let queries = Arc::new(AtomicUsize::new(0));
    let silent = Arc::new(AtomicBool::new(false));
    let notification_topic = Arc::new(Mutex::new(None));
    let (cancelled_tx, cancelled) = mpsc::unbounded_channel();

    let (shared_devices, shared_queries, shared_silent, topic) = (
        devices.clone(),
        queries.clone(),
        silent.clone(),
        notification_topic.clone(),
    );
    let handle = tokio::spawn(async move {
        while let Some(message) = requests.recv().await {
            if message.topic.ends_with("/query") {
                shared_queries.fetch_add(1, Ordering::SeqCst);
                if shared_silent.load(Ordering::SeqCst) {
                    continue;
                }
                let request: RequestMessage<CandidateDevicesRequest> =
                    message.parse_json().unwrap();
                if let Some(t) = &request.message.notification_topic {
                    *topic.lock().unwrap() = Some(t.clone());
                }
                let current = shared_devices.lock().unwrap().clone();
                let reply = ReplyMessage::new(
                    CandidateDevicesReply {
                        revisions: vec![CandidateDevicesRevision {
                            reference_ids: vec![request.message.reference_id.clone()],
                            operations: vec![RevisionOperation::Replace {
                                device_descriptions: current,
                            }],
                        }],
                    },
                    "repo-a",
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
        devices,
        queries,
        silent,
        notification_topic,
        cancelled,
        handle,
    }
}

/// Deployment store whose next template lookup can be held back
struct GatedDeployments {
    store: Arc<DocumentStore>,
    hold_next: AtomicBool,
    held: AtomicUsize,
    release: Semaphore,
}

impl GatedDeployments {
    fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            hold_next: AtomicBool::new(false),
            held: AtomicUsize::new(0),
            release: Semaphore::new(0),
        }
    }

    fn hold_next_lookup(&self) {
        self.hold_next.store(true, Ordering::SeqCst);
    }

    async fn wait_held(&self) {
        while self.held.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    fn release(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl DynamicDeploymentRepository for GatedDeployments {
    async fn find_deployment(&self, id: &str) -> Result<Option<DynamicDeployment>, DiscoveryError> {
        self.store.find_deployment(id).await
    }

    async fn all_deployments(&self) -> Result<Vec<DynamicDeployment>, DiscoveryError> {
        self.store.all_deployments().await
    }

    async fn deployments_by_template(
        &self,
        template_id: &str,
    ) -> Result<Vec<DynamicDeployment>, DiscoveryError> {
        let deployments = self.store.deployments_by_template(template_id).await?;
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.held.fetch_add(1, Ordering::SeqCst);
            self.release.acquire().await.unwrap().forget();
        }
        Ok(deployments)
    }

    async fn save_deployment(&self, deployment: DynamicDeployment) -> Result<(), DiscoveryError> {
        self.store.save_deployment(deployment).await
    }

    async fn delete_deployment(&self, id: &str) -> Result<bool, DiscoveryError> {
        self.store.delete_deployment(id).await
    }

    async fn compare_and_set_activating(
        &self,
        id: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, DiscoveryError> {
        self.store.compare_and_set_activating(id, expected, new).await
    }

    async fn update_state(
        &self,
        id: &str,
        state: DynamicDeploymentState,
        device: Option<DeviceDetails>,
    ) -> Result<(), DiscoveryError> {
        self.store.update_state(id, state, device).await
    }
}

struct Harness {
    engine: DiscoveryEngine,
    store: Arc<DocumentStore>,
    deployments: Arc<GatedDeployments>,
    deployer: Arc<FakeDeployer>,
    repository: FakeRepository,
    bus: Arc<LocalBus>,
    notifications: Option<mpsc::UnboundedReceiver<CandidateDevicesNotification>>,
}

impl Harness {
    async fn new(devices: Vec<DeviceDescription>) -> Self {
        let bus = Arc::new(LocalBus::new());
        let repository = spawn_repository(bus.clone(), devices).await;

        let store = Arc::new(DocumentStore::in_memory());
        store.save_template(template()).await.unwrap();
        store
            .save_request_topic(
                RequestTopic::new("rt1", "alice", "lab")
                    .with_timeout(200)
                    .with_expected_replies(1),
            )
            .await
            .unwrap();
        store
            .save_deployment(DynamicDeployment::new("d1", "alice", "sensor-operator", "t1"))
            .await
            .unwrap();

        let deployments = Arc::new(GatedDeployments::new(store.clone()));
        let (tx, notifications) = mpsc::unbounded_channel();
        let gateway = Arc::new(DiscoveryGateway::new(bus.clone(), tx));
        let deployer = Arc::new(FakeDeployer::default());
        let engine = DiscoveryEngine::new(
            EngineOptions::default(),
            Repositories {
                templates: store.clone(),
                request_topics: store.clone(),
                deployments: deployments.clone(),
            },
            gateway,
            DeploymentExecutor::new(deployer.clone()),
        )
        .unwrap();

        Self {
            engine,
            store,
            deployments,
            deployer,
            repository,
            bus,
            notifications: Some(notifications),
        }
    }

    async fn deployment(&self) -> DynamicDeployment {
        self.store.find_deployment("d1").await.unwrap().unwrap()
    }

    async fn deployed_mac(&self) -> Option<String> {
        self.deployment()
            .await
            .last_device_details
            .map(|d| d.mac_address)
    }

    async fn activate(&self) {
        assert!(self.engine.activate_dynamic_deployment("d1").await.unwrap());
        self.engine.wait_idle().await;
    }

    async fn change(&self, notification: CandidateDevicesNotification) {
        self.engine
            .on_candidate_devices_changed(notification)
            .await
            .unwrap();
        self.engine.wait_idle().await;
    }

    fn deploy_calls(&self) -> usize {
        self.deployer.deploy_calls.load(Ordering::SeqCst)
    }

    fn undeploy_calls(&self) -> usize {
        self.deployer.undeploy_calls.load(Ordering::SeqCst)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.repository.handle.abort();
    }
}

#[tokio::test]
async fn test_activation_deploys_on_top_ranked_device() {
    let harness = Harness::new(vec![device(SILVER, "silver"), device(GOLD, "gold")]).await;

    harness.activate().await;

    let deployment = harness.deployment().await;
    assert!(deployment.activating_intended);
    assert_eq!(deployment.last_state, DynamicDeploymentState::Deployed);
    assert_eq!(harness.deployed_mac().await.as_deref(), Some(GOLD));
    assert!(harness.deployer.is_running_on(GOLD));
    assert_eq!(harness.deploy_calls(), 1);

    let candidates = harness.engine.candidate_devices("t1").unwrap();
    assert_eq!(candidates.devices_count(), 2);
    let ranking = harness.engine.ranking("t1").await.unwrap();
    assert_eq!(ranking.mac_addresses(), vec![GOLD, SILVER]);

    let logs = harness.engine.discovery_logs("d1");
    assert!(logs.iter().all(|l| l.end.is_some()));
    assert!(logs
        .iter()
        .flat_map(|l| l.messages.iter())
        .any(|m| m.message_type == LogMessageType::Success && m.message.contains(GOLD)));
    assert!(!harness.engine.is_dynamic_deployment_in_progress("d1"));
}

#[tokio::test]
async fn test_concurrent_activation_runs_once() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;

    let (first, second) = tokio::join!(
        harness.engine.activate_dynamic_deployment("d1"),
        harness.engine.activate_dynamic_deployment("d1"),
    );
    let enabled = [first.unwrap(), second.unwrap()];
    assert_eq!(enabled.iter().filter(|e| **e).count(), 1);

    harness.engine.wait_idle().await;
    assert_eq!(harness.repository.queries.load(Ordering::SeqCst), 1);
    assert_eq!(harness.deploy_calls(), 1);
    assert_eq!(
        harness.deployment().await.last_state,
        DynamicDeploymentState::Deployed
    );
}

#[tokio::test]
async fn test_unchanged_top_device_is_kept() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;
    harness.activate().await;

    harness.change(upsert(vec![device(BRONZE, "bronze")])).await;

    assert_eq!(harness.engine.candidate_devices("t1").unwrap().devices_count(), 2);
    assert_eq!(harness.deploy_calls(), 1);
    assert_eq!(harness.undeploy_calls(), 0);
    assert_eq!(harness.deployed_mac().await.as_deref(), Some(GOLD));
    assert_eq!(
        harness.deployment().await.last_state,
        DynamicDeploymentState::Deployed
    );
}

#[tokio::test]
async fn test_better_candidate_triggers_redeployment() {
    let harness = Harness::new(vec![device(SILVER, "silver")]).await;
    harness.activate().await;
    assert_eq!(harness.deployed_mac().await.as_deref(), Some(SILVER));

    harness.change(upsert(vec![device(GOLD, "gold")])).await;

    assert_eq!(harness.deployed_mac().await.as_deref(), Some(GOLD));
    assert!(harness.deployer.is_running_on(GOLD));
    assert!(!harness.deployer.is_running_on(SILVER));
    assert_eq!(harness.deploy_calls(), 2);
    assert_eq!(harness.undeploy_calls(), 1);
    assert_eq!(
        harness.deployment().await.last_state,
        DynamicDeploymentState::Deployed
    );
}

#[tokio::test]
async fn test_all_candidates_failing() {
    let harness = Harness::new(vec![device(GOLD, "gold"), device(SILVER, "silver")]).await;
    harness.deployer.fail_on(GOLD);
    harness.deployer.fail_on(SILVER);

    harness.activate().await;

    let deployment = harness.deployment().await;
    assert_eq!(deployment.last_state, DynamicDeploymentState::AllFailed);
    assert!(deployment.last_device_details.is_none());
    assert_eq!(harness.deploy_calls(), 2);

    let undesirable = harness
        .engine
        .discovery_logs("d1")
        .iter()
        .flat_map(|l| l.messages.clone())
        .filter(|m| m.message_type == LogMessageType::Undesirable)
        .count();
    assert!(undesirable >= 2);
}

#[tokio::test]
async fn test_failed_redeployment_keeps_current_device() {
    let harness = Harness::new(vec![device(SILVER, "silver")]).await;
    harness.activate().await;
    harness.deployer.fail_on(GOLD);

    harness.change(upsert(vec![device(GOLD, "gold")])).await;

    // gold refused, silver does not score above itself
    assert_eq!(harness.deploy_calls(), 2);
    assert_eq!(harness.undeploy_calls(), 0);
    assert_eq!(harness.deployed_mac().await.as_deref(), Some(SILVER));
    assert!(harness.deployer.is_running_on(SILVER));
    assert_eq!(
        harness.deployment().await.last_state,
        DynamicDeploymentState::Deployed
    );
}

#[tokio::test]
async fn test_empty_ranking_means_no_candidate() {
    let harness = Harness::new(vec![]).await;

    harness.activate().await;

    let deployment = harness.deployment().await;
    assert_eq!(deployment.last_state, DynamicDeploymentState::NoCandidate);
    assert!(deployment.last_device_details.is_none());
    assert_eq!(harness.deploy_calls(), 0);
}

#[tokio::test]
async fn test_vanished_candidates_undeploy_operator() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;
    harness.activate().await;

    harness
        .change(CandidateDevicesNotification {
            template_id: "t1".to_string(),
            repository_name: "repo-a".to_string(),
            revision: CandidateDevicesRevision {
                reference_ids: vec!["t1".to_string()],
                operations: vec![RevisionOperation::Delete {
                    mac_addresses: vec![GOLD.to_string()],
                }],
            },
        })
        .await;

    let deployment = harness.deployment().await;
    assert_eq!(deployment.last_state, DynamicDeploymentState::NoCandidate);
    assert!(deployment.last_device_details.is_none());
    assert!(!harness.deployer.is_running_on(GOLD));
}

#[tokio::test]
async fn test_deactivation_undeploys() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;
    harness.activate().await;

    assert!(harness.engine.deactivate_dynamic_deployment("d1").await.unwrap());
    harness.engine.wait_idle().await;

    let deployment = harness.deployment().await;
    assert!(!deployment.activating_intended);
    assert_eq!(deployment.last_state, DynamicDeploymentState::Disabled);
    assert!(deployment.last_device_details.is_none());
    assert!(!harness.deployer.is_running_on(GOLD));
    assert_eq!(harness.undeploy_calls(), 1);

    assert!(!harness.engine.deactivate_dynamic_deployment("d1").await.unwrap());
}

#[tokio::test]
async fn test_delete_requires_disabled_deployment() {
    let mut harness = Harness::new(vec![device(GOLD, "gold")]).await;
    harness.activate().await;

    let result = harness.engine.delete_dynamic_deployment("d1").await;
    assert!(matches!(result, Err(DiscoveryError::InvalidState(_))));

    harness.engine.deactivate_dynamic_deployment("d1").await.unwrap();
    harness.engine.wait_idle().await;
    harness.engine.delete_dynamic_deployment("d1").await.unwrap();
    harness.engine.wait_idle().await;

    assert!(harness.store.find_deployment("d1").await.unwrap().is_none());
    assert!(harness.engine.candidate_devices("t1").is_none());
    assert!(harness.engine.discovery_logs("d1").is_empty());

    let cancelled = tokio::time::timeout(Duration::from_secs(1), harness.repository.cancelled.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled, vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let harness = Harness::new(vec![]).await;

    let result = harness.engine.activate_dynamic_deployment("d9").await;
    assert!(matches!(result, Err(DiscoveryError::NotFound(_))));
    let result = harness.engine.deactivate_dynamic_deployment("d9").await;
    assert!(matches!(result, Err(DiscoveryError::NotFound(_))));
    let result = harness.engine.refresh_candidate_devices("t9").await;
    assert!(matches!(result, Err(DiscoveryError::NotFound(_))));
}

#[tokio::test]
async fn test_initialize_resumes_enabled_deployments() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;
    let mut deployment = DynamicDeployment::new("d2", "alice", "sensor-operator", "t1");
    deployment.activating_intended = true;
    harness.store.save_deployment(deployment).await.unwrap();

    harness.engine.initialize().await.unwrap();
    harness.engine.wait_idle().await;

    let resumed = harness.store.find_deployment("d2").await.unwrap().unwrap();
    assert_eq!(resumed.last_state, DynamicDeploymentState::Deployed);
    assert_eq!(
        resumed.last_device_details.map(|d| d.mac_address).as_deref(),
        Some(GOLD)
    );
    // d1 stays disabled
    assert_eq!(
        harness.deployment().await.last_state,
        DynamicDeploymentState::Disabled
    );
    assert!(harness.engine.candidate_devices("t1").is_some());
}

#[tokio::test]
async fn test_refresh_queries_repositories_again() {
    let harness = Harness::new(vec![device(SILVER, "silver")]).await;
    harness.activate().await;

    harness
        .repository
        .devices
        .lock()
        .unwrap()
        .push(device(GOLD, "gold"));
    harness.engine.refresh_candidate_devices("t1").await.unwrap();
    harness.engine.wait_idle().await;

    assert_eq!(harness.repository.queries.load(Ordering::SeqCst), 2);
    assert_eq!(harness.deployed_mac().await.as_deref(), Some(GOLD));
}

#[tokio::test]
async fn test_refresh_does_not_displace_deactivation() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;
    harness.activate().await;

    // keep the template queue busy until the repository query times out
    harness.repository.silent.store(true, Ordering::SeqCst);
    harness.deployments.hold_next_lookup();
    let engine = harness.engine.clone();
    let refresh = tokio::spawn(async move { engine.refresh_candidate_devices("t1").await });
    harness.deployments.wait_held().await;

    assert!(harness.engine.deactivate_dynamic_deployment("d1").await.unwrap());
    let snapshot = harness.engine.queue_snapshot();
    assert_eq!(
        snapshot.template_queues["t1"][0].kind,
        TaskKind::UpdateCandidateDevices
    );
    let waiting = &snapshot.deployment_queues["d1"];
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].kind, TaskKind::Undeploy);
    assert!(!waiting[0].started);

    // the refresh read d1 while it was enabled; its re-evaluation is dropped
    harness.deployments.release();
    refresh.await.unwrap().unwrap();
    let snapshot = harness.engine.queue_snapshot();
    let kinds: Vec<TaskKind> = snapshot.deployment_queues["d1"]
        .iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(kinds, vec![TaskKind::Undeploy]);

    harness.engine.wait_idle().await;
    let deployment = harness.deployment().await;
    assert!(!deployment.activating_intended);
    assert_eq!(deployment.last_state, DynamicDeploymentState::Disabled);
    assert!(deployment.last_device_details.is_none());
    assert!(!harness.deployer.is_running_on(GOLD));
}

#[tokio::test]
async fn test_reevaluation_of_disabled_deployment_undeploys() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;
    harness.activate().await;

    harness.deployments.hold_next_lookup();
    let engine = harness.engine.clone();
    let refresh = tokio::spawn(async move { engine.refresh_candidate_devices("t1").await });
    harness.deployments.wait_held().await;

    // disabled behind the engine's back, no undeploy task queued
    assert!(harness
        .store
        .compare_and_set_activating("d1", true, false)
        .await
        .unwrap());
    harness.deployments.release();
    refresh.await.unwrap().unwrap();
    harness.engine.wait_idle().await;

    let deployment = harness.deployment().await;
    assert_eq!(deployment.last_state, DynamicDeploymentState::Disabled);
    assert!(deployment.last_device_details.is_none());
    assert!(!harness.deployer.is_running_on(GOLD));
    assert_eq!(harness.undeploy_calls(), 1);
}

#[tokio::test]
async fn test_repository_notification_reaches_deployment() {
    let mut harness = Harness::new(vec![device(SILVER, "silver")]).await;
    let notifications = harness.notifications.take().unwrap();
    let shutdown: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(std::future::pending());
    let worker = tokio::spawn(dispatcher::run(harness.engine.clone(), notifications, shutdown));

    harness.activate().await;
    let topic = harness
        .repository
        .notification_topic
        .lock()
        .unwrap()
        .clone()
        .unwrap();

    let change = ReplyMessage::new(
        CandidateDevicesReply {
            revisions: vec![upsert(vec![device(GOLD, "gold")]).revision],
        },
        "repo-a",
        None,
    );
    harness
        .bus
        .publish(&topic, serde_json::to_vec(&change).unwrap())
        .await
        .unwrap();

    let mut deployed = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        deployed = harness.deployed_mac().await;
        if deployed.as_deref() == Some(GOLD) {
            break;
        }
    }
    assert_eq!(deployed.as_deref(), Some(GOLD));

    worker.abort();
}

#[tokio::test]
async fn test_delete_request_topic() {
    let harness = Harness::new(vec![device(GOLD, "gold")]).await;
    harness.activate().await;

    harness.engine.delete_request_topic("rt1").await.unwrap();
    assert!(harness.store.find_request_topic("rt1").await.unwrap().is_none());

    let result = harness.engine.delete_request_topic("rt1").await;
    assert!(matches!(result, Err(DiscoveryError::NotFound(_))));
}

#[tokio::test]
async fn test_zero_workers_rejected() {
    let store = Arc::new(DocumentStore::in_memory());
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = DiscoveryEngine::new(
        EngineOptions {
            worker_pool_size: 0,
            ..Default::default()
        },
        Repositories {
            templates: store.clone(),
            request_topics: store.clone(),
            deployments: store,
        },
        Arc::new(DiscoveryGateway::new(Arc::new(LocalBus::new()), tx)),
        DeploymentExecutor::new(Arc::new(FakeDeployer::default())),
    );
    assert!(matches!(result, Err(DiscoveryError::InvalidArgument(_))));
}

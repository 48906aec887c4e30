//! Discovery engine: serializes discovery work per device template and per
//! dynamic deployment and drives the deployment lifecycle

pub mod lifecycle;
pub mod log;
pub mod scheduler;
pub mod tasks;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::deploy::executor::{DeploymentExecutor, DeploymentResult};
use crate::discovery::gateway::{CandidateDevicesNotification, DiscoveryGateway};
use crate::discovery::processor::CandidateDevicesProcessor;
use crate::errors::DiscoveryError;
use crate::models::candidates::{CandidateDevicesRanking, CandidateDevicesResultContainer};
use crate::models::deployment::{DeviceDetails, DynamicDeployment, DynamicDeploymentState};
use crate::models::template::DeviceTemplate;
use crate::storage::repository::{
    DeviceTemplateRepository, DynamicDeploymentRepository, RequestTopicRepository,
};

use self::lifecycle::{DeploymentFsm, LifecycleEvent};
use self::log::{DiscoveryLog, DiscoveryLogBook, LogTrigger};
use self::scheduler::{QueueSnapshot, Submission, TaskId, TaskScheduler};
use self::tasks::{DiscoveryTask, TaskKind};

/// Engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Tasks executed concurrently
    pub worker_pool_size: usize,

    /// Discovery logs kept per dynamic deployment
    pub discovery_log_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            worker_pool_size: 5,
            discovery_log_capacity: 50,
        }
    }
}

/// Storage collaborators of the engine
#[derive(Clone)]
pub struct Repositories {
    pub templates: Arc<dyn DeviceTemplateRepository>,
    pub request_topics: Arc<dyn RequestTopicRepository>,
    pub deployments: Arc<dyn DynamicDeploymentRepository>,
}

/// Handle to the discovery engine; clones share the engine
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    repositories: Repositories,
    gateway: Arc<DiscoveryGateway>,
    executor: DeploymentExecutor,
    processor: CandidateDevicesProcessor,
    scheduler: Mutex<TaskScheduler>,
    /// template id -> merged candidates; written by template tasks only
    candidates: Mutex<HashMap<String, CandidateDevicesResultContainer>>,
    logs: Mutex<DiscoveryLogBook>,
    permits: Arc<Semaphore>,
    idle: Notify,
}

impl DiscoveryEngine {
    pub fn new(
        options: EngineOptions,
        repositories: Repositories,
        gateway: Arc<DiscoveryGateway>,
        executor: DeploymentExecutor,
    ) -> Result<Self, DiscoveryError> {
        if options.worker_pool_size == 0 {
            return Err(DiscoveryError::invalid_argument(
                "the worker pool needs at least one worker",
            ));
        }
        Ok(Self {
            inner: Arc::new(EngineInner {
                repositories,
                gateway,
                executor,
                processor: CandidateDevicesProcessor::new(),
                scheduler: Mutex::new(TaskScheduler::new()),
                candidates: Mutex::new(HashMap::new()),
                logs: Mutex::new(DiscoveryLogBook::new(options.discovery_log_capacity)),
                permits: Arc::new(Semaphore::new(options.worker_pool_size)),
                idle: Notify::new(),
            }),
        })
    }

    /// Resumes all templates and deployments after a restart
    pub async fn initialize(&self) -> Result<(), DiscoveryError> {
        let repositories = &self.inner.repositories;
        let deployments = repositories.deployments.all_deployments().await?;
        let templates = repositories.templates.all_templates().await?;
        info!(
            "Initializing discovery engine with {} templates and {} dynamic deployments",
            templates.len(),
            deployments.len()
        );

        for template in templates {
            let active = deployments
                .iter()
                .any(|d| d.device_template == template.id && d.activating_intended);
            let task = if active {
                DiscoveryTask::UpdateCandidateDevices {
                    template,
                    force: true,
                    trigger: LogTrigger::System,
                }
            } else {
                DiscoveryTask::DeleteCandidateDevices {
                    template,
                    force: true,
                    trigger: LogTrigger::System,
                }
            };
            self.inner.submit(task);
        }

        for deployment in deployments {
            let task = if deployment.activating_intended {
                DiscoveryTask::DeployByRanking {
                    deployment_id: deployment.id,
                    template_id: deployment.device_template,
                    trigger: LogTrigger::System,
                }
            } else {
                DiscoveryTask::Undeploy {
                    deployment_id: deployment.id,
                    template_id: deployment.device_template,
                    trigger: LogTrigger::System,
                }
            };
            self.inner.submit(task);
        }
        Ok(())
    }

    /// Enables a deployment; `Ok(false)` when it already was enabled
    pub async fn activate_dynamic_deployment(&self, id: &str) -> Result<bool, DiscoveryError> {
        let repositories = &self.inner.repositories;
        let deployment = repositories
            .deployments
            .find_deployment(id)
            .await?
            .ok_or_else(|| DiscoveryError::not_found("dynamic deployment", id))?;
        let template = repositories
            .templates
            .find_template(&deployment.device_template)
            .await?
            .ok_or_else(|| DiscoveryError::not_found("device template", &deployment.device_template))?;

        if !repositories
            .deployments
            .compare_and_set_activating(id, false, true)
            .await?
        {
            debug!("Dynamic deployment {} is already enabled", id);
            return Ok(false);
        }
        info!("Enabling dynamic deployment {}", deployment.display_name());

        let template_id = template.id.clone();
        self.inner.submit(DiscoveryTask::UpdateCandidateDevices {
            template,
            force: false,
            trigger: LogTrigger::User,
        });
        self.inner.submit(DiscoveryTask::DeployByRanking {
            deployment_id: id.to_string(),
            template_id,
            trigger: LogTrigger::User,
        });
        Ok(true)
    }

    /// Disables a deployment; `Ok(false)` when it already was disabled
    pub async fn deactivate_dynamic_deployment(&self, id: &str) -> Result<bool, DiscoveryError> {
        let deployments = &self.inner.repositories.deployments;
        let deployment = deployments
            .find_deployment(id)
            .await?
            .ok_or_else(|| DiscoveryError::not_found("dynamic deployment", id))?;

        if !deployments.compare_and_set_activating(id, true, false).await? {
            debug!("Dynamic deployment {} is already disabled", id);
            return Ok(false);
        }
        info!("Disabling dynamic deployment {}", deployment.display_name());

        self.inner.submit(DiscoveryTask::Undeploy {
            deployment_id: id.to_string(),
            template_id: deployment.device_template,
            trigger: LogTrigger::User,
        });
        Ok(true)
    }

    /// Removes a disabled deployment without pending tasks
    pub async fn delete_dynamic_deployment(&self, id: &str) -> Result<(), DiscoveryError> {
        if self.is_dynamic_deployment_in_progress(id) {
            return Err(DiscoveryError::InvalidState(format!(
                "dynamic deployment '{}' has tasks in progress",
                id
            )));
        }
        let repositories = &self.inner.repositories;
        let deployment = repositories
            .deployments
            .find_deployment(id)
            .await?
            .ok_or_else(|| DiscoveryError::not_found("dynamic deployment", id))?;
        if deployment.activating_intended {
            return Err(DiscoveryError::InvalidState(format!(
                "dynamic deployment '{}' must be disabled first",
                id
            )));
        }

        repositories.deployments.delete_deployment(id).await?;
        self.inner.lock_logs().remove(id);
        info!("Deleted dynamic deployment {}", deployment.display_name());

        if !self.inner.template_in_use(&deployment.device_template).await? {
            if let Some(template) = repositories
                .templates
                .find_template(&deployment.device_template)
                .await?
            {
                self.inner.submit(DiscoveryTask::DeleteCandidateDevices {
                    template,
                    force: false,
                    trigger: LogTrigger::User,
                });
            }
        }
        Ok(())
    }

    /// Cancels the subscriptions made through a request topic and removes it
    pub async fn delete_request_topic(&self, id: &str) -> Result<(), DiscoveryError> {
        let repositories = &self.inner.repositories;
        let topic = repositories
            .request_topics
            .find_request_topic(id)
            .await?
            .ok_or_else(|| DiscoveryError::not_found("request topic", id))?;
        let templates = repositories.templates.templates_by_owner(&topic.owner).await?;

        let updating = {
            let scheduler = self.inner.lock_scheduler();
            templates
                .iter()
                .any(|t| scheduler.has_template_task(&t.id, TaskKind::UpdateCandidateDevices))
        };
        if updating {
            return Err(DiscoveryError::InvalidState(format!(
                "candidate devices of {} are being updated",
                topic.owner
            )));
        }

        self.inner
            .gateway
            .cancel_subscriptions_for_request_topic(&templates, &topic)
            .await?;
        repositories.request_topics.delete_request_topic(id).await?;
        info!("Deleted request topic {}", topic.full_topic());
        Ok(())
    }

    /// Queries the repositories again and re-evaluates the template's deployments.
    ///
    /// The re-evaluations are system tasks, so a waiting user task of a
    /// deployment is never displaced by a refresh.
    pub async fn refresh_candidate_devices(&self, template_id: &str) -> Result<(), DiscoveryError> {
        let repositories = &self.inner.repositories;
        let template = repositories
            .templates
            .find_template(template_id)
            .await?
            .ok_or_else(|| DiscoveryError::not_found("device template", template_id))?;

        self.inner.submit(DiscoveryTask::UpdateCandidateDevices {
            template,
            force: true,
            trigger: LogTrigger::User,
        });
        self.inner
            .submit_deploy_for_template(template_id, LogTrigger::System)
            .await
    }

    /// Applies a repository's change and re-evaluates the template's deployments
    pub async fn on_candidate_devices_changed(
        &self,
        notification: CandidateDevicesNotification,
    ) -> Result<(), DiscoveryError> {
        let template_id = notification.template_id.clone();
        self.inner.submit(DiscoveryTask::ReviseCandidateDevices {
            template_id: notification.template_id,
            repository_name: notification.repository_name,
            revision: notification.revision,
        });
        self.inner
            .submit_deploy_for_template(&template_id, LogTrigger::DiscoveryRepository)
            .await
    }

    /// Whether tasks of the deployment are queued or running
    pub fn is_dynamic_deployment_in_progress(&self, id: &str) -> bool {
        self.inner.lock_scheduler().has_deployment_tasks(id)
    }

    pub fn candidate_devices(&self, template_id: &str) -> Option<CandidateDevicesResultContainer> {
        self.inner.lock_candidates().get(template_id).cloned()
    }

    /// Ranking of the stored candidates of a template
    pub async fn ranking(&self, template_id: &str) -> Result<CandidateDevicesRanking, DiscoveryError> {
        let template = self
            .inner
            .repositories
            .templates
            .find_template(template_id)
            .await?
            .ok_or_else(|| DiscoveryError::not_found("device template", template_id))?;
        Ok(self.inner.ranking_for(&template))
    }

    /// Logs of a deployment, oldest first
    pub fn discovery_logs(&self, deployment_id: &str) -> Vec<DiscoveryLog> {
        self.inner.lock_logs().logs(deployment_id)
    }

    /// Queued and running tasks of every template and deployment
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.inner.lock_scheduler().snapshot()
    }

    /// Resolves once no task is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.lock_scheduler().is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl EngineInner {
    fn lock_scheduler(&self) -> MutexGuard<'_, TaskScheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_candidates(&self) -> MutexGuard<'_, HashMap<String, CandidateDevicesResultContainer>> {
        self.candidates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_logs(&self) -> MutexGuard<'_, DiscoveryLogBook> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(self: &Arc<Self>, task: DiscoveryTask) {
        let kind = task.kind();
        let key = task
            .deployment_id()
            .unwrap_or_else(|| task.template_id())
            .to_string();
        match self.lock_scheduler().submit(task) {
            Submission::Queued(id) => info!("Submitted {:?} #{} for {}", kind, id, key),
            Submission::Replaced { id, replaced } => {
                info!("Submitted {:?} #{} for {}, replacing #{}", kind, id, key, replaced)
            }
            Submission::Dropped => debug!("Skipped {:?} for {}", kind, key),
        }
        self.schedule();
    }

    async fn submit_deploy_for_template(
        self: &Arc<Self>,
        template_id: &str,
        trigger: LogTrigger,
    ) -> Result<(), DiscoveryError> {
        let deployments = self
            .repositories
            .deployments
            .deployments_by_template(template_id)
            .await?;
        for deployment in deployments.into_iter().filter(|d| d.activating_intended) {
            self.submit(DiscoveryTask::DeployByRanking {
                deployment_id: deployment.id,
                template_id: template_id.to_string(),
                trigger,
            });
        }
        Ok(())
    }

    /// Starts every runnable queue head
    fn schedule(self: &Arc<Self>) {
        let runnable = self.lock_scheduler().start_runnable();
        for (id, task) in runnable {
            let inner = self.clone();
            tokio::spawn(async move { inner.run(id, task).await });
        }
    }

    async fn run(self: Arc<Self>, id: TaskId, task: DiscoveryTask) {
        let permit = self.permits.clone().acquire_owned().await;
        debug!("Running {:?} #{} ({})", task.kind(), id, task.description());

        let worker = {
            let inner = self.clone();
            let task = task.clone();
            tokio::spawn(async move {
                let mut log = DiscoveryLog::new(task.trigger(), task.description());
                let result = inner.execute(&task, &mut log).await;
                (result, log)
            })
        };

        let mut log = match worker.await {
            Ok((Ok(()), log)) => log,
            Ok((Err(e), mut log)) => {
                warn!("{:?} #{} failed: {}", task.kind(), id, e);
                log.undesirable(format!("Task failed: {}", e));
                self.recover(&task, &mut log).await;
                log
            }
            Err(e) => {
                error!("{:?} #{} aborted: {}", task.kind(), id, e);
                let mut log = DiscoveryLog::new(task.trigger(), task.description());
                log.undesirable("Task aborted unexpectedly");
                self.recover(&task, &mut log).await;
                log
            }
        };
        drop(permit);

        log.finish();
        self.store_log(&task, log).await;

        self.lock_scheduler().complete(id);
        debug!("Finished {:?} #{}", task.kind(), id);
        self.schedule();

        if self.lock_scheduler().is_idle() {
            self.idle.notify_waiters();
        }
    }

    async fn execute(&self, task: &DiscoveryTask, log: &mut DiscoveryLog) -> Result<(), DiscoveryError> {
        match task {
            DiscoveryTask::UpdateCandidateDevices { template, force, .. } => {
                self.update_candidate_devices(template, *force, log).await
            }
            DiscoveryTask::ReviseCandidateDevices {
                template_id,
                repository_name,
                revision,
            } => {
                let mut candidates = self.lock_candidates();
                match candidates.get_mut(template_id) {
                    Some(container) => {
                        container.apply_revision(repository_name, revision);
                        log.info(format!("{} revised: {}", repository_name, revision.summary()));
                    }
                    None => log.info("No candidate devices stored, revision ignored"),
                }
                Ok(())
            }
            DiscoveryTask::DeleteCandidateDevices { template, force, .. } => {
                self.delete_candidate_devices(template, *force, log).await
            }
            DiscoveryTask::DeployByRanking { deployment_id, .. } => {
                self.deploy_by_ranking(deployment_id, log).await
            }
            DiscoveryTask::Undeploy { deployment_id, .. } => self.undeploy(deployment_id, log).await,
        }
    }

    async fn template_in_use(&self, template_id: &str) -> Result<bool, DiscoveryError> {
        Ok(self
            .repositories
            .deployments
            .deployments_by_template(template_id)
            .await?
            .iter()
            .any(|d| d.activating_intended))
    }

    fn ranking_for(&self, template: &DeviceTemplate) -> CandidateDevicesRanking {
        match self.lock_candidates().get(&template.id) {
            Some(container) => self.processor.process(container, template),
            None => CandidateDevicesRanking::empty(),
        }
    }

    async fn update_candidate_devices(
        &self,
        template: &DeviceTemplate,
        force: bool,
        log: &mut DiscoveryLog,
    ) -> Result<(), DiscoveryError> {
        if !force {
            if !self.template_in_use(&template.id).await? {
                log.info("No enabled deployment needs candidate devices");
                return Ok(());
            }
            if self.lock_candidates().contains_key(&template.id) {
                debug!("Candidate devices of {} are present", template.id);
                return Ok(());
            }
        }

        let topics = self
            .repositories
            .request_topics
            .request_topics_by_owner(&template.owner)
            .await?;
        let container = if topics.is_empty() {
            log.undesirable(format!("No request topics configured for {}", template.owner));
            CandidateDevicesResultContainer::new(&template.id)
        } else {
            let container = self
                .gateway
                .get_candidate_devices_with_subscription(template, &topics)
                .await?;
            log.info(format!(
                "Received {} candidate devices from {} repositories",
                container.devices_count(),
                container.collections_count()
            ));
            container
        };

        self.lock_candidates().insert(template.id.clone(), container);
        Ok(())
    }

    async fn delete_candidate_devices(
        &self,
        template: &DeviceTemplate,
        force: bool,
        log: &mut DiscoveryLog,
    ) -> Result<(), DiscoveryError> {
        if !force && self.template_in_use(&template.id).await? {
            debug!("Template {} is still in use", template.id);
            return Ok(());
        }

        let had_candidates = self.lock_candidates().remove(&template.id).is_some();
        let topics = self
            .repositories
            .request_topics
            .request_topics_by_owner(&template.owner)
            .await?;
        self.gateway.cancel_subscription(template, &topics).await?;
        if had_candidates {
            log.info("Dropped candidate devices");
        }
        Ok(())
    }

    async fn deploy_by_ranking(
        &self,
        deployment_id: &str,
        log: &mut DiscoveryLog,
    ) -> Result<(), DiscoveryError> {
        let repositories = &self.repositories;
        let Some(mut deployment) = repositories.deployments.find_deployment(deployment_id).await?
        else {
            debug!("Dynamic deployment {} no longer exists", deployment_id);
            return Ok(());
        };
        if !deployment.activating_intended {
            debug!("Dynamic deployment {} is disabled", deployment_id);
            return self.undeploy(deployment_id, log).await;
        }

        let ranking = match repositories
            .templates
            .find_template(&deployment.device_template)
            .await?
        {
            Some(template) => self.ranking_for(&template),
            None => {
                log.undesirable(format!(
                    "Device template {} not found",
                    deployment.device_template
                ));
                CandidateDevicesRanking::empty()
            }
        };

        let is_deployed = self.executor.is_deployed(&deployment).await;
        if !is_deployed {
            if let Some(previous) = deployment.last_device_details.take() {
                log.info(format!("Operator no longer runs on {}", previous.mac_address));
            }
        }
        if deployment.last_state == DynamicDeploymentState::Disabled {
            let device = deployment.last_device_details.clone();
            self.set_state(&mut deployment, LifecycleEvent::Activate, device).await?;
        }

        if ranking.is_empty() {
            if is_deployed {
                if let Err(e) = self.executor.undeploy(&deployment).await {
                    log.undesirable(format!("Undeploying failed: {}", e));
                }
            }
            log.undesirable("No candidate device fulfils the template");
            return self
                .set_state(&mut deployment, LifecycleEvent::RankingEmpty, None)
                .await;
        }

        let current_score = deployment
            .last_device_details
            .as_ref()
            .and_then(|d| ranking.score_of(&d.mac_address));
        if let (Some(current), Some(top)) = (current_score, ranking.top_score()) {
            if current >= top {
                debug!("Deployment {} keeps its top ranked device", deployment_id);
                let device = deployment.last_device_details.clone();
                return self
                    .set_state(&mut deployment, LifecycleEvent::Retained, device)
                    .await;
            }
        }

        let device = deployment.last_device_details.clone();
        self.set_state(&mut deployment, LifecycleEvent::Reevaluate, device)
            .await?;

        let min_score_exclusive = current_score.unwrap_or(-1.0);
        let outcome = self
            .executor
            .deploy_by_ranking(&deployment, &ranking, min_score_exclusive)
            .await;
        for attempt in &outcome.attempts {
            match &attempt.error {
                None => log.success(format!(
                    "Deployed on {} (score {:.3})",
                    attempt.mac_address, attempt.score
                )),
                Some(e) => log.undesirable(format!(
                    "Deployment on {} failed: {}",
                    attempt.mac_address, e
                )),
            }
        }

        match outcome.result {
            DeploymentResult::Deployed => {
                self.set_state(&mut deployment, LifecycleEvent::Deployed, outcome.device)
                    .await
            }
            DeploymentResult::AllFailed if is_deployed => {
                log.info("Operator keeps running on the current device");
                let device = deployment.last_device_details.clone();
                self.set_state(&mut deployment, LifecycleEvent::Retained, device)
                    .await
            }
            DeploymentResult::AllFailed => {
                log.undesirable("Deployment failed on every candidate device");
                self.set_state(&mut deployment, LifecycleEvent::AllFailed, None)
                    .await
            }
            DeploymentResult::EmptyRanking => {
                self.set_state(&mut deployment, LifecycleEvent::RankingEmpty, None)
                    .await
            }
        }
    }

    async fn undeploy(&self, deployment_id: &str, log: &mut DiscoveryLog) -> Result<(), DiscoveryError> {
        let Some(mut deployment) = self
            .repositories
            .deployments
            .find_deployment(deployment_id)
            .await?
        else {
            return Ok(());
        };
        if deployment.activating_intended {
            debug!("Dynamic deployment {} was enabled again", deployment_id);
            return Ok(());
        }
        if deployment.last_state == DynamicDeploymentState::Disabled
            && deployment.last_device_details.is_none()
        {
            return Ok(());
        }

        if deployment.last_state != DynamicDeploymentState::Disabled {
            let device = deployment.last_device_details.clone();
            self.set_state(&mut deployment, LifecycleEvent::Deactivate, device)
                .await?;
        }

        if self.executor.is_deployed(&deployment).await {
            match self.executor.undeploy(&deployment).await {
                Ok(()) => log.success(format!(
                    "Undeployed from {}",
                    deployment
                        .last_device_details
                        .as_ref()
                        .map(|d| d.mac_address.as_str())
                        .unwrap_or_default()
                )),
                Err(e) => log.undesirable(format!("Undeploying failed: {}", e)),
            }
        }

        if deployment.last_state == DynamicDeploymentState::InProgress {
            self.set_state(&mut deployment, LifecycleEvent::Undeployed, None)
                .await
        } else {
            self.repositories
                .deployments
                .update_state(deployment_id, DynamicDeploymentState::Disabled, None)
                .await
        }
    }

    /// Moves a deployment out of IN_PROGRESS after its task failed
    async fn recover(&self, task: &DiscoveryTask, log: &mut DiscoveryLog) {
        let Some(deployment_id) = task.deployment_id() else {
            return;
        };
        let deployment = match self.repositories.deployments.find_deployment(deployment_id).await {
            Ok(Some(deployment)) => deployment,
            Ok(None) => return,
            Err(e) => {
                warn!("Cannot recover deployment {}: {}", deployment_id, e);
                return;
            }
        };
        if deployment.last_state != DynamicDeploymentState::InProgress {
            return;
        }

        let mut deployment = deployment;
        let result = match task.kind() {
            TaskKind::Undeploy => {
                self.set_state(&mut deployment, LifecycleEvent::Undeployed, None)
                    .await
            }
            _ if deployment.last_device_details.is_some() => {
                let device = deployment.last_device_details.clone();
                self.set_state(&mut deployment, LifecycleEvent::Retained, device)
                    .await
            }
            _ => {
                log.undesirable("Deployment could not be completed");
                self.set_state(&mut deployment, LifecycleEvent::AllFailed, None)
                    .await
            }
        };
        if let Err(e) = result {
            warn!("Cannot recover deployment {}: {}", deployment_id, e);
        }
    }

    /// Applies a lifecycle event, persisting the state when it changes
    async fn set_state(
        &self,
        deployment: &mut DynamicDeployment,
        event: LifecycleEvent,
        device: Option<DeviceDetails>,
    ) -> Result<(), DiscoveryError> {
        let next = match DeploymentFsm::transition(deployment.last_state, event) {
            Ok(next) => next,
            Err(e) => {
                warn!("Deployment {}: {}", deployment.id, e);
                return Ok(());
            }
        };
        if next == deployment.last_state && device == deployment.last_device_details {
            return Ok(());
        }

        self.repositories
            .deployments
            .update_state(&deployment.id, next, device.clone())
            .await?;
        info!(
            "Deployment {}: {} -> {}",
            deployment.display_name(),
            deployment.last_state,
            next
        );
        deployment.last_state = next;
        deployment.last_device_details = device;
        Ok(())
    }

    /// Files the log under the task's deployment or every deployment of its template
    async fn store_log(&self, task: &DiscoveryTask, log: DiscoveryLog) {
        if log.is_empty() {
            return;
        }
        let deployment_ids = match task.deployment_id() {
            Some(id) => vec![id.to_string()],
            None => match self
                .repositories
                .deployments
                .deployments_by_template(task.template_id())
                .await
            {
                Ok(deployments) => deployments.into_iter().map(|d| d.id).collect(),
                Err(e) => {
                    warn!("Cannot store discovery log: {}", e);
                    return;
                }
            },
        };

        let mut logs = self.lock_logs();
        for id in deployment_ids {
            logs.record(&id, log.clone());
        }
    }
}

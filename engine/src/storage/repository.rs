//! Repositories of templates, request topics and dynamic deployments

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::DiscoveryError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{DeviceDetails, DynamicDeployment, DynamicDeploymentState};
use crate::models::template::DeviceTemplate;
use crate::models::topic::RequestTopic;

const TEMPLATES_FILE: &str = "templates.json";
const REQUEST_TOPICS_FILE: &str = "request_topics.json";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[async_trait]
pub trait DeviceTemplateRepository: Send + Sync {
    async fn find_template(&self, id: &str) -> Result<Option<DeviceTemplate>, DiscoveryError>;

    async fn templates_by_owner(&self, owner: &str)
        -> Result<Vec<DeviceTemplate>, DiscoveryError>;

    async fn all_templates(&self) -> Result<Vec<DeviceTemplate>, DiscoveryError>;

    async fn save_template(&self, template: DeviceTemplate) -> Result<(), DiscoveryError>;
}

#[async_trait]
pub trait RequestTopicRepository: Send + Sync {
    async fn find_request_topic(&self, id: &str) -> Result<Option<RequestTopic>, DiscoveryError>;

    async fn request_topics_by_owner(&self, owner: &str)
        -> Result<Vec<RequestTopic>, DiscoveryError>;

    async fn save_request_topic(&self, topic: RequestTopic) -> Result<(), DiscoveryError>;

    /// Returns whether the topic existed
    async fn delete_request_topic(&self, id: &str) -> Result<bool, DiscoveryError>;
}

#[async_trait]
pub trait DynamicDeploymentRepository: Send + Sync {
    async fn find_deployment(&self, id: &str) -> Result<Option<DynamicDeployment>, DiscoveryError>;

    async fn all_deployments(&self) -> Result<Vec<DynamicDeployment>, DiscoveryError>;

    async fn deployments_by_template(
        &self,
        template_id: &str,
    ) -> Result<Vec<DynamicDeployment>, DiscoveryError>;

    async fn save_deployment(&self, deployment: DynamicDeployment) -> Result<(), DiscoveryError>;

    /// Returns whether the deployment existed
    async fn delete_deployment(&self, id: &str) -> Result<bool, DiscoveryError>;

    /// Sets `activating_intended` to `new` when it currently equals `expected`.
    ///
    /// Returns false when the flag did not match, leaving the deployment untouched.
    async fn compare_and_set_activating(
        &self,
        id: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, DiscoveryError>;

    async fn update_state(
        &self,
        id: &str,
        state: DynamicDeploymentState,
        device: Option<DeviceDetails>,
    ) -> Result<(), DiscoveryError>;
}

/// JSON document store implementing all repositories.
///
/// Each collection lives in memory and, when a directory is attached, is
/// rewritten to its file after every change.
pub struct DocumentStore {
    dir: Option<Dir>,
    templates: Mutex<BTreeMap<String, DeviceTemplate>>,
    topics: Mutex<BTreeMap<String, RequestTopic>>,
    deployments: Mutex<BTreeMap<String, DynamicDeployment>>,
}

impl DocumentStore {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            templates: Mutex::new(BTreeMap::new()),
            topics: Mutex::new(BTreeMap::new()),
            deployments: Mutex::new(BTreeMap::new()),
        }
    }

    /// Loads the collections from `dir`; missing files are empty collections.
    ///
    /// With `persist` unset, changes stay in memory.
    pub async fn open(dir: Dir, persist: bool) -> Result<Self, DiscoveryError> {
        let templates: Vec<DeviceTemplate> = dir.file(TEMPLATES_FILE).read_json_or_default().await?;
        for template in &templates {
            template.validate()?;
        }
        let topics: Vec<RequestTopic> = dir.file(REQUEST_TOPICS_FILE).read_json_or_default().await?;
        for topic in &topics {
            topic.validate()?;
        }
        let deployments: Vec<DynamicDeployment> =
            dir.file(DEPLOYMENTS_FILE).read_json_or_default().await?;

        info!(
            "Loaded {} templates, {} request topics and {} dynamic deployments from {}",
            templates.len(),
            topics.len(),
            deployments.len(),
            dir.path().display()
        );

        Ok(Self {
            dir: persist.then_some(dir),
            templates: Mutex::new(templates.into_iter().map(|t| (t.id.clone(), t)).collect()),
            topics: Mutex::new(topics.into_iter().map(|t| (t.id.clone(), t)).collect()),
            deployments: Mutex::new(deployments.into_iter().map(|d| (d.id.clone(), d)).collect()),
        })
    }

    /// Applies `change` to a copy of `documents`; the copy replaces the
    /// collection only once it is written
    async fn commit<T: Serialize + Clone>(
        &self,
        file_name: &str,
        documents: &mut BTreeMap<String, T>,
        change: impl FnOnce(&mut BTreeMap<String, T>),
    ) -> Result<(), DiscoveryError> {
        let Some(dir) = &self.dir else {
            change(documents);
            return Ok(());
        };
        let mut next = documents.clone();
        change(&mut next);
        let values: Vec<&T> = next.values().collect();
        dir.file(file_name).write_json(&values).await?;
        debug!("Persisted {} documents to {}", values.len(), file_name);
        *documents = next;
        Ok(())
    }
}

fn filtered<T: Clone>(
    documents: &BTreeMap<String, T>,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    documents.values().filter(|d| keep(d)).cloned().collect()
}

#[async_trait]
impl DeviceTemplateRepository for DocumentStore {
    async fn find_template(&self, id: &str) -> Result<Option<DeviceTemplate>, DiscoveryError> {
        Ok(self.templates.lock().await.get(id).cloned())
    }

    async fn templates_by_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<DeviceTemplate>, DiscoveryError> {
        Ok(filtered(&*self.templates.lock().await, |t| t.owner == owner))
    }

    async fn all_templates(&self) -> Result<Vec<DeviceTemplate>, DiscoveryError> {
        Ok(filtered(&*self.templates.lock().await, |_| true))
    }

    async fn save_template(&self, template: DeviceTemplate) -> Result<(), DiscoveryError> {
        template.validate()?;
        let mut templates = self.templates.lock().await;
        self.commit(TEMPLATES_FILE, &mut *templates, |t| {
            t.insert(template.id.clone(), template);
        })
        .await
    }
}

#[async_trait]
impl RequestTopicRepository for DocumentStore {
    async fn find_request_topic(&self, id: &str) -> Result<Option<RequestTopic>, DiscoveryError> {
        Ok(self.topics.lock().await.get(id).cloned())
    }

    async fn request_topics_by_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<RequestTopic>, DiscoveryError> {
        Ok(filtered(&*self.topics.lock().await, |t| t.owner == owner))
    }

    async fn save_request_topic(&self, topic: RequestTopic) -> Result<(), DiscoveryError> {
        topic.validate()?;
        let mut topics = self.topics.lock().await;
        self.commit(REQUEST_TOPICS_FILE, &mut *topics, |t| {
            t.insert(topic.id.clone(), topic);
        })
        .await
    }

    async fn delete_request_topic(&self, id: &str) -> Result<bool, DiscoveryError> {
        let mut topics = self.topics.lock().await;
        if !topics.contains_key(id) {
            return Ok(false);
        }
        self.commit(REQUEST_TOPICS_FILE, &mut *topics, |t| {
            t.remove(id);
        })
        .await?;
        Ok(true)
    }
}

#[async_trait]
impl DynamicDeploymentRepository for DocumentStore {
    async fn find_deployment(&self, id: &str) -> Result<Option<DynamicDeployment>, DiscoveryError> {
        Ok(self.deployments.lock().await.get(id).cloned())
    }

    async fn all_deployments(&self) -> Result<Vec<DynamicDeployment>, DiscoveryError> {
        Ok(filtered(&*self.deployments.lock().await, |_| true))
    }

    async fn deployments_by_template(
        &self,
        template_id: &str,
    ) -> Result<Vec<DynamicDeployment>, DiscoveryError> {
        Ok(filtered(&*self.deployments.lock().await, |d| {
            d.device_template == template_id
        }))
    }

    async fn save_deployment(&self, deployment: DynamicDeployment) -> Result<(), DiscoveryError> {
        if deployment.id.trim().is_empty() {
            return Err(DiscoveryError::invalid_argument(
                "deployment id must not be empty",
            ));
        }
        let mut deployments = self.deployments.lock().await;
        self.commit(DEPLOYMENTS_FILE, &mut *deployments, |d| {
            d.insert(deployment.id.clone(), deployment);
        })
        .await
    }

    async fn delete_deployment(&self, id: &str) -> Result<bool, DiscoveryError> {
        let mut deployments = self.deployments.lock().await;
        if !deployments.contains_key(id) {
            return Ok(false);
        }
        self.commit(DEPLOYMENTS_FILE, &mut *deployments, |d| {
            d.remove(id);
        })
        .await?;
        Ok(true)
    }

    async fn compare_and_set_activating(
        &self,
        id: &str,
        expected: bool,
        new: bool,
    ) -> Result<bool, DiscoveryError> {
        let mut deployments = self.deployments.lock().await;
        let current = deployments
            .get(id)
            .ok_or_else(|| DiscoveryError::not_found("dynamic deployment", id))?;
        if current.activating_intended != expected {
            return Ok(false);
        }
        self.commit(DEPLOYMENTS_FILE, &mut *deployments, |d| {
            if let Some(deployment) = d.get_mut(id) {
                deployment.activating_intended = new;
            }
        })
        .await?;
        Ok(true)
    }

    async fn update_state(
        &self,
        id: &str,
        state: DynamicDeploymentState,
        device: Option<DeviceDetails>,
    ) -> Result<(), DiscoveryError> {
        let mut deployments = self.deployments.lock().await;
        if !deployments.contains_key(id) {
            return Err(DiscoveryError::not_found("dynamic deployment", id));
        }
        self.commit(DEPLOYMENTS_FILE, &mut *deployments, |d| {
            if let Some(deployment) = d.get_mut(id) {
                deployment.last_state = state;
                deployment.last_device_details = device;
            }
        })
        .await
    }
}

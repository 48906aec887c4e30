//! Gateway to the discovery repositories

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::DiscoveryError;
use crate::messaging::scatter_gather::{RequestStage, ScatterGatherRequest};
use crate::messaging::{publish_json, BusMessage, PubSub, Subscription, SubscriptionId};
use crate::models::candidates::{
    CandidateDevicesCollection, CandidateDevicesResultContainer, CandidateDevicesRevision,
};
use crate::models::messages::{
    CancelSubscriptionsMessage, CandidateDevicesReply, CandidateDevicesRequest, CommandMessage,
    MessageBody, ReplyMessage, RepositoryTestReply, RepositoryTestRequest, RequestMessage,
};
use crate::models::template::DeviceTemplate;
use crate::models::topic::RequestTopic;
use crate::mqtt::topics::Topics;
use crate::utils::generate_correlation_id;

/// Unsolicited change of a repository's candidates for a subscribed template
#[derive(Debug, Clone)]
pub struct CandidateDevicesNotification {
    pub template_id: String,
    pub repository_name: String,
    pub revision: CandidateDevicesRevision,
}

struct TemplateSubscription {
    owner: String,
    request_topics: Vec<RequestTopic>,
}

/// Notification return topic shared by all subscribed templates of one owner
struct OwnerChannel {
    return_topic: String,
    subscription_id: SubscriptionId,
    forwarder: JoinHandle<()>,
}

#[derive(Default)]
struct GatewayState {
    /// template id -> subscription
    subscriptions: HashMap<String, TemplateSubscription>,
    /// owner id -> notification channel
    channels: HashMap<String, OwnerChannel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrelationHeader {
    #[serde(default)]
    correlation_id: Option<String>,
}

/// Performs the scatter-gather protocol against discovery repositories and
/// manages standing candidate subscriptions
pub struct DiscoveryGateway {
    bus: Arc<dyn PubSub>,
    state: Arc<Mutex<GatewayState>>,
    notifications: mpsc::UnboundedSender<CandidateDevicesNotification>,
}

impl DiscoveryGateway {
    /// Notifications for subscribed templates are sent on `notifications`
    pub fn new(
        bus: Arc<dyn PubSub>,
        notifications: mpsc::UnboundedSender<CandidateDevicesNotification>,
    ) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(GatewayState::default())),
            notifications,
        }
    }

    /// Queries the repositories behind `request_topics` for candidates of the template
    pub async fn get_candidate_devices(
        &self,
        template: &DeviceTemplate,
        request_topics: &[RequestTopic],
    ) -> Result<CandidateDevicesResultContainer, DiscoveryError> {
        self.query(template, request_topics, false).await
    }

    /// Like [`get_candidate_devices`](Self::get_candidate_devices), additionally asking the
    /// repositories to report later changes
    pub async fn get_candidate_devices_with_subscription(
        &self,
        template: &DeviceTemplate,
        request_topics: &[RequestTopic],
    ) -> Result<CandidateDevicesResultContainer, DiscoveryError> {
        self.query(template, request_topics, true).await
    }

    async fn query(
        &self,
        template: &DeviceTemplate,
        request_topics: &[RequestTopic],
        subscribe: bool,
    ) -> Result<CandidateDevicesResultContainer, DiscoveryError> {
        template.validate()?;
        validate_topics(request_topics)?;

        let (notification_topic, created) = if subscribe {
            let (topic, created) = self.create_subscription(template, request_topics).await?;
            (Some(topic), created)
        } else {
            (None, false)
        };

        let body = CandidateDevicesRequest::for_template(template, notification_topic);
        let replies: Vec<ReplyMessage<CandidateDevicesReply>> =
            match self.send_request(request_topics, body).await {
                Ok(replies) => replies,
                Err(e) => {
                    if created {
                        let mut state = self.state.lock().await;
                        let released = self.release_subscription(&mut state, &template.id).await;
                        if let Err(release_error) = released {
                            warn!(
                                "Failed to release subscription of template {}: {}",
                                template.id, release_error
                            );
                        }
                    }
                    return Err(e);
                }
            };

        let mut container = CandidateDevicesResultContainer::new(&template.id);
        for reply in replies {
            let Some(devices) = reply
                .message
                .first_revision()
                .and_then(|r| r.replaced_devices())
            else {
                debug!("Reply of {} carries no candidate set", reply.sender_name);
                continue;
            };
            container.replace_collection(CandidateDevicesCollection::with_devices(
                reply.sender_name.clone(),
                devices.iter().cloned(),
            ));
        }

        info!(
            "Template {}: {} candidate devices from {} repositories",
            template.id,
            container.devices_count(),
            container.collections_count()
        );
        Ok(container)
    }

    /// Asks which repositories listen on a request topic; repository name -> device count
    pub async fn available_repositories(
        &self,
        request_topic: &RequestTopic,
    ) -> Result<HashMap<String, usize>, DiscoveryError> {
        validate_topics(std::slice::from_ref(request_topic))?;
        let replies: Vec<ReplyMessage<RepositoryTestReply>> = self
            .send_request(std::slice::from_ref(request_topic), RepositoryTestRequest::default())
            .await?;
        Ok(replies
            .into_iter()
            .map(|r| (r.sender_name, r.message.devices_count))
            .collect())
    }

    /// Ends the template's subscription at the repositories behind its own and the given topics
    pub async fn cancel_subscription(
        &self,
        template: &DeviceTemplate,
        additional_topics: &[RequestTopic],
    ) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().await;
        let removed = state.subscriptions.remove(&template.id);

        let mut topics: Vec<RequestTopic> = additional_topics.to_vec();
        if let Some(subscription) = &removed {
            topics.extend(subscription.request_topics.iter().cloned());
        }
        let mut seen = HashSet::new();
        topics.retain(|t| seen.insert(t.full_topic()));

        let message = CommandMessage::new(CancelSubscriptionsMessage::new([template.id.clone()]));
        for topic in &topics {
            let cancel_topic = Topics::request(topic, CancelSubscriptionsMessage::TOPIC_SUFFIX);
            if let Err(e) = publish_json(self.bus.as_ref(), &cancel_topic, &message).await {
                warn!("Failed to publish cancel message on {}: {}", cancel_topic, e);
            }
        }

        let Some(removed) = removed else {
            return Ok(());
        };
        info!("Cancelled candidate subscription of template {}", template.id);
        self.drop_unused_channel(&mut state, &removed.owner).await
    }

    /// Forgets a subscription without telling the repositories
    async fn release_subscription(
        &self,
        state: &mut GatewayState,
        template_id: &str,
    ) -> Result<(), DiscoveryError> {
        let Some(removed) = state.subscriptions.remove(template_id) else {
            return Ok(());
        };
        debug!("Released subscription of template {}", template_id);
        self.drop_unused_channel(state, &removed.owner).await
    }

    /// Closes the owner's notification topic once no template of it is subscribed
    async fn drop_unused_channel(
        &self,
        state: &mut GatewayState,
        owner: &str,
    ) -> Result<(), DiscoveryError> {
        if state.subscriptions.values().any(|s| s.owner == owner) {
            return Ok(());
        }
        if let Some(channel) = state.channels.remove(owner) {
            debug!("Dropping notification topic {}", channel.return_topic);
            self.bus
                .unsubscribe(&channel.return_topic, channel.subscription_id)
                .await?;
            channel.forwarder.abort();
        }
        Ok(())
    }

    /// Cancels the subscriptions of all given templates at one request topic
    pub async fn cancel_subscriptions_for_request_topic(
        &self,
        templates: &[DeviceTemplate],
        request_topic: &RequestTopic,
    ) -> Result<(), DiscoveryError> {
        if templates.is_empty() {
            return Ok(());
        }
        let message = CommandMessage::new(CancelSubscriptionsMessage::new(
            templates.iter().map(|t| t.id.clone()),
        ));
        let cancel_topic = Topics::request(request_topic, CancelSubscriptionsMessage::TOPIC_SUFFIX);
        publish_json(self.bus.as_ref(), &cancel_topic, &message).await
    }

    pub async fn is_subscribed(&self, template_id: &str) -> bool {
        self.state.lock().await.subscriptions.contains_key(template_id)
    }

    /// Registers the subscription; returns the owner's notification topic and
    /// whether the template was not subscribed before
    async fn create_subscription(
        &self,
        template: &DeviceTemplate,
        request_topics: &[RequestTopic],
    ) -> Result<(String, bool), DiscoveryError> {
        let mut state = self.state.lock().await;

        if !state.channels.contains_key(&template.owner) {
            let return_topic = Topics::return_topic(
                &template.owner,
                Topics::DISCOVERY_CATEGORY,
                &generate_correlation_id(),
            );
            let subscription = self.bus.subscribe(&return_topic).await?;
            let subscription_id = subscription.id();
            let forwarder = tokio::spawn(forward_notifications(
                subscription,
                self.state.clone(),
                self.notifications.clone(),
            ));
            debug!("Listening for notifications of {} on {}", template.owner, return_topic);
            state.channels.insert(
                template.owner.clone(),
                OwnerChannel {
                    return_topic,
                    subscription_id,
                    forwarder,
                },
            );
        }

        let created = state
            .subscriptions
            .insert(
                template.id.clone(),
                TemplateSubscription {
                    owner: template.owner.clone(),
                    request_topics: request_topics.to_vec(),
                },
            )
            .is_none();

        let topic = state
            .channels
            .get(&template.owner)
            .map(|c| c.return_topic.clone())
            .ok_or_else(|| DiscoveryError::Internal("notification channel vanished".to_string()))?;
        Ok((topic, created))
    }

    async fn send_request<Q, R>(
        &self,
        request_topics: &[RequestTopic],
        body: Q,
    ) -> Result<Vec<ReplyMessage<R>>, DiscoveryError>
    where
        Q: MessageBody + Clone,
        R: MessageBody,
    {
        let mut stages = Vec::with_capacity(request_topics.len());
        let mut correlation_ids = HashSet::new();

        for topic in request_topics {
            let correlation_id = generate_correlation_id();
            let return_topic =
                Topics::return_topic(&topic.owner, Topics::DISCOVERY_CATEGORY, &correlation_id);
            let request =
                RequestMessage::new(body.clone(), return_topic.clone(), correlation_id.clone());
            let payload = serde_json::to_vec(&request)?;

            let mut stage =
                RequestStage::new(Topics::request(topic, Q::TOPIC_SUFFIX), return_topic, payload)?
                    .with_timeout(topic.timeout_duration())?;
            if let Some(expected) = topic.expected_replies {
                stage = stage.with_expected_replies(expected)?;
            }
            stages.push(stage);
            correlation_ids.insert(correlation_id);
        }

        let request = ScatterGatherRequest::new(stages)?.with_predicate(Arc::new(
            move |message: &BusMessage| match message.parse_json::<CorrelationHeader>() {
                Ok(header) => header
                    .correlation_id
                    .map_or(true, |id| correlation_ids.contains(&id)),
                Err(_) => false,
            },
        ));

        request.execute_json::<ReplyMessage<R>>(self.bus.as_ref()).await
    }
}

fn validate_topics(request_topics: &[RequestTopic]) -> Result<(), DiscoveryError> {
    if request_topics.is_empty() {
        return Err(DiscoveryError::invalid_argument(
            "the request topics must not be empty",
        ));
    }
    for topic in request_topics {
        topic.validate()?;
    }
    Ok(())
}

async fn forward_notifications(
    mut subscription: Subscription,
    state: Arc<Mutex<GatewayState>>,
    notifications: mpsc::UnboundedSender<CandidateDevicesNotification>,
) {
    while let Some(message) = subscription.recv().await {
        let reply = match message.parse_json::<ReplyMessage<CandidateDevicesReply>>() {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Ignoring notification: {}", e);
                continue;
            }
        };

        let state = state.lock().await;
        for revision in reply.message.revisions {
            for template_id in &revision.reference_ids {
                if !state.subscriptions.contains_key(template_id) {
                    continue;
                }
                debug!(
                    "Repository {} revised candidates of template {}: {}",
                    reply.sender_name,
                    template_id,
                    revision.summary()
                );
                let notification = CandidateDevicesNotification {
                    template_id: template_id.clone(),
                    repository_name: reply.sender_name.clone(),
                    revision: revision.clone(),
                };
                if notifications.send(notification).is_err() {
                    debug!("Notification receiver closed, stopping forwarder");
                    return;
                }
            }
        }
    }
}

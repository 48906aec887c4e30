//! Topic scheme of the discovery protocol

use crate::models::topic::RequestTopic;

/// Topic patterns and MQTT filter matching
pub struct Topics;

impl Topics {
    /// Return topic category used for discovery replies and notifications
    pub const DISCOVERY_CATEGORY: &'static str = "discovery";

    /// Topic a request body is published on: `{owner}/discovery/{suffix}/{body_suffix}`
    pub fn request(topic: &RequestTopic, body_suffix: &str) -> String {
        format!("{}/{}", topic.full_topic(), body_suffix)
    }

    /// Return topic: `r/{owner}/{category}/{correlation_id}`
    pub fn return_topic(owner: &str, category: &str, correlation_id: &str) -> String {
        format!("r/{}/{}/{}", owner, category, correlation_id)
    }

    /// Parse a return topic to extract the owner id
    pub fn parse_return_owner(topic: &str) -> Option<String> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() == 4 && parts[0] == "r" && !parts[1].is_empty() {
            Some(parts[1].to_string())
        } else {
            None
        }
    }

    /// Check whether a concrete topic matches an MQTT topic filter
    pub fn matches(topic: &str, filter: &str) -> bool {
        if topic.starts_with('$') != filter.starts_with('$') {
            return false;
        }
        let mut topic_levels = topic.split('/');
        let mut filter_levels = filter.split('/');
        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => continue,
                (Some(f), Some(t)) if f == t => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// Check whether a filter is well formed (`#` last, wildcards occupy whole levels)
    pub fn is_valid_filter(filter: &str) -> bool {
        if filter.is_empty() {
            return false;
        }
        let levels: Vec<&str> = filter.split('/').collect();
        for (i, level) in levels.iter().enumerate() {
            if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
                return false;
            }
            if level.contains('+') && *level != "+" {
                return false;
            }
        }
        true
    }
}

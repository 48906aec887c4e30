//! Device templates: hard requirements and soft scoring criteria

use serde::{Deserialize, Serialize};

use crate::errors::DiscoveryError;
use crate::models::description::DeviceDescription;

/// Case-insensitive string comparison used by requirements and criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringOperator {
    Equals,
    NotEquals,
    Contains,
    BeginsWith,
    EndsWith,
}

impl StringOperator {
    /// Applies the operator; an absent target never matches
    pub fn apply(&self, target: Option<&str>, pattern: &str) -> bool {
        let Some(target) = target else {
            return false;
        };
        let target = target.to_lowercase();
        let pattern = pattern.to_lowercase();
        match self {
            StringOperator::Equals => target == pattern,
            StringOperator::NotEquals => target != pattern,
            StringOperator::Contains => target.contains(&pattern),
            StringOperator::BeginsWith => target.starts_with(&pattern),
            StringOperator::EndsWith => target.ends_with(&pattern),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberOperator {
    Equals,
    NotEquals,
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
}

impl NumberOperator {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            NumberOperator::Equals => value == threshold,
            NumberOperator::NotEquals => value != threshold,
            NumberOperator::LessThan => value < threshold,
            NumberOperator::LessEquals => value <= threshold,
            NumberOperator::GreaterThan => value > threshold,
            NumberOperator::GreaterEquals => value >= threshold,
        }
    }
}

/// Textual field of a device description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionField {
    Name,
    Description,
    Location,
    Type,
    Model,
    Manufacturer,
    MacAddress,
}

impl DescriptionField {
    pub fn get<'a>(&self, description: &'a DeviceDescription) -> Option<&'a str> {
        let ids = &description.identifiers;
        match self {
            DescriptionField::Name => description.name.as_deref(),
            DescriptionField::Description => description.description.as_deref(),
            DescriptionField::Location => description.location.as_deref(),
            DescriptionField::Type => ids.device_type.as_deref(),
            DescriptionField::Model => ids.model_name.as_deref(),
            DescriptionField::Manufacturer => ids.manufacturer.as_deref(),
            DescriptionField::MacAddress => ids.mac_address.as_deref(),
        }
    }
}

/// Hard filter; a candidate must fulfil every requirement of its template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceRequirement {
    Name {
        operator: StringOperator,
        #[serde(rename = "match")]
        pattern: String,
    },
    /// Fulfilled when any keyword matches
    Keyword {
        operator: StringOperator,
        #[serde(rename = "match")]
        pattern: String,
    },
    Identifier {
        field: DescriptionField,
        operator: StringOperator,
        #[serde(rename = "match")]
        pattern: String,
    },
    /// Matches the informal location text of the description
    Location {
        operator: StringOperator,
        #[serde(rename = "match")]
        pattern: String,
    },
    StringCapability {
        #[serde(rename = "capabilityName")]
        capability_name: String,
        operator: StringOperator,
        #[serde(rename = "match")]
        pattern: String,
    },
    NumberCapability {
        #[serde(rename = "capabilityName")]
        capability_name: String,
        operator: NumberOperator,
        threshold: f64,
    },
    BooleanCapability {
        #[serde(rename = "capabilityName")]
        capability_name: String,
        value: bool,
    },
}

impl DeviceRequirement {
    pub fn is_fulfilled_by(&self, description: &DeviceDescription) -> bool {
        match self {
            DeviceRequirement::Name { operator, pattern } => {
                operator.apply(description.name.as_deref(), pattern)
            }
            DeviceRequirement::Keyword { operator, pattern } => description
                .keywords
                .iter()
                .any(|k| operator.apply(Some(k), pattern)),
            DeviceRequirement::Identifier {
                field,
                operator,
                pattern,
            } => operator.apply(field.get(description), pattern),
            DeviceRequirement::Location { operator, pattern } => {
                operator.apply(description.location.as_deref(), pattern)
            }
            DeviceRequirement::StringCapability {
                capability_name,
                operator,
                pattern,
            } => {
                let value = description.capability(capability_name).map(|v| v.as_text());
                operator.apply(value.as_deref(), pattern)
            }
            DeviceRequirement::NumberCapability {
                capability_name,
                operator,
                threshold,
            } => description
                .capability(capability_name)
                .and_then(|v| v.as_number())
                .is_some_and(|n| operator.apply(n, *threshold)),
            DeviceRequirement::BooleanCapability {
                capability_name,
                value,
            } => description
                .capability(capability_name)
                .and_then(|v| v.as_bool())
                .is_some_and(|b| b == *value),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            DeviceRequirement::Name { pattern, .. }
            | DeviceRequirement::Keyword { pattern, .. }
            | DeviceRequirement::Identifier { pattern, .. }
            | DeviceRequirement::Location { pattern, .. } => non_empty("match", pattern),
            DeviceRequirement::StringCapability {
                capability_name,
                pattern,
                ..
            } => {
                non_empty("capabilityName", capability_name)?;
                non_empty("match", pattern)
            }
            DeviceRequirement::NumberCapability {
                capability_name,
                threshold,
                ..
            } => {
                non_empty("capabilityName", capability_name)?;
                finite("threshold", *threshold)
            }
            DeviceRequirement::BooleanCapability {
                capability_name, ..
            } => non_empty("capabilityName", capability_name),
        }
    }
}

/// Soft ranking signal; contributes a score increment per candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoringCriterion {
    /// Free-text relevance of the description (BM25)
    Description {
        query: String,
        #[serde(rename = "exactMatchScore")]
        exact_match_score: f64,
    },
    Term {
        field: DescriptionField,
        operator: StringOperator,
        #[serde(rename = "match")]
        pattern: String,
        #[serde(rename = "scoreIncrement")]
        score_increment: f64,
    },
    StringCapability {
        #[serde(rename = "capabilityName")]
        capability_name: String,
        operator: StringOperator,
        #[serde(rename = "match")]
        pattern: String,
        #[serde(rename = "scoreIncrement")]
        score_increment: f64,
    },
    NumberCapability {
        #[serde(rename = "capabilityName")]
        capability_name: String,
        operator: NumberOperator,
        threshold: f64,
        #[serde(rename = "scoreIncrement")]
        score_increment: f64,
    },
    BooleanCapability {
        #[serde(rename = "capabilityName")]
        capability_name: String,
        #[serde(rename = "trueScoreIncrement")]
        true_score_increment: f64,
        #[serde(rename = "falseScoreIncrement")]
        false_score_increment: f64,
    },
}

impl ScoringCriterion {
    fn validate(&self) -> Result<(), String> {
        match self {
            ScoringCriterion::Description {
                query,
                exact_match_score,
            } => {
                non_empty("query", query)?;
                if !(*exact_match_score > 0.0) || !exact_match_score.is_finite() {
                    return Err("exactMatchScore must be greater than zero".to_string());
                }
                Ok(())
            }
            ScoringCriterion::Term {
                pattern,
                score_increment,
                ..
            } => {
                non_empty("match", pattern)?;
                non_zero("scoreIncrement", *score_increment)
            }
            ScoringCriterion::StringCapability {
                capability_name,
                pattern,
                score_increment,
                ..
            } => {
                non_empty("capabilityName", capability_name)?;
                non_empty("match", pattern)?;
                non_zero("scoreIncrement", *score_increment)
            }
            ScoringCriterion::NumberCapability {
                capability_name,
                threshold,
                score_increment,
                ..
            } => {
                non_empty("capabilityName", capability_name)?;
                finite("threshold", *threshold)?;
                non_zero("scoreIncrement", *score_increment)
            }
            ScoringCriterion::BooleanCapability {
                capability_name,
                true_score_increment,
                false_score_increment,
            } => {
                non_empty("capabilityName", capability_name)?;
                finite("trueScoreIncrement", *true_score_increment)?;
                finite("falseScoreIncrement", *false_score_increment)
            }
        }
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    Ok(())
}

fn finite(field: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("{} must be a finite number", field));
    }
    Ok(())
}

fn non_zero(field: &str, value: f64) -> Result<(), String> {
    finite(field, value)?;
    if value == 0.0 {
        return Err(format!("{} must not be zero", field));
    }
    Ok(())
}

/// Declarative description of required and desired device properties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTemplate {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// User owning the template; request topics are looked up by owner
    pub owner: String,

    #[serde(default)]
    pub requirements: Vec<DeviceRequirement>,

    #[serde(default)]
    pub scoring_criteria: Vec<ScoringCriterion>,
}

impl DeviceTemplate {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Rejects templates that cannot be sent to a discovery repository
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.id.trim().is_empty() {
            return Err(DiscoveryError::invalid_argument("template id must not be empty"));
        }
        if self.owner.trim().is_empty() {
            return Err(DiscoveryError::invalid_argument(format!(
                "template '{}' has no owner",
                self.id
            )));
        }
        for (i, requirement) in self.requirements.iter().enumerate() {
            requirement.validate().map_err(|e| {
                DiscoveryError::invalid_argument(format!(
                    "template '{}' requirements[{}]: {}",
                    self.id, i, e
                ))
            })?;
        }
        for (i, criterion) in self.scoring_criteria.iter().enumerate() {
            criterion.validate().map_err(|e| {
                DiscoveryError::invalid_argument(format!(
                    "template '{}' scoringCriteria[{}]: {}",
                    self.id, i, e
                ))
            })?;
        }
        Ok(())
    }

    /// True when every requirement is fulfilled by the description
    pub fn accepts(&self, description: &DeviceDescription) -> bool {
        self.requirements
            .iter()
            .all(|r| r.is_fulfilled_by(description))
    }
}

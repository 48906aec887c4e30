//! Candidate device collections, revisions and rankings

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::models::description::DeviceDescription;

/// Candidate devices reported by one discovery repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDevicesCollection {
    pub repository_name: String,
    pub devices: Vec<DeviceDescription>,
}

impl CandidateDevicesCollection {
    pub fn new(repository_name: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            devices: Vec::new(),
        }
    }

    /// Builds a collection, merging duplicate MAC addresses as [`add`](Self::add) does
    pub fn with_devices(
        repository_name: impl Into<String>,
        devices: impl IntoIterator<Item = DeviceDescription>,
    ) -> Self {
        let mut collection = Self::new(repository_name);
        for device in devices {
            collection.add(device);
        }
        collection
    }

    /// Adds a device. A device with the same MAC address is replaced in place
    /// unless the new one is strictly older; returns whether it was stored.
    pub fn add(&mut self, device: DeviceDescription) -> bool {
        match self.devices.iter().position(|d| d.same_device(&device)) {
            Some(i) if device.is_older_than(&self.devices[i]) => false,
            Some(i) => {
                self.devices[i] = device;
                true
            }
            None => {
                self.devices.push(device);
                true
            }
        }
    }

    pub fn remove_mac(&mut self, mac_address: &str) -> bool {
        let mac = mac_address.trim().to_lowercase();
        let before = self.devices.len();
        self.devices.retain(|d| d.mac_key().as_deref() != Some(mac.as_str()));
        before != self.devices.len()
    }

    /// Inserts the device or replaces the stored device with the same MAC address
    pub fn upsert(&mut self, device: DeviceDescription) {
        match self.devices.iter().position(|d| d.same_device(&device)) {
            Some(i) => self.devices[i] = device,
            None => self.devices.push(device),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Merged view of all repositories' candidates for one device template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDevicesResultContainer {
    pub template_id: String,
    /// One collection per repository, in first-seen order
    pub collections: Vec<CandidateDevicesCollection>,
}

impl CandidateDevicesResultContainer {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            collections: Vec::new(),
        }
    }

    /// Replaces the collection of the same repository in place, or appends it
    pub fn replace_collection(&mut self, collection: CandidateDevicesCollection) {
        match self
            .collections
            .iter_mut()
            .find(|c| c.repository_name == collection.repository_name)
        {
            Some(existing) => *existing = collection,
            None => self.collections.push(collection),
        }
    }

    pub fn collection_mut(&mut self, repository_name: &str) -> &mut CandidateDevicesCollection {
        let index = match self
            .collections
            .iter()
            .position(|c| c.repository_name == repository_name)
        {
            Some(i) => i,
            None => {
                self.collections
                    .push(CandidateDevicesCollection::new(repository_name));
                self.collections.len() - 1
            }
        };
        &mut self.collections[index]
    }

    pub fn collection(&self, repository_name: &str) -> Option<&CandidateDevicesCollection> {
        self.collections
            .iter()
            .find(|c| c.repository_name == repository_name)
    }

    pub fn devices_count(&self) -> usize {
        self.collections.iter().map(|c| c.len()).sum()
    }

    pub fn collections_count(&self) -> usize {
        self.collections.len()
    }

    /// Applies a repository revision to that repository's collection, creating it if missing
    pub fn apply_revision(&mut self, repository_name: &str, revision: &CandidateDevicesRevision) {
        let collection = self.collection_mut(repository_name);
        for operation in &revision.operations {
            operation.apply(collection);
        }
    }
}

/// Change of one repository's candidate set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDevicesRevision {
    /// Template ids the revision applies to
    #[serde(default)]
    pub reference_ids: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_operations")]
    pub operations: Vec<RevisionOperation>,
}

impl CandidateDevicesRevision {
    /// Descriptions of the first replace operation; the full answer to a query
    pub fn replaced_devices(&self) -> Option<&[DeviceDescription]> {
        self.operations.iter().find_map(|op| match op {
            RevisionOperation::Replace { device_descriptions } => {
                Some(device_descriptions.as_slice())
            }
            _ => None,
        })
    }

    pub fn summary(&self) -> String {
        self.operations
            .iter()
            .map(|op| op.summary())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RevisionOperation {
    Replace {
        #[serde(rename = "deviceDescriptions", default)]
        device_descriptions: Vec<DeviceDescription>,
    },
    Upsert {
        #[serde(rename = "deviceDescriptions", default)]
        device_descriptions: Vec<DeviceDescription>,
    },
    Delete {
        #[serde(rename = "macAddresses", default)]
        mac_addresses: Vec<String>,
    },
}

impl RevisionOperation {
    pub fn apply(&self, collection: &mut CandidateDevicesCollection) {
        match self {
            RevisionOperation::Replace {
                device_descriptions,
            } => {
                collection.devices.clear();
                for device in device_descriptions {
                    collection.add(device.clone());
                }
            }
            RevisionOperation::Upsert {
                device_descriptions,
            } => {
                for device in device_descriptions {
                    collection.upsert(device.clone());
                }
            }
            RevisionOperation::Delete { mac_addresses } => {
                for mac in mac_addresses {
                    collection.remove_mac(mac);
                }
            }
        }
    }

    pub fn summary(&self) -> String {
        match self {
            RevisionOperation::Replace {
                device_descriptions,
            } => format!("replace with {} candidate devices", device_descriptions.len()),
            RevisionOperation::Upsert {
                device_descriptions,
            } => format!("upsert {} candidate devices", device_descriptions.len()),
            RevisionOperation::Delete { mac_addresses } => {
                format!("delete {} candidate devices", mac_addresses.len())
            }
        }
    }
}

/// Skips operations of unknown type instead of rejecting the whole revision
fn deserialize_operations<'de, D>(deserializer: D) -> Result<Vec<RevisionOperation>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RevisionOperation>(value) {
            Ok(op) => Some(op),
            Err(e) => {
                warn!("Ignoring revision operation: {}", e);
                None
            }
        })
        .collect())
}

/// Candidate device with its total score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidateDevice {
    pub repository_name: String,
    pub description: DeviceDescription,
    pub score: f64,
}

/// Candidates ordered by descending score; recomputed wholesale, never edited
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateDevicesRanking {
    entries: Vec<ScoredCandidateDevice>,
}

impl CandidateDevicesRanking {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Entries must already be sorted by descending score
    pub(crate) fn from_sorted(entries: Vec<ScoredCandidateDevice>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ScoredCandidateDevice] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredCandidateDevice> {
        self.entries.iter()
    }

    pub fn first(&self) -> Option<&ScoredCandidateDevice> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top_score(&self) -> Option<f64> {
        self.first().map(|e| e.score)
    }

    /// Score of the device with the given MAC address, if ranked
    pub fn score_of(&self, mac_address: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| {
                e.description
                    .mac_key()
                    .is_some_and(|m| m.eq_ignore_ascii_case(mac_address.trim()))
            })
            .map(|e| e.score)
    }

    pub fn mac_addresses(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|e| e.description.mac_key())
            .collect()
    }
}

impl<'a> IntoIterator for &'a CandidateDevicesRanking {
    type Item = &'a ScoredCandidateDevice;
    type IntoIter = std::slice::Iter<'a, ScoredCandidateDevice>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

//! Turns raw repository results into a ranking for one device template

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::discovery::scoring::ScoringContext;
use crate::models::candidates::{
    CandidateDevicesRanking, CandidateDevicesResultContainer, ScoredCandidateDevice,
};
use crate::models::description::DeviceDescription;
use crate::models::template::DeviceTemplate;

/// Candidate after de-duplication, remembering where its MAC was first seen
struct PoolEntry<'a> {
    repository_name: &'a str,
    description: &'a DeviceDescription,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateDevicesProcessor;

impl CandidateDevicesProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Flattens, de-duplicates, filters, scores and sorts the candidates.
    ///
    /// Ties keep the order in which devices were first seen (repository order,
    /// then position within the repository), so identical inputs always yield
    /// identical rankings.
    pub fn process(
        &self,
        container: &CandidateDevicesResultContainer,
        template: &DeviceTemplate,
    ) -> CandidateDevicesRanking {
        let pool = Self::flatten(container);
        let pool_size = pool.len();

        let survivors: Vec<PoolEntry<'_>> = pool
            .into_iter()
            .filter(|entry| template.accepts(entry.description))
            .collect();

        debug!(
            "Template {}: {} distinct candidates, {} fulfil all requirements",
            template.id,
            pool_size,
            survivors.len()
        );

        if survivors.is_empty() {
            return CandidateDevicesRanking::empty();
        }

        let batch: Vec<&DeviceDescription> = survivors.iter().map(|e| e.description).collect();
        let context = ScoringContext::new(&batch);

        let mut scored: Vec<ScoredCandidateDevice> = survivors
            .iter()
            .enumerate()
            .map(|(position, entry)| ScoredCandidateDevice {
                repository_name: entry.repository_name.to_string(),
                description: entry.description.clone(),
                score: context.total_score(template, position, entry.description),
            })
            .collect();

        // stable: equal scores keep first-seen order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        CandidateDevicesRanking::from_sorted(scored)
    }

    fn flatten(container: &CandidateDevicesResultContainer) -> Vec<PoolEntry<'_>> {
        let mut pool: Vec<PoolEntry<'_>> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for collection in &container.collections {
            for description in &collection.devices {
                let Some(mac) = description.mac_key() else {
                    continue;
                };
                match positions.get(&mac) {
                    Some(&i) => {
                        // a later occurrence wins unless it is strictly older
                        if !description.is_older_than(pool[i].description) {
                            pool[i] = PoolEntry {
                                repository_name: &collection.repository_name,
                                description,
                            };
                        }
                    }
                    None => {
                        positions.insert(mac, pool.len());
                        pool.push(PoolEntry {
                            repository_name: &collection.repository_name,
                            description,
                        });
                    }
                }
            }
        }
        pool
    }
}

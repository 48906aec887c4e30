//! Queue bookkeeping of the discovery engine

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::engine::tasks::{DiscoveryTask, TaskKind};

pub type TaskId = u64;

#[derive(Debug)]
struct QueuedTask {
    id: TaskId,
    task: DiscoveryTask,
    started: bool,
}

/// Result of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued(TaskId),
    /// Took the place of a waiting task of the same deployment
    Replaced { id: TaskId, replaced: TaskId },
    /// A waiting task of the same deployment already covers it
    Dropped,
}

impl Submission {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Submission::Queued(id) | Submission::Replaced { id, .. } => Some(*id),
            Submission::Dropped => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedTaskView {
    pub id: TaskId,
    pub kind: TaskKind,
    pub started: bool,
}

/// Snapshot of all queues, keyed by template and deployment id
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub template_queues: BTreeMap<String, Vec<QueuedTaskView>>,
    pub deployment_queues: BTreeMap<String, Vec<QueuedTaskView>>,
}

/// FIFO queues per template and per deployment.
///
/// Only queue heads run. A task stays at its head while running and is
/// removed on completion. A deployment head waits while its template has
/// any queued task, and a template head waits while a deployment task
/// reading the template's candidates runs.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    next_id: TaskId,
    template_queues: BTreeMap<String, VecDeque<QueuedTask>>,
    deployment_queues: BTreeMap<String, VecDeque<QueuedTask>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, task: DiscoveryTask) -> Submission {
        self.next_id += 1;
        let id = self.next_id;

        let Some(deployment_id) = task.deployment_id().map(str::to_string) else {
            let template_id = task.template_id().to_string();
            debug!("Queued {:?} #{} for template {}", task.kind(), id, template_id);
            self.template_queues
                .entry(template_id)
                .or_default()
                .push_back(QueuedTask {
                    id,
                    task,
                    started: false,
                });
            return Submission::Queued(id);
        };

        let queue = self.deployment_queues.entry(deployment_id.clone()).or_default();
        if let Some(waiting) = queue.iter_mut().find(|t| !t.started) {
            if !task.is_user_created() {
                debug!(
                    "Dropped {:?} for deployment {}, #{} is waiting",
                    task.kind(),
                    deployment_id,
                    waiting.id
                );
                return Submission::Dropped;
            }
            let replaced = waiting.id;
            debug!(
                "{:?} #{} replaces #{} for deployment {}",
                task.kind(),
                id,
                replaced,
                deployment_id
            );
            waiting.id = id;
            waiting.task = task;
            return Submission::Replaced { id, replaced };
        }

        debug!("Queued {:?} #{} for deployment {}", task.kind(), id, deployment_id);
        queue.push_back(QueuedTask {
            id,
            task,
            started: false,
        });
        Submission::Queued(id)
    }

    /// Marks every runnable queue head as started and returns them
    pub fn start_runnable(&mut self) -> Vec<(TaskId, DiscoveryTask)> {
        let mut started = Vec::new();

        let busy_templates: Vec<String> = self
            .deployment_queues
            .values()
            .filter_map(|q| q.front())
            .filter(|t| t.started && t.task.reads_candidates())
            .map(|t| t.task.template_id().to_string())
            .collect();

        for (template_id, queue) in self.template_queues.iter_mut() {
            let Some(head) = queue.front_mut() else {
                continue;
            };
            if head.started || busy_templates.contains(template_id) {
                continue;
            }
            head.started = true;
            started.push((head.id, head.task.clone()));
        }

        for queue in self.deployment_queues.values_mut() {
            let Some(head) = queue.front_mut() else {
                continue;
            };
            if head.started || self.template_queues.contains_key(head.task.template_id()) {
                continue;
            }
            head.started = true;
            started.push((head.id, head.task.clone()));
        }

        started
    }

    /// Removes a finished task; empty queues are dropped
    pub fn complete(&mut self, id: TaskId) -> Option<DiscoveryTask> {
        Self::remove_head(&mut self.template_queues, id)
            .or_else(|| Self::remove_head(&mut self.deployment_queues, id))
    }

    fn remove_head(
        queues: &mut BTreeMap<String, VecDeque<QueuedTask>>,
        id: TaskId,
    ) -> Option<DiscoveryTask> {
        let key = queues
            .iter()
            .find(|(_, q)| q.front().is_some_and(|t| t.id == id))
            .map(|(k, _)| k.clone())?;
        let queue = queues.get_mut(&key)?;
        let finished = queue.pop_front().map(|t| t.task);
        if queue.is_empty() {
            queues.remove(&key);
        }
        finished
    }

    pub fn is_idle(&self) -> bool {
        self.template_queues.is_empty() && self.deployment_queues.is_empty()
    }

    pub fn has_deployment_tasks(&self, deployment_id: &str) -> bool {
        self.deployment_queues.contains_key(deployment_id)
    }

    /// Whether a task of `kind` is queued or running for the template
    pub fn has_template_task(&self, template_id: &str, kind: TaskKind) -> bool {
        self.template_queues
            .get(template_id)
            .is_some_and(|q| q.iter().any(|t| t.task.kind() == kind))
    }

    pub fn running_count(&self) -> usize {
        self.template_queues
            .values()
            .chain(self.deployment_queues.values())
            .filter(|q| q.front().is_some_and(|t| t.started))
            .count()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        fn view(
            queues: &BTreeMap<String, VecDeque<QueuedTask>>,
        ) -> BTreeMap<String, Vec<QueuedTaskView>> {
            queues
                .iter()
                .map(|(key, queue)| {
                    let tasks = queue
                        .iter()
                        .map(|t| QueuedTaskView {
                            id: t.id,
                            kind: t.task.kind(),
                            started: t.started,
                        })
                        .collect();
                    (key.clone(), tasks)
                })
                .collect()
        }

        QueueSnapshot {
            template_queues: view(&self.template_queues),
            deployment_queues: view(&self.deployment_queues),
        }
    }
}

//! Per-org admission control.
//!
//! Each org owns one [`OrgSlots`] (running set plus FIFO wait queue) behind
//! its own async mutex. `admit` and `release` are the only mutations of the
//! running count, and both run entirely under that lock.

use std::collections::VecDeque;
use std::sync::Arc;

use autopilot_types::workflow::AdmissionOutcome;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("workflow {workflow_id} holds no slot or queue entry in org {org_id}")]
    NotHeld { org_id: String, workflow_id: Uuid },
}

#[derive(Debug, Default)]
struct OrgSlots {
    /// Admission order.
    running: Vec<Uuid>,
    queue: VecDeque<Uuid>,
}

impl OrgSlots {
    fn queue_position(&self, workflow_id: Uuid) -> Option<usize> {
        self.queue
            .iter()
            .position(|id| *id == workflow_id)
            .map(|index| index + 1)
    }
}

/// Point-in-time view of one org's slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub org_id: String,
    pub limit: usize,
    pub running: Vec<Uuid>,
    /// Head of the queue first; position is index + 1.
    pub queued: Vec<Uuid>,
}

/// Bounds concurrently running workflows per org and queues the overflow.
pub struct AdmissionController {
    limit: usize,
    orgs: DashMap<String, Arc<Mutex<OrgSlots>>>,
}

impl AdmissionController {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            limit: concurrency_limit.max(1),
            orgs: DashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn slots(&self, org_id: &str) -> Arc<Mutex<OrgSlots>> {
        self.orgs.entry(org_id.to_string()).or_default().clone()
    }

    /// Take a slot for `workflow_id` or append it to the org's wait queue.
    ///
    /// Admitting a workflow that already runs or waits is a no-op that
    /// reports its current state.
    pub async fn admit(&self, org_id: &str, workflow_id: Uuid) -> AdmissionOutcome {
        let slots = self.slots(org_id);
        let mut slots = slots.lock().await;

        if slots.running.contains(&workflow_id) {
            return AdmissionOutcome::Running;
        }
        if let Some(position) = slots.queue_position(workflow_id) {
            return AdmissionOutcome::Queued { position };
        }

        if slots.running.len() < self.limit {
            slots.running.push(workflow_id);
            tracing::info!(
                org_id,
                workflow_id = %workflow_id,
                running = slots.running.len(),
                "workflow admitted"
            );
            AdmissionOutcome::Running
        } else {
            slots.queue.push_back(workflow_id);
            let position = slots.queue.len();
            tracing::info!(org_id, workflow_id = %workflow_id, position, "workflow queued");
            AdmissionOutcome::Queued { position }
        }
    }

    /// Free the slot held by `workflow_id` and promote the queue head.
    ///
    /// A queued workflow is simply removed. Returns the promoted workflow,
    /// which the caller must start.
    pub async fn release(&self, org_id: &str, workflow_id: Uuid) -> Result<Option<Uuid>, AdmissionError> {
        let slots = self.slots(org_id);
        let mut slots = slots.lock().await;

        if let Some(index) = slots.running.iter().position(|id| *id == workflow_id) {
            slots.running.remove(index);
            let promoted = if slots.running.len() < self.limit {
                slots.queue.pop_front()
            } else {
                None
            };
            if let Some(next) = promoted {
                slots.running.push(next);
                tracing::info!(
                    org_id,
                    released = %workflow_id,
                    promoted = %next,
                    "queued workflow promoted"
                );
            }
            return Ok(promoted);
        }

        if let Some(position) = slots.queue_position(workflow_id) {
            slots.queue.remove(position - 1);
            return Ok(None);
        }

        Err(AdmissionError::NotHeld {
            org_id: org_id.to_string(),
            workflow_id,
        })
    }

    /// Remove a waiting workflow without touching the running count.
    pub async fn cancel_queued(&self, org_id: &str, workflow_id: Uuid) -> bool {
        let slots = self.slots(org_id);
        let mut slots = slots.lock().await;
        match slots.queue_position(workflow_id) {
            Some(position) => {
                slots.queue.remove(position - 1);
                true
            }
            None => false,
        }
    }

    /// 1-based queue position, `None` when not waiting.
    pub async fn position(&self, org_id: &str, workflow_id: Uuid) -> Option<usize> {
        let slots = self.slots(org_id);
        let slots = slots.lock().await;
        slots.queue_position(workflow_id)
    }

    pub async fn is_running(&self, org_id: &str, workflow_id: Uuid) -> bool {
        let slots = self.slots(org_id);
        let slots = slots.lock().await;
        slots.running.contains(&workflow_id)
    }

    pub async fn snapshot(&self, org_id: &str) -> AdmissionSnapshot {
        let slots = self.slots(org_id);
        let slots = slots.lock().await;
        AdmissionSnapshot {
            org_id: org_id.to_string(),
            limit: self.limit,
            running: slots.running.clone(),
            queued: slots.queue.iter().copied().collect(),
        }
    }

    /// Seed state persisted by an earlier process.
    ///
    /// Running workflows keep their slot even beyond the limit; queued ones
    /// are appended in the given order.
    pub async fn restore(&self, org_id: &str, running: &[Uuid], queued: &[Uuid]) {
        let slots = self.slots(org_id);
        let mut slots = slots.lock().await;
        for id in running {
            if !slots.running.contains(id) {
                slots.running.push(*id);
            }
        }
        for id in queued {
            if !slots.running.contains(id) && !slots.queue.contains(id) {
                slots.queue.push_back(*id);
            }
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limit", &self.limit)
            .field("orgs", &self.orgs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn test_ten_submissions_three_slots() {
        let controller = AdmissionController::new(3);
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::now_v7()).collect();

        let mut outcomes = Vec::new();
        for id in &ids {
            outcomes.push(controller.admit("org_a", *id).await);
        }

        assert!(outcomes[..3].iter().all(|o| *o == AdmissionOutcome::Running));
        let positions: Vec<usize> = outcomes[3..]
            .iter()
            .map(|o| match o {
                AdmissionOutcome::Queued { position } => *position,
                other => panic!("expected queued, got {other:?}"),
            })
            .collect();
        assert_eq!(positions, (1..=7).collect::<Vec<_>>());

        // Promotion is strictly FIFO and positions only move forward.
        let mut promoted = Vec::new();
        let mut running: VecDeque<Uuid> = ids[..3].iter().copied().collect();
        while let Some(done) = running.pop_front() {
            let before = controller.position("org_a", ids[9]).await;
            if let Some(next) = controller.release("org_a", done).await.unwrap() {
                promoted.push(next);
                running.push_back(next);
                let after = controller.position("org_a", ids[9]).await;
                if let (Some(before), Some(after)) = (before, after) {
                    assert_eq!(after, before - 1);
                }
            }
        }
        assert_eq!(promoted, ids[3..].to_vec());
        let snapshot = controller.snapshot("org_a").await;
        assert!(snapshot.running.is_empty() && snapshot.queued.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_admission_never_exceeds_limit() {
        let controller = Arc::new(AdmissionController::new(4));
        let mut set = JoinSet::new();
        for _ in 0..40 {
            let controller = controller.clone();
            set.spawn(async move {
                let id = Uuid::now_v7();
                (id, controller.admit("org_a", id).await)
            });
        }

        let mut running = 0;
        let mut positions = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined.unwrap().1 {
                AdmissionOutcome::Running => running += 1,
                AdmissionOutcome::Queued { position } => positions.push(position),
            }
        }
        positions.sort_unstable();

        assert_eq!(running, 4);
        assert_eq!(positions, (1..=36).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_orgs_are_isolated() {
        let controller = AdmissionController::new(1);
        assert_eq!(controller.admit("org_a", Uuid::now_v7()).await, AdmissionOutcome::Running);
        assert_eq!(controller.admit("org_b", Uuid::now_v7()).await, AdmissionOutcome::Running);
        assert_eq!(
            controller.admit("org_a", Uuid::now_v7()).await,
            AdmissionOutcome::Queued { position: 1 }
        );
    }

    #[tokio::test]
    async fn test_running_workflow_is_never_requeued() {
        let controller = AdmissionController::new(1);
        let id = Uuid::now_v7();
        controller.admit("org_a", id).await;
        assert_eq!(controller.admit("org_a", id).await, AdmissionOutcome::Running);
        assert_eq!(controller.snapshot("org_a").await.queued, Vec::<Uuid>::new());
    }

    #[tokio::test]
    async fn test_cancelling_queued_workflow_frees_no_slot() {
        let controller = AdmissionController::new(1);
        let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        controller.admit("org_a", a).await;
        controller.admit("org_a", b).await;
        controller.admit("org_a", c).await;

        assert!(controller.cancel_queued("org_a", b).await);
        assert!(!controller.cancel_queued("org_a", a).await);
        assert_eq!(controller.position("org_a", c).await, Some(1));
        assert!(controller.is_running("org_a", a).await);

        assert_eq!(controller.release("org_a", a).await.unwrap(), Some(c));
    }

    #[tokio::test]
    async fn test_release_of_unknown_workflow_is_an_error() {
        let controller = AdmissionController::new(2);
        let id = Uuid::now_v7();
        assert_eq!(
            controller.release("org_a", id).await,
            Err(AdmissionError::NotHeld {
                org_id: "org_a".to_string(),
                workflow_id: id
            })
        );
    }

    #[tokio::test]
    async fn test_restore_seeds_persisted_state() {
        let controller = AdmissionController::new(1);
        let (running, queued) = (Uuid::now_v7(), Uuid::now_v7());
        controller.restore("org_a", &[running], &[queued]).await;

        let fresh = Uuid::now_v7();
        assert_eq!(
            controller.admit("org_a", fresh).await,
            AdmissionOutcome::Queued { position: 2 }
        );
        assert_eq!(controller.release("org_a", running).await.unwrap(), Some(queued));
    }
}

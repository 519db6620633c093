//! Pending-job registry
//!
//! Maps prompt ids to one-shot completion signals. The listener task feeds
//! every parsed event in through [`JobRegistry::apply`]; each waiter is
//! notified at most once, by whichever terminal outcome arrives first.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::oneshot;

use comfyrun_domain::{ExecutionFailure, JobStatus, PromptId};
use comfyrun_shared::ServerEvent;

use crate::error::ComfyError;

/// Terminal outcomes kept for prompts nobody has registered (yet)
const UNCLAIMED_CAPACITY: usize = 64;

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(ExecutionFailure),
    Interrupted,
    ConnectionLost(String),
}

impl JobOutcome {
    fn status(&self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            Self::Failed(_) | Self::ConnectionLost(_) => JobStatus::Failed,
            Self::Interrupted => JobStatus::Interrupted,
        }
    }
}

struct PendingJob {
    status: JobStatus,
    notify: Option<oneshot::Sender<JobOutcome>>,
}

impl PendingJob {
    /// Move forward; sends the outcome once when a terminal state is reached.
    fn advance(&mut self, next: JobStatus, outcome: Option<JobOutcome>) -> bool {
        let Some(status) = self.status.advance(next) else {
            return false;
        };
        self.status = status;
        if let (Some(outcome), Some(notify)) = (outcome, self.notify.take()) {
            // Receiver gone means the caller stopped waiting
            let _ = notify.send(outcome);
        }
        true
    }
}

#[derive(Default)]
struct RegistryInner {
    jobs: HashMap<PromptId, PendingJob>,
    unclaimed: VecDeque<(PromptId, JobOutcome)>,
    /// Set once the session is gone; later registrations fail with it
    closed: Option<String>,
}

/// Tracks jobs awaited on one session.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start waiting on a prompt the server has accepted.
    ///
    /// If its terminal event already arrived, the receiver is ready at once.
    /// After [`fail_all`](Self::fail_all) every registration is refused with
    /// `ConnectionLost`.
    pub fn register(
        &self,
        prompt_id: PromptId,
    ) -> Result<oneshot::Receiver<JobOutcome>, ComfyError> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.closed {
            tracing::warn!(prompt_id = %prompt_id, reason = %reason, "Prompt accepted after the session went away");
            return Err(ComfyError::ConnectionLost(reason.clone()));
        }
        if inner.jobs.contains_key(&prompt_id) {
            tracing::error!(prompt_id = %prompt_id, "Prompt id registered twice on one session");
            return Err(ComfyError::DuplicateJob(prompt_id));
        }

        let (tx, rx) = oneshot::channel();
        let mut job = PendingJob {
            status: JobStatus::Queued,
            notify: Some(tx),
        };

        if let Some(index) = inner.unclaimed.iter().position(|(id, _)| *id == prompt_id) {
            if let Some((_, outcome)) = inner.unclaimed.remove(index) {
                tracing::debug!(prompt_id = %prompt_id, "Prompt finished before registration");
                job.advance(outcome.status(), Some(outcome));
            }
        }

        inner.jobs.insert(prompt_id, job);
        Ok(rx)
    }

    /// Fold one event-stream message into the registry.
    ///
    /// Returns the new status of the affected job, if it changed.
    pub fn apply(&self, event: &ServerEvent) -> Option<(PromptId, JobStatus)> {
        let prompt_id = event.prompt_id()?;
        let (next, outcome) = match event {
            ServerEvent::ExecutionStart { .. }
            | ServerEvent::ExecutionCached { .. }
            | ServerEvent::Progress { .. }
            | ServerEvent::Executed { .. }
            | ServerEvent::Executing { node: Some(_), .. } => (JobStatus::Running, None),
            ServerEvent::Executing { node: None, .. } | ServerEvent::ExecutionSuccess { .. } => {
                (JobStatus::Completed, Some(JobOutcome::Completed))
            }
            ServerEvent::ExecutionError { failure, .. } => (
                JobStatus::Failed,
                Some(JobOutcome::Failed(failure.clone())),
            ),
            ServerEvent::ExecutionInterrupted { .. } => {
                (JobStatus::Interrupted, Some(JobOutcome::Interrupted))
            }
            ServerEvent::Status { .. } | ServerEvent::Unknown { .. } => return None,
        };

        let mut inner = self.lock();
        match inner.jobs.get_mut(prompt_id) {
            Some(job) => job
                .advance(next, outcome)
                .then(|| (prompt_id.clone(), job.status)),
            None => {
                if let Some(outcome) = outcome {
                    inner.park(prompt_id.clone(), outcome);
                }
                None
            }
        }
    }

    /// Resolve a job from outside the event stream (history reconciliation).
    ///
    /// Returns false if the job is unknown or already finished.
    pub fn resolve(&self, prompt_id: &PromptId, outcome: JobOutcome) -> bool {
        let mut inner = self.lock();
        match inner.jobs.get_mut(prompt_id) {
            Some(job) => job.advance(outcome.status(), Some(outcome)),
            None => false,
        }
    }

    /// Stop tracking a job. Its waiter, if any, sees a closed channel.
    pub fn remove(&self, prompt_id: &PromptId) -> bool {
        self.lock().jobs.remove(prompt_id).is_some()
    }

    /// Fail every unfinished job with `ConnectionLost` and refuse new ones.
    pub fn fail_all(&self, reason: &str) -> usize {
        let mut inner = self.lock();
        if inner.closed.is_none() {
            inner.closed = Some(reason.to_string());
        }
        let mut failed = 0;
        for job in inner.jobs.values_mut() {
            let outcome = JobOutcome::ConnectionLost(reason.to_string());
            if job.advance(JobStatus::Failed, Some(outcome)) {
                failed += 1;
            }
        }
        failed
    }

    pub fn status(&self, prompt_id: &PromptId) -> Option<JobStatus> {
        self.lock().jobs.get(prompt_id).map(|job| job.status)
    }

    /// Prompts still waiting for a terminal outcome.
    pub fn pending_ids(&self) -> Vec<PromptId> {
        let inner = self.lock();
        let mut ids: Vec<PromptId> = inner
            .jobs
            .iter()
            .filter(|(_, job)| !job.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryInner {
    fn park(&mut self, prompt_id: PromptId, outcome: JobOutcome) {
        // Duplicate completions: first wins
        if self.unclaimed.iter().any(|(id, _)| *id == prompt_id) {
            return;
        }
        if self.unclaimed.len() >= UNCLAIMED_CAPACITY {
            self.unclaimed.pop_front();
        }
        self.unclaimed.push_back((prompt_id, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comfyrun_domain::NodeId;

    fn pid(id: &str) -> PromptId {
        PromptId::from(id)
    }

    fn executing(id: &str, node: Option<&str>) -> ServerEvent {
        ServerEvent::Executing {
            prompt_id: Some(pid(id)),
            node: node.map(NodeId::from),
        }
    }

    #[tokio::test]
    async fn completion_resolves_the_waiter() {
        let registry = JobRegistry::new();
        let rx = registry.register(pid("p1")).unwrap();

        assert_eq!(
            registry.apply(&executing("p1", Some("3"))),
            Some((pid("p1"), JobStatus::Running))
        );
        assert_eq!(
            registry.apply(&executing("p1", None)),
            Some((pid("p1"), JobStatus::Completed))
        );
        assert_eq!(rx.await.unwrap(), JobOutcome::Completed);
    }

    #[tokio::test]
    async fn first_terminal_event_wins() {
        let registry = JobRegistry::new();
        let rx = registry.register(pid("p1")).unwrap();

        registry.apply(&ServerEvent::ExecutionError {
            prompt_id: pid("p1"),
            failure: ExecutionFailure {
                exception_message: "boom".into(),
                ..Default::default()
            },
        });
        assert_eq!(registry.apply(&executing("p1", None)), None);
        assert_eq!(
            registry.apply(&ServerEvent::ExecutionSuccess {
                prompt_id: pid("p1")
            }),
            None
        );

        match rx.await.unwrap() {
            JobOutcome::Failed(failure) => assert_eq!(failure.exception_message, "boom"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(registry.status(&pid("p1")), Some(JobStatus::Failed));
    }

    #[test]
    fn late_events_do_not_regress_status() {
        let registry = JobRegistry::new();
        let _rx = registry.register(pid("p1")).unwrap();
        registry.apply(&executing("p1", Some("9")));
        assert_eq!(
            registry.apply(&ServerEvent::ExecutionStart {
                prompt_id: pid("p1")
            }),
            None
        );
        assert_eq!(registry.status(&pid("p1")), Some(JobStatus::Running));
    }

    #[test]
    fn events_for_other_prompts_are_ignored() {
        let registry = JobRegistry::new();
        let _rx = registry.register(pid("mine")).unwrap();
        assert_eq!(registry.apply(&executing("theirs", Some("1"))), None);
        assert_eq!(registry.status(&pid("mine")), Some(JobStatus::Queued));
        assert_eq!(
            registry.apply(&ServerEvent::Status {
                queue_remaining: Some(1),
                sid: None
            }),
            None
        );
    }

    #[tokio::test]
    async fn completion_before_registration_is_not_lost() {
        let registry = JobRegistry::new();
        registry.apply(&ServerEvent::ExecutionSuccess {
            prompt_id: pid("early"),
        });

        let rx = registry.register(pid("early")).unwrap();
        assert_eq!(rx.await.unwrap(), JobOutcome::Completed);
        assert_eq!(registry.status(&pid("early")), Some(JobStatus::Completed));
    }

    #[test]
    fn unclaimed_buffer_is_bounded() {
        let registry = JobRegistry::new();
        for i in 0..(UNCLAIMED_CAPACITY + 10) {
            registry.apply(&ServerEvent::ExecutionInterrupted {
                prompt_id: pid(&format!("p{i}")),
                node_id: None,
            });
        }
        assert_eq!(registry.lock().unclaimed.len(), UNCLAIMED_CAPACITY);
        // Oldest entries were evicted
        assert!(!registry
            .lock()
            .unclaimed
            .iter()
            .any(|(id, _)| id.as_str() == "p0"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = JobRegistry::new();
        let _rx = registry.register(pid("p1")).unwrap();
        assert!(matches!(
            registry.register(pid("p1")),
            Err(ComfyError::DuplicateJob(id)) if id.as_str() == "p1"
        ));
    }

    #[tokio::test]
    async fn fail_all_only_touches_unfinished_jobs() {
        let registry = JobRegistry::new();
        let done = registry.register(pid("done")).unwrap();
        let waiting = registry.register(pid("waiting")).unwrap();
        registry.apply(&executing("done", None));

        assert_eq!(registry.fail_all("gone"), 1);
        assert_eq!(done.await.unwrap(), JobOutcome::Completed);
        assert_eq!(
            waiting.await.unwrap(),
            JobOutcome::ConnectionLost("gone".into())
        );
        assert!(registry.pending_ids().is_empty());
    }

    #[test]
    fn registration_after_fail_all_is_connection_lost() {
        let registry = JobRegistry::new();
        registry.fail_all("session closed");
        registry.fail_all("later reason");

        assert!(matches!(
            registry.register(pid("late")),
            Err(ComfyError::ConnectionLost(reason)) if reason == "session closed"
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn removing_a_job_closes_its_channel() {
        let registry = JobRegistry::new();
        let rx = registry.register(pid("p1")).unwrap();
        assert!(registry.remove(&pid("p1")));
        assert!(rx.await.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn resolve_reports_whether_anything_changed() {
        let registry = JobRegistry::new();
        let _rx = registry.register(pid("p1")).unwrap();
        assert!(registry.resolve(&pid("p1"), JobOutcome::Interrupted));
        assert!(!registry.resolve(&pid("p1"), JobOutcome::Completed));
        assert!(!registry.resolve(&pid("unknown"), JobOutcome::Completed));
    }
}

use praetor_strategy::QueueView;
use praetor_types::{Task, TaskKind, TaskProposal, TaskStatus};

/// Keep this many terminal tasks around for the frontend's history view.
const TERMINAL_TAIL: usize = 100;

/// Retry ladder for transient failures: 2s, 4s, 8s.
fn retry_backoff_ms(retries: u32) -> u64 {
    2_000u64.saturating_mul(1 << (retries.saturating_sub(1)).min(2))
}

/// Priority queue with (kind, village) dedup and scheduled-for eligibility.
/// Owned by one engine worker, so plain `&mut` access is enough.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    next_id: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
        }
    }

    /// Rebuild from a persisted snapshot; running tasks from the previous
    /// process can never complete, so they fall back to pending.
    pub fn restore(tasks: Vec<Task>) -> Self {
        let next_id = tasks.iter().map(|t| t.id + 1).max().unwrap_or(1);
        let mut queue = Self { tasks, next_id };
        for task in &mut queue.tasks {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
            }
        }
        queue
    }

    /// Absorb a proposal. A colliding non-terminal task wins: the existing
    /// task is kept and its id returned.
    pub fn add(&mut self, proposal: TaskProposal, now_ms: u64) -> u64 {
        if let Some(existing) = self
            .tasks
            .iter()
            .find(|t| t.collides_with(proposal.kind, proposal.village_id))
        {
            return existing.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            kind: proposal.kind,
            params: proposal.params,
            priority: proposal.priority,
            village_id: proposal.village_id,
            scheduled_for: proposal.scheduled_for,
            status: TaskStatus::Pending,
            retries: 0,
            max_retries: praetor_types::DEFAULT_MAX_RETRIES,
            error: None,
            created_at: now_ms,
            last_attempt_at: None,
        });
        self.trim_terminal_tail();
        id
    }

    pub fn has_task_of_kind(&self, kind: TaskKind, village_id: Option<u64>) -> bool {
        self.tasks.iter().any(|t| t.collides_with(kind, village_id))
    }

    pub fn has_any_task_of_kind(&self, kind: TaskKind) -> bool {
        self.tasks
            .iter()
            .any(|t| !t.status.is_terminal() && t.kind == kind)
    }

    /// The due pending task with the smallest priority value, ties broken
    /// by age. Marks it running before returning.
    pub fn take_next(&mut self, now_ms: u64) -> Option<Task> {
        let candidate = self
            .tasks
            .iter_mut()
            .filter(|t| t.is_eligible(now_ms))
            .min_by_key(|t| (t.priority, t.created_at))?;
        candidate.status = TaskStatus::Running;
        candidate.last_attempt_at = Some(now_ms);
        Some(candidate.clone())
    }

    /// Peek variant of `take_next` for status displays.
    pub fn peek_next(&self, now_ms: u64) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.is_eligible(now_ms))
            .min_by_key(|t| (t.priority, t.created_at))
    }

    /// Earliest instant any pending task becomes due.
    pub fn next_due_at(&self) -> Option<u64> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.scheduled_for.unwrap_or(0))
            .min()
    }

    pub fn mark_completed(&mut self, id: u64) {
        if let Some(task) = self.task_mut(id) {
            task.status = TaskStatus::Completed;
            task.error = None;
        }
        self.trim_terminal_tail();
    }

    /// Transient failure path: re-enter pending with backoff until retries
    /// run out, then terminal-fail. Returns true when the task went terminal.
    pub fn mark_failed(&mut self, id: u64, error: &str, now_ms: u64) -> bool {
        let Some(task) = self.task_mut(id) else {
            return false;
        };
        task.retries += 1;
        task.error = Some(error.to_string());
        if task.retries >= task.max_retries {
            task.status = TaskStatus::Failed;
            self.trim_terminal_tail();
            return true;
        }
        task.status = TaskStatus::Pending;
        task.scheduled_for = Some(now_ms + retry_backoff_ms(task.retries));
        false
    }

    /// Structural failure path: no retry will help, fail immediately.
    pub fn mark_failed_terminal(&mut self, id: u64, error: &str) {
        if let Some(task) = self.task_mut(id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error.to_string());
        }
        self.trim_terminal_tail();
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn get_all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    fn task_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn trim_terminal_tail(&mut self) {
        let terminal = self
            .tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .count();
        if terminal <= TERMINAL_TAIL {
            return;
        }
        let mut to_drop = terminal - TERMINAL_TAIL;
        // Oldest terminal entries go first; `tasks` is in insertion order.
        self.tasks.retain(|t| {
            if to_drop > 0 && t.status.is_terminal() {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }
}

impl QueueView for TaskQueue {
    fn has_task_of_kind(&self, kind: TaskKind, village_id: Option<u64>) -> bool {
        TaskQueue::has_task_of_kind(self, kind, village_id)
    }

    fn has_any_task_of_kind(&self, kind: TaskKind) -> bool {
        TaskQueue::has_any_task_of_kind(self, kind)
    }
}

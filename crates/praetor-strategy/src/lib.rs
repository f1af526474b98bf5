pub mod crop;
pub mod phase;
pub mod prereq;
pub mod ranker;
pub mod rules;

pub use crop::*;
pub use phase::*;
pub use prereq::*;
pub use ranker::*;
pub use rules::*;

use praetor_types::TaskKind;

/// Read-only view of the engine's task queue, so rules can avoid proposing
/// work that is already pending or running.
pub trait QueueView {
    fn has_task_of_kind(&self, kind: TaskKind, village_id: Option<u64>) -> bool;
    fn has_any_task_of_kind(&self, kind: TaskKind) -> bool;
}

/// Read-only view of the engine's cooldown ledger.
pub trait CooldownView {
    fn is_cooling(&self, key: &str) -> bool;
}

/// A view with nothing queued and nothing cooling; handy in tests.
pub struct OpenView;

impl QueueView for OpenView {
    fn has_task_of_kind(&self, _kind: TaskKind, _village_id: Option<u64>) -> bool {
        false
    }
    fn has_any_task_of_kind(&self, _kind: TaskKind) -> bool {
        false
    }
}

impl CooldownView for OpenView {
    fn is_cooling(&self, _key: &str) -> bool {
        false
    }
}

use crate::commitlog::Index;
use crate::replica::commit_log::RaftLogEntry;
use crate::replica::local_state::Term;

/// Snapshot is a handle to a state-machine-produced compact summary of
/// everything up to and including `index`. The replica never reads snapshot
/// contents; it only uses the handle to garbage collect the log and to answer
/// consistency checks at the snapshot boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Snapshot {
    pub index: Index,
    pub term: Term,
}

/// StateMachine is the application specific view of applying the replicated
/// logs in sequential consistent order.
pub trait StateMachine {
    /// apply_all is called only when it's guaranteed that the provided
    /// entries have been committed (i.e. replicated to a majority). Because
    /// of this guarantee, you will never need to reverse an entry once you've
    /// been asked to apply it, so your impl of applying an entry need not be
    /// reversible. Entries arrive in index order with no gaps.
    fn apply_all(&mut self, entries: Vec<RaftLogEntry>);

    /// Index of the highest entry this state machine has applied, or the
    /// sentinel 0 if it has applied nothing.
    fn last_applied_index(&self) -> Index;

    /// The most recent snapshot this state machine has produced, if any. The
    /// state machine alone decides when a snapshot becomes available; the
    /// replica polls this after applying entries.
    fn latest_snapshot(&self) -> Option<Snapshot>;
}

/// State machine that discards every entry. Useful for exercising the
/// replication machinery without an application attached.
pub struct NoOpStateMachine {
    last_applied: Index,
}

impl NoOpStateMachine {
    pub fn new() -> Self {
        NoOpStateMachine {
            last_applied: Index::ZERO,
        }
    }
}

impl Default for NoOpStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for NoOpStateMachine {
    fn apply_all(&mut self, entries: Vec<RaftLogEntry>) {
        if let Some(last) = entries.last() {
            self.last_applied = last.index;
        }
    }

    fn last_applied_index(&self) -> Index {
        self.last_applied
    }

    fn latest_snapshot(&self) -> Option<Snapshot> {
        None
    }
}

//! Raft-specific view over the generic commit log: the entry type with its
//! byte codec, and the bookkeeping (commit index, snapshot boundary) that the
//! generic log knows nothing about.

use crate::commitlog::{Entry, Index, Log};
use crate::replica::local_state::Term;
use crate::replica::state_machine::Snapshot;
use bytes::{Buf, BufMut, Bytes};
use std::io;

/// A single replicated log entry, uniquely identified by `(term, index)`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RaftLogEntry {
    pub term: Term,
    pub index: Index,
    pub data: Bytes,
}

impl Entry for RaftLogEntry {}

impl From<Vec<u8>> for RaftLogEntry {
    fn from(blob: Vec<u8>) -> Self {
        let mut buf = Bytes::from(blob);
        assert!(
            buf.remaining() >= 16,
            "log entry blob shorter than its 16 byte header"
        );
        let term = Term::new(buf.get_u64());
        let index = Index::new(buf.get_u64());

        RaftLogEntry {
            term,
            index,
            data: buf,
        }
    }
}

impl From<RaftLogEntry> for Vec<u8> {
    fn from(entry: RaftLogEntry) -> Self {
        let mut buf = Vec::with_capacity(16 + entry.data.len());
        buf.put_u64(entry.term.into_inner());
        buf.put_u64(entry.index.val());
        buf.put_slice(&entry.data);
        buf
    }
}

/// RaftLog wraps a generic log with raft semantics: the (term 0, index 0)
/// sentinel for the empty log, conflict resolution, the volatile commit
/// index, and the snapshot boundary left behind by log garbage collection.
pub struct RaftLog<L: Log<RaftLogEntry>> {
    logger: slog::Logger,
    log: L,
    commit_index: Index,
    snapshot: Option<Snapshot>,
}

impl<L: Log<RaftLogEntry>> RaftLog<L> {
    pub fn new(logger: slog::Logger, log: L) -> Self {
        RaftLog {
            logger,
            log,
            commit_index: Index::ZERO,
            snapshot: None,
        }
    }

    pub fn commit_index(&self) -> Index {
        self.commit_index
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot
    }

    /// `(term, index)` of the last entry, falling back to the snapshot
    /// boundary when the whole log has been released, and to the sentinel
    /// `(0, 0)` when there is nothing at all.
    pub fn latest_entry(&self) -> Result<(Term, Index), io::Error> {
        let last = self.log.next_index().minus(1);
        if let Some(entry) = self.log.read(last)? {
            return Ok((entry.term, entry.index));
        }
        if let Some(snapshot) = self.snapshot {
            if snapshot.index == last {
                return Ok((snapshot.term, snapshot.index));
            }
        }

        Ok((Term::new(0), Index::ZERO))
    }

    pub fn last_log_index(&self) -> Index {
        self.log.next_index().minus(1)
    }

    /// Term of the entry at `index`, answering from the sentinel or the
    /// snapshot boundary where the log itself cannot. None means the entry is
    /// unknown to us.
    pub fn term_at(&self, index: Index) -> Result<Option<Term>, io::Error> {
        if index == Index::ZERO {
            return Ok(Some(Term::new(0)));
        }
        if let Some(snapshot) = self.snapshot {
            if snapshot.index == index {
                return Ok(Some(snapshot.term));
            }
        }

        Ok(self.log.read(index)?.map(|entry| entry.term))
    }

    pub fn entries_between(
        &self,
        from_inclusive: Index,
        to_exclusive: Index,
    ) -> Result<Vec<RaftLogEntry>, io::Error> {
        self.log.read_between(from_inclusive, to_exclusive)
    }

    /// Leader-side append of a brand new entry at the next index.
    pub fn append_new(&mut self, term: Term, data: Bytes) -> Result<Index, io::Error> {
        let index = self.log.next_index();
        self.log.append(RaftLogEntry { term, index, data })
    }

    /// Follower-side conflict resolution: skip entries we already hold,
    /// delete the conflicting suffix the first time an index disagrees on
    /// term, and append everything new. Returns the index of the batch's last
    /// entry. The caller must have verified the log-matching property for the
    /// entry preceding the batch.
    pub fn delete_conflicting_and_append(
        &mut self,
        entries: &[RaftLogEntry],
    ) -> Result<Index, io::Error> {
        let last = entries
            .last()
            .expect("delete_conflicting_and_append requires a non-empty batch");

        for entry in entries {
            match self.log.read(entry.index)? {
                Some(existing) if existing.term == entry.term => {
                    // Already replicated; a duplicate delivery must not
                    // re-write it.
                }
                Some(_) => {
                    assert!(
                        entry.index > self.commit_index,
                        "conflicting entry at index {} is at or below commit index {}",
                        entry.index,
                        self.commit_index
                    );
                    slog::info!(
                        self.logger,
                        "Deleting conflicting log suffix from index={}",
                        entry.index
                    );
                    self.log.truncate(entry.index)?;
                    self.append_contiguous(entry.clone())?;
                }
                None => self.append_contiguous(entry.clone())?,
            }
        }

        Ok(last.index)
    }

    fn append_contiguous(&mut self, entry: RaftLogEntry) -> Result<(), io::Error> {
        let expected = self.log.next_index();
        assert_eq!(
            entry.index, expected,
            "non-contiguous log append: got index {}, expected {}",
            entry.index, expected
        );
        self.log.append(entry)?;
        Ok(())
    }

    /// Commit index only ever moves forward; a stale value is ignored.
    pub fn ratchet_fwd_commit_index(&mut self, index: Index) {
        if index > self.commit_index {
            assert!(
                index <= self.last_log_index(),
                "commit index {} beyond last log index {}",
                index,
                self.last_log_index()
            );
            self.commit_index = index;
        }
    }

    /// Garbage collect everything the snapshot covers. Only entries already
    /// applied by the state machine are ever released.
    pub fn release_up_to_and_including(&mut self, snapshot: Snapshot) -> Result<(), io::Error> {
        self.log.release(snapshot.index)?;
        self.snapshot = Some(snapshot);
        slog::info!(
            self.logger,
            "Compacted log up to snapshot at index={} term={}",
            snapshot.index,
            snapshot.term
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::InMemoryLog;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn new_raft_log() -> RaftLog<InMemoryLog<RaftLogEntry>> {
        let log = InMemoryLog::create(test_logger()).unwrap();
        RaftLog::new(test_logger(), log)
    }

    fn entry(term: u64, index: u64, data: &'static str) -> RaftLogEntry {
        RaftLogEntry {
            term: Term::new(term),
            index: Index::new(index),
            data: Bytes::from_static(data.as_bytes()),
        }
    }

    #[test]
    fn entry_survives_byte_round_trip() {
        let original = entry(7, 42, "payload");
        let blob: Vec<u8> = original.clone().into();
        let decoded = RaftLogEntry::from(blob);
        assert_eq!(decoded, original);
    }

    #[test]
    fn empty_log_answers_with_sentinel() {
        let log = new_raft_log();
        assert_eq!(log.latest_entry().unwrap(), (Term::new(0), Index::ZERO));
        assert_eq!(log.term_at(Index::ZERO).unwrap(), Some(Term::new(0)));
        assert_eq!(log.term_at(Index::new(1)).unwrap(), None);
    }

    #[test]
    fn append_new_assigns_next_index() {
        let mut log = new_raft_log();
        assert_eq!(
            log.append_new(Term::new(1), Bytes::from_static(b"a")).unwrap(),
            Index::new(1)
        );
        assert_eq!(
            log.append_new(Term::new(1), Bytes::from_static(b"b")).unwrap(),
            Index::new(2)
        );
        assert_eq!(log.latest_entry().unwrap(), (Term::new(1), Index::new(2)));
    }

    #[test]
    fn conflicting_suffix_is_replaced() {
        let mut log = new_raft_log();
        log.append_new(Term::new(1), Bytes::from_static(b"a")).unwrap();
        log.append_new(Term::new(1), Bytes::from_static(b"b")).unwrap();
        log.append_new(Term::new(2), Bytes::from_static(b"rogue")).unwrap();

        let batch = vec![entry(3, 2, "x"), entry(3, 3, "y"), entry(3, 4, "z")];
        let last = log.delete_conflicting_and_append(&batch).unwrap();

        assert_eq!(last, Index::new(4));
        assert_eq!(log.term_at(Index::new(1)).unwrap(), Some(Term::new(1)));
        assert_eq!(log.term_at(Index::new(2)).unwrap(), Some(Term::new(3)));
        assert_eq!(log.latest_entry().unwrap(), (Term::new(3), Index::new(4)));
    }

    #[test]
    fn duplicate_batch_is_idempotent() {
        let mut log = new_raft_log();
        let batch = vec![entry(1, 1, "a"), entry(1, 2, "b")];

        log.delete_conflicting_and_append(&batch).unwrap();
        log.delete_conflicting_and_append(&batch).unwrap();

        assert_eq!(log.latest_entry().unwrap(), (Term::new(1), Index::new(2)));
        let stored = log.entries_between(Index::new(1), Index::new(3)).unwrap();
        assert_eq!(stored, batch);
    }

    #[test]
    fn matching_prefix_is_not_rewritten_by_shorter_batch() {
        let mut log = new_raft_log();
        let long = vec![entry(1, 1, "a"), entry(1, 2, "b"), entry(1, 3, "c")];
        log.delete_conflicting_and_append(&long).unwrap();

        // A delayed retransmission of an older, shorter batch must not
        // truncate what came after it.
        let short = vec![entry(1, 1, "a")];
        log.delete_conflicting_and_append(&short).unwrap();

        assert_eq!(log.latest_entry().unwrap(), (Term::new(1), Index::new(3)));
    }

    #[test]
    fn commit_index_only_moves_forward() {
        let mut log = new_raft_log();
        log.append_new(Term::new(1), Bytes::from_static(b"a")).unwrap();
        log.append_new(Term::new(1), Bytes::from_static(b"b")).unwrap();

        log.ratchet_fwd_commit_index(Index::new(2));
        assert_eq!(log.commit_index(), Index::new(2));

        log.ratchet_fwd_commit_index(Index::new(1));
        assert_eq!(log.commit_index(), Index::new(2));
    }

    #[test]
    fn released_log_answers_from_snapshot_boundary() {
        let mut log = new_raft_log();
        log.append_new(Term::new(1), Bytes::from_static(b"a")).unwrap();
        log.append_new(Term::new(2), Bytes::from_static(b"b")).unwrap();
        log.ratchet_fwd_commit_index(Index::new(2));

        let snapshot = Snapshot {
            index: Index::new(2),
            term: Term::new(2),
        };
        log.release_up_to_and_including(snapshot).unwrap();

        assert_eq!(log.term_at(Index::new(1)).unwrap(), None);
        assert_eq!(log.term_at(Index::new(2)).unwrap(), Some(Term::new(2)));
        assert_eq!(log.latest_entry().unwrap(), (Term::new(2), Index::new(2)));

        // The log keeps growing past the snapshot.
        assert_eq!(
            log.append_new(Term::new(3), Bytes::from_static(b"c")).unwrap(),
            Index::new(3)
        );
        assert_eq!(log.latest_entry().unwrap(), (Term::new(3), Index::new(3)));
    }
}

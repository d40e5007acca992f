use std::fmt;
use std::io;

/// Index is an index of an entry in the log; i.e. a log entry's index.
///
/// Indices start from 1. Index 0 is reserved as the sentinel meaning "before
/// the first entry" and is never occupied by a real entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Index(u64);

impl Index {
    /// Sentinel index preceding the first real entry.
    pub const ZERO: Index = Index(0);

    pub fn new(index: u64) -> Self {
        Index(index)
    }

    pub fn val(self) -> u64 {
        self.0
    }

    pub fn plus(self, delta: u64) -> Index {
        Index(self.0 + delta)
    }

    /// Saturating subtraction; never goes below the sentinel.
    pub fn minus(self, delta: u64) -> Index {
        Index(self.0.saturating_sub(delta))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry is a unit of data that can live in a log. Implementations provide a
/// byte round-trip so the same entry type can back both in-memory and on-disk
/// logs.
pub trait Entry: Clone + From<Vec<u8>> + Into<Vec<u8>> {}

/// Log is an append only log intended for use as a replicated commit log in a
/// database.
///
/// All mutators must durably persist before returning, or the caller must
/// understand the implementation's durability semantics.
pub trait Log<E: Entry> {
    /// append() appends a log entry to the log at the next log entry index,
    /// then returns the log entry index that was just used to append the
    /// entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// read() returns the entry at `index`, or None if the log has no entry
    /// there (never written, truncated, or released).
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// read_between() returns the entries in `[from_inclusive, to_exclusive)`
    /// in index order. Indices outside the log are simply absent from the
    /// result.
    fn read_between(&self, from_inclusive: Index, to_exclusive: Index) -> Result<Vec<E>, io::Error>;

    /// truncate() removes the entry at `from_index` and everything after it.
    fn truncate(&mut self, from_index: Index) -> Result<(), io::Error>;

    /// release() removes the entry at `up_to_inclusive` and everything before
    /// it. Remaining entries keep their original indices.
    fn release(&mut self, up_to_inclusive: Index) -> Result<(), io::Error>;

    /// next_index() returns the next index that will be used to append an
    /// entry.
    fn next_index(&self) -> Index;
}

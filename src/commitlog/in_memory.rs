use crate::commitlog::{Entry, Index, Log};
use std::io;
use std::marker::PhantomData;

// Theoretical model of a durable log. We hold encoded bytes rather than the
// original entries so the byte round-trip is exercised the same way a disk
// backed implementation would exercise it.
pub struct InMemoryLog<E: Entry> {
    logger: slog::Logger,
    // Index of the entry at entries[0]. Starts at 1 and only moves forward
    // when a prefix is released.
    base: u64,
    entries: Vec<Vec<u8>>,
    _pd: PhantomData<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create(logger: slog::Logger) -> Result<Self, io::Error> {
        Ok(InMemoryLog {
            logger,
            base: 1,
            entries: Vec::new(),
            _pd: PhantomData,
        })
    }

    fn vec_index(&self, index: Index) -> Option<usize> {
        if index.val() < self.base {
            return None;
        }
        let offset = (index.val() - self.base) as usize;
        if offset >= self.entries.len() {
            return None;
        }
        Some(offset)
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        self.entries.push(entry.into());

        Ok(Index::new(self.base + self.entries.len() as u64 - 1))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        let opt_entry = self
            .vec_index(index)
            .map(|i| E::from(self.entries[i].clone()));

        Ok(opt_entry)
    }

    fn read_between(&self, from_inclusive: Index, to_exclusive: Index) -> Result<Vec<E>, io::Error> {
        let mut result = Vec::new();
        let mut index = from_inclusive;
        while index < to_exclusive {
            match self.vec_index(index) {
                Some(i) => result.push(E::from(self.entries[i].clone())),
                None => break,
            }
            index = index.plus(1);
        }

        Ok(result)
    }

    fn truncate(&mut self, from_index: Index) -> Result<(), io::Error> {
        let new_len = from_index.val().saturating_sub(self.base) as usize;
        if new_len < self.entries.len() {
            slog::debug!(
                self.logger,
                "Truncating log from index={}, dropping {} entries",
                from_index,
                self.entries.len() - new_len
            );
            self.entries.truncate(new_len);
        }

        Ok(())
    }

    fn release(&mut self, up_to_inclusive: Index) -> Result<(), io::Error> {
        if up_to_inclusive.val() < self.base {
            return Ok(());
        }

        let num_released = std::cmp::min(
            (up_to_inclusive.val() - self.base + 1) as usize,
            self.entries.len(),
        );
        self.entries.drain(..num_released);
        self.base += num_released as u64;
        slog::debug!(
            self.logger,
            "Released {} log entries up to index={}",
            num_released,
            up_to_inclusive
        );

        Ok(())
    }

    fn next_index(&self) -> Index {
        Index::new(self.base + self.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct TestEntry(Vec<u8>);

    impl Entry for TestEntry {}

    impl From<Vec<u8>> for TestEntry {
        fn from(bytes: Vec<u8>) -> Self {
            TestEntry(bytes)
        }
    }

    impl From<TestEntry> for Vec<u8> {
        fn from(entry: TestEntry) -> Self {
            entry.0
        }
    }

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn entry(tag: u8) -> TestEntry {
        TestEntry(vec![tag])
    }

    #[test]
    fn append_assigns_contiguous_indices_from_one() {
        let mut log = InMemoryLog::create(test_logger()).unwrap();

        assert_eq!(log.next_index(), Index::new(1));
        assert_eq!(log.append(entry(b'a')).unwrap(), Index::new(1));
        assert_eq!(log.append(entry(b'b')).unwrap(), Index::new(2));
        assert_eq!(log.next_index(), Index::new(3));
    }

    #[test]
    fn read_returns_none_outside_log() {
        let mut log = InMemoryLog::create(test_logger()).unwrap();
        log.append(entry(b'a')).unwrap();

        assert_eq!(log.read(Index::ZERO).unwrap(), None);
        assert_eq!(log.read(Index::new(1)).unwrap(), Some(entry(b'a')));
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
    }

    #[test]
    fn read_between_is_ordered_and_clamped() {
        let mut log = InMemoryLog::create(test_logger()).unwrap();
        for tag in [b'a', b'b', b'c'] {
            log.append(entry(tag)).unwrap();
        }

        let read = log.read_between(Index::new(2), Index::new(9)).unwrap();
        assert_eq!(read, vec![entry(b'b'), entry(b'c')]);

        let empty = log.read_between(Index::new(2), Index::new(2)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn truncate_drops_suffix() {
        let mut log = InMemoryLog::create(test_logger()).unwrap();
        for tag in [b'a', b'b', b'c'] {
            log.append(entry(tag)).unwrap();
        }

        log.truncate(Index::new(2)).unwrap();
        assert_eq!(log.next_index(), Index::new(2));
        assert_eq!(log.read(Index::new(1)).unwrap(), Some(entry(b'a')));
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
    }

    #[test]
    fn release_keeps_indices_stable() {
        let mut log = InMemoryLog::create(test_logger()).unwrap();
        for tag in [b'a', b'b', b'c'] {
            log.append(entry(tag)).unwrap();
        }

        log.release(Index::new(2)).unwrap();
        assert_eq!(log.read(Index::new(1)).unwrap(), None);
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
        assert_eq!(log.read(Index::new(3)).unwrap(), Some(entry(b'c')));
        assert_eq!(log.next_index(), Index::new(4));

        // Appends continue from where the log left off.
        assert_eq!(log.append(entry(b'd')).unwrap(), Index::new(4));

        // Releasing an already-released prefix is a no-op.
        log.release(Index::new(1)).unwrap();
        assert_eq!(log.read(Index::new(3)).unwrap(), Some(entry(b'c')));
    }
}

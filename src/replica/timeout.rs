use rand::Rng;
use std::ops::Range;
use tokio::time::{Duration, Instant};

/// ElectionTimeoutGenerator produces the absolute deadline at which the next
/// election timeout fires. Implementations are consulted every time a replica
/// resets its election timer.
pub trait ElectionTimeoutGenerator: Send {
    fn next_election_deadline(&mut self) -> Instant;
}

/// Draws each timeout uniformly from `[min, max)`. The jitter is what keeps
/// simultaneous candidacies (split votes) rare.
pub struct RandomElectionTimeoutGenerator {
    timeout_range: Range<Duration>,
}

impl RandomElectionTimeoutGenerator {
    pub fn new(min_timeout: Duration, max_timeout: Duration) -> Self {
        RandomElectionTimeoutGenerator {
            timeout_range: min_timeout..max_timeout,
        }
    }
}

impl ElectionTimeoutGenerator for RandomElectionTimeoutGenerator {
    fn next_election_deadline(&mut self) -> Instant {
        let timeout = rand::thread_rng().gen_range(self.timeout_range.clone());
        Instant::now() + timeout
    }
}

/// Fires after the same fixed delay every time. No production deployment
/// wants this; tests use it to decide election winners deterministically.
pub struct FixedElectionTimeoutGenerator {
    timeout: Duration,
}

impl FixedElectionTimeoutGenerator {
    pub fn new(timeout: Duration) -> Self {
        FixedElectionTimeoutGenerator { timeout }
    }
}

impl ElectionTimeoutGenerator for FixedElectionTimeoutGenerator {
    fn next_election_deadline(&mut self) -> Instant {
        Instant::now() + self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_deadline_stays_in_range() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(200);
        let mut generator = RandomElectionTimeoutGenerator::new(min, max);

        for _ in 0..100 {
            let before = Instant::now();
            let deadline = generator.next_election_deadline();
            assert!(deadline >= before + min);
            assert!(deadline < Instant::now() + max);
        }
    }
}

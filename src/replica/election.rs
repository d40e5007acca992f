use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use crate::replica::timeout::ElectionTimeoutGenerator;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tokio::time::{Duration, Instant};

/// ElectionState tracks which of the three raft roles we are in, the state
/// that only exists for that role, and the timer deadlines. Role transitions
/// swap the inner variant, so candidate-only and leader-only state cannot
/// outlive the role that owns it.
pub struct ElectionState {
    logger: slog::Logger,
    state: State,
    next_election_deadline: Instant,
    heartbeat_interval: Duration,
    timeout_generator: Box<dyn ElectionTimeoutGenerator>,
}

impl ElectionState {
    /// Every replica starts out as a follower with no known leader.
    pub fn new_follower(
        logger: slog::Logger,
        heartbeat_interval: Duration,
        mut timeout_generator: Box<dyn ElectionTimeoutGenerator>,
    ) -> Self {
        let next_election_deadline = timeout_generator.next_election_deadline();
        ElectionState {
            logger,
            state: State::Follower(FollowerState { leader_id: None }),
            next_election_deadline,
            heartbeat_interval,
            timeout_generator,
        }
    }

    /// The instant the event loop should wake up if no message arrives first:
    /// a leader wakes to send heartbeats, everyone else wakes to start an
    /// election.
    pub fn next_deadline(&self) -> Instant {
        match &self.state {
            State::Leader(leader) => leader.next_heartbeat,
            _ => self.next_election_deadline,
        }
    }

    pub fn reset_election_deadline(&mut self) {
        self.next_election_deadline = self.timeout_generator.next_election_deadline();
    }

    pub fn reset_heartbeat_deadline(&mut self) {
        let deadline = Instant::now() + self.heartbeat_interval;
        if let State::Leader(leader) = &mut self.state {
            leader.next_heartbeat = deadline;
        }
    }

    pub fn current_leader(&self) -> CurrentLeader {
        match &self.state {
            State::Leader(_) => CurrentLeader::Me,
            State::Candidate(_) => CurrentLeader::Unknown,
            State::Follower(FollowerState { leader_id: None }) => CurrentLeader::Unknown,
            State::Follower(FollowerState {
                leader_id: Some(leader_id),
            }) => CurrentLeader::Other(*leader_id),
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(super) fn leader_mut(&mut self) -> Option<&mut LeaderState> {
        match &mut self.state {
            State::Leader(leader) => Some(leader),
            _ => None,
        }
    }

    /// Accept `leader_id` as the leader we follow. Forces the follower role
    /// from any other role; as an existing follower only the leader record
    /// changes.
    pub fn follow_leader(&mut self, leader_id: ReplicaId) {
        if let State::Follower(follower) = &mut self.state {
            if follower.leader_id != Some(leader_id) {
                follower.leader_id = Some(leader_id);
                slog::info!(self.logger, "Following leader {}", leader_id);
            }
            return;
        }

        self.log_transition("Follower", "recognized current leader");
        self.state = State::Follower(FollowerState {
            leader_id: Some(leader_id),
        });
        self.reset_election_deadline();
    }

    /// Fall back to follower with no known leader, typically after observing
    /// a higher term. A no-op for a replica that is already a follower; its
    /// last known leader remains the best redirect hint we have.
    pub fn step_down(&mut self, reason: &str) {
        if let State::Follower(_) = self.state {
            return;
        }

        self.log_transition("Follower", reason);
        self.state = State::Follower(FollowerState { leader_id: None });
        self.reset_election_deadline();
    }

    /// Open a fresh candidacy for `term`, voting for ourself. Re-entering
    /// from an existing candidacy discards the previous vote tally.
    pub fn transition_to_candidate(&mut self, term: Term, me: ReplicaId) {
        self.log_transition("Candidate", "election timeout");
        let mut received_votes_from = HashSet::new();
        received_votes_from.insert(me);
        self.state = State::Candidate(CandidateState {
            term,
            received_votes_from,
        });
    }

    /// `add_received_vote_if_candidate()` returns the number of unique votes
    /// we've received after adding the provided `vote_from`. Returns 0 when
    /// we are not a candidate in `term`; votes from older elections count for
    /// nothing.
    pub fn add_received_vote_if_candidate(&mut self, term: Term, vote_from: ReplicaId) -> usize {
        if let State::Candidate(candidate) = &mut self.state {
            if candidate.term == term {
                candidate.received_votes_from.insert(vote_from);
                return candidate.received_votes_from.len();
            }
        }

        0
    }

    /// Promote to leader, initializing the per-peer replication tables:
    /// `next_index` for every peer starts at `next_index_fill` (one past our
    /// last log entry) and the commit tally starts empty. Returns false if we
    /// were already leader (a late majority vote changes nothing).
    pub fn transition_to_leader(&mut self, peers: &[ReplicaId], next_index_fill: Index) -> bool {
        if let State::Leader(_) = self.state {
            return false;
        }

        self.log_transition("Leader", "won the election");
        let next_index = peers.iter().map(|peer| (*peer, next_index_fill)).collect();
        self.state = State::Leader(LeaderState {
            next_index,
            tally: CommitTally::new(),
            next_heartbeat: Instant::now(),
        });

        true
    }

    fn role_name(&self) -> &'static str {
        match self.state {
            State::Follower(_) => "Follower",
            State::Candidate(_) => "Candidate",
            State::Leader(_) => "Leader",
        }
    }

    fn log_transition(&self, new_role: &str, reason: &str) {
        slog::info!(
            self.logger,
            "Changing from role {} to role {}, reason: {}",
            self.role_name(),
            new_role,
            reason
        );
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(candidate) => write!(f, "Candidate(Term={})", candidate.term),
            State::Follower(FollowerState {
                leader_id: Some(leader_id),
            }) => write!(f, "Follower(Leader={})", leader_id),
            State::Follower(FollowerState { leader_id: None }) => {
                write!(f, "Follower(Leader=None)")
            }
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum CurrentLeader {
    Me,
    Other(ReplicaId),
    Unknown,
}

enum State {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

struct FollowerState {
    leader_id: Option<ReplicaId>,
}

struct CandidateState {
    term: Term,
    received_votes_from: HashSet<ReplicaId>,
}

pub(super) struct LeaderState {
    next_index: HashMap<ReplicaId, Index>,
    tally: CommitTally,
    next_heartbeat: Instant,
}

impl LeaderState {
    pub(super) fn next_index_for(&self, peer: ReplicaId) -> Index {
        *self
            .next_index
            .get(&peer)
            .expect("peer missing from leader's next_index table")
    }

    pub(super) fn set_next_index(&mut self, peer: ReplicaId, index: Index) {
        self.next_index.insert(peer, index);
    }

    /// One-at-a-time backoff after a log-mismatch rejection. Never drops
    /// below 1, the index of the first possible entry.
    pub(super) fn decrement_next_index(&mut self, peer: ReplicaId) {
        let current = self.next_index_for(peer);
        if current > Index::new(1) {
            self.next_index.insert(peer, current.minus(1));
        }
    }

    pub(super) fn record_ack(&mut self, index: Index) -> usize {
        self.tally.record(index)
    }

    pub(super) fn clear_acks_up_to(&mut self, index: Index) {
        self.tally.clear_up_to(index)
    }
}

/// CommitTally counts how many replicas (including the leader itself) have
/// acknowledged each not-yet-committed index. Once an index reaches a
/// majority and commits, everything at or below it is dropped.
struct CommitTally {
    acks: BTreeMap<Index, usize>,
}

impl CommitTally {
    fn new() -> Self {
        CommitTally {
            acks: BTreeMap::new(),
        }
    }

    fn record(&mut self, index: Index) -> usize {
        let count = self.acks.entry(index).or_insert(0);
        *count += 1;
        *count
    }

    fn clear_up_to(&mut self, index: Index) {
        self.acks = self.acks.split_off(&index.plus(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::timeout::FixedElectionTimeoutGenerator;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn new_election_state() -> ElectionState {
        ElectionState::new_follower(
            test_logger(),
            Duration::from_millis(100),
            Box::new(FixedElectionTimeoutGenerator::new(Duration::from_millis(500))),
        )
    }

    fn peers() -> Vec<ReplicaId> {
        vec![ReplicaId::new(1), ReplicaId::new(2)]
    }

    #[test]
    fn starts_as_follower_with_unknown_leader() {
        let state = new_election_state();
        assert_eq!(state.current_leader(), CurrentLeader::Unknown);
        assert!(!state.is_leader());
    }

    #[test]
    fn votes_from_same_peer_count_once() {
        let mut state = new_election_state();
        let me = ReplicaId::new(0);
        state.transition_to_candidate(Term::new(1), me);

        assert_eq!(
            state.add_received_vote_if_candidate(Term::new(1), ReplicaId::new(1)),
            2
        );
        assert_eq!(
            state.add_received_vote_if_candidate(Term::new(1), ReplicaId::new(1)),
            2
        );
    }

    #[test]
    fn votes_for_other_terms_count_for_nothing() {
        let mut state = new_election_state();
        state.transition_to_candidate(Term::new(2), ReplicaId::new(0));

        assert_eq!(
            state.add_received_vote_if_candidate(Term::new(1), ReplicaId::new(1)),
            0
        );
    }

    #[test]
    fn re_entering_candidacy_resets_the_tally() {
        let mut state = new_election_state();
        let me = ReplicaId::new(0);
        state.transition_to_candidate(Term::new(1), me);
        state.add_received_vote_if_candidate(Term::new(1), ReplicaId::new(1));

        state.transition_to_candidate(Term::new(2), me);
        assert_eq!(
            state.add_received_vote_if_candidate(Term::new(2), ReplicaId::new(2)),
            2
        );
    }

    #[test]
    fn becoming_leader_twice_is_a_no_op() {
        let mut state = new_election_state();
        state.transition_to_candidate(Term::new(1), ReplicaId::new(0));

        assert!(state.transition_to_leader(&peers(), Index::new(5)));
        assert!(!state.transition_to_leader(&peers(), Index::new(5)));
        assert_eq!(state.current_leader(), CurrentLeader::Me);
    }

    #[test]
    fn leader_tables_start_at_fill_index() {
        let mut state = new_election_state();
        state.transition_to_candidate(Term::new(1), ReplicaId::new(0));
        state.transition_to_leader(&peers(), Index::new(4));

        let leader = state.leader_mut().unwrap();
        assert_eq!(leader.next_index_for(ReplicaId::new(1)), Index::new(4));
        assert_eq!(leader.next_index_for(ReplicaId::new(2)), Index::new(4));
    }

    #[test]
    fn next_index_never_drops_below_one() {
        let mut state = new_election_state();
        state.transition_to_candidate(Term::new(1), ReplicaId::new(0));
        state.transition_to_leader(&peers(), Index::new(2));

        let leader = state.leader_mut().unwrap();
        let peer = ReplicaId::new(1);
        leader.decrement_next_index(peer);
        assert_eq!(leader.next_index_for(peer), Index::new(1));
        leader.decrement_next_index(peer);
        assert_eq!(leader.next_index_for(peer), Index::new(1));
    }

    #[test]
    fn step_down_clears_leader_only_state() {
        let mut state = new_election_state();
        state.transition_to_candidate(Term::new(1), ReplicaId::new(0));
        state.transition_to_leader(&peers(), Index::new(1));

        state.step_down("observed higher term");
        assert!(state.leader_mut().is_none());
        assert_eq!(state.current_leader(), CurrentLeader::Unknown);
    }

    #[test]
    fn step_down_keeps_known_leader_for_redirects() {
        let mut state = new_election_state();
        state.follow_leader(ReplicaId::new(2));

        state.step_down("observed higher term");
        assert_eq!(state.current_leader(), CurrentLeader::Other(ReplicaId::new(2)));
    }

    #[test]
    fn tally_counts_and_clears() {
        let mut tally = CommitTally::new();
        assert_eq!(tally.record(Index::new(3)), 1);
        assert_eq!(tally.record(Index::new(3)), 2);
        assert_eq!(tally.record(Index::new(4)), 1);

        tally.clear_up_to(Index::new(3));
        // Index 4 survives the clear; index 3 starts over.
        assert_eq!(tally.record(Index::new(4)), 2);
        assert_eq!(tally.record(Index::new(3)), 1);
    }
}

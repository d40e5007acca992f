use crate::replica::peers::ReplicaId;
use std::fmt;

/// Term is a raft election epoch. Terms increase monotonically; there is at
/// most one leader per term.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }

    pub fn plus(self, delta: u64) -> Term {
        Term(self.0 + delta)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState is used whenever the raft algorithm requires that
/// something is persisted to a durable store to guarantee safety. Not
/// everything that uses disk has to go through this, only the
/// algorithm-correctness-critical term and vote.
///
/// Mutators are expressed as compare-and-set operations so an implementation
/// backed by shared storage can stay race-free.
pub trait PersistentLocalState {
    /// Stores the new term if it is greater than the current term and returns
    /// true. A stored term increase always discards the vote from the older
    /// term.
    fn store_term_if_increased(&mut self, new_term: Term) -> bool;

    /// Records a vote for `vote` if we are still on `expected_term` and have
    /// not yet voted this term. Returns true if the vote was recorded.
    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> bool;

    /// Atomically bumps the term by one and votes for ourself, returning the
    /// new term. Used when starting an election.
    fn increment_term_and_vote_for_self(&mut self) -> Term;

    fn current_term(&self) -> Term;

    /// Reads term and vote as one atomic action.
    fn voted_for_current_term(&self) -> (Term, Option<ReplicaId>);
}

/// In-memory implementation. It models the required semantics without the
/// durability; a restart of a replica backed by this type is a new replica.
pub struct InMemoryLocalState {
    me: ReplicaId,
    current_term: Term,
    voted_for_this_term: Option<ReplicaId>,
}

impl InMemoryLocalState {
    pub fn new(me: ReplicaId) -> Self {
        InMemoryLocalState {
            me,
            current_term: Term::new(0),
            voted_for_this_term: None,
        }
    }
}

impl PersistentLocalState for InMemoryLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.current_term {
            return false;
        }

        self.current_term = new_term;
        self.voted_for_this_term = None;
        true
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> bool {
        if expected_term == self.current_term && self.voted_for_this_term.is_none() {
            self.voted_for_this_term = Some(vote);
            return true;
        }

        false
    }

    fn increment_term_and_vote_for_self(&mut self) -> Term {
        self.current_term = self.current_term.plus(1);
        self.voted_for_this_term = Some(self.me);
        self.current_term
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<ReplicaId>) {
        (self.current_term, self.voted_for_this_term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_increase_discards_vote() {
        let mut state = InMemoryLocalState::new(ReplicaId::new(0));
        assert!(state.store_vote_for_term_if_unvoted(Term::new(0), ReplicaId::new(1)));

        assert!(state.store_term_if_increased(Term::new(3)));
        assert_eq!(state.voted_for_current_term(), (Term::new(3), None));
    }

    #[test]
    fn term_never_decreases() {
        let mut state = InMemoryLocalState::new(ReplicaId::new(0));
        assert!(state.store_term_if_increased(Term::new(5)));

        assert!(!state.store_term_if_increased(Term::new(4)));
        assert!(!state.store_term_if_increased(Term::new(5)));
        assert_eq!(state.current_term(), Term::new(5));
    }

    #[test]
    fn at_most_one_vote_per_term() {
        let mut state = InMemoryLocalState::new(ReplicaId::new(0));
        state.store_term_if_increased(Term::new(1));

        assert!(state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new(1)));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new(2)));
        assert_eq!(
            state.voted_for_current_term(),
            (Term::new(1), Some(ReplicaId::new(1)))
        );
    }

    #[test]
    fn vote_for_stale_term_is_refused() {
        let mut state = InMemoryLocalState::new(ReplicaId::new(0));
        state.store_term_if_increased(Term::new(2));

        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new(1)));
        assert_eq!(state.voted_for_current_term(), (Term::new(2), None));
    }

    #[test]
    fn starting_an_election_votes_for_self() {
        let me = ReplicaId::new(7);
        let mut state = InMemoryLocalState::new(me);
        state.store_term_if_increased(Term::new(4));

        let new_term = state.increment_term_and_vote_for_self();
        assert_eq!(new_term, Term::new(5));
        assert_eq!(state.voted_for_current_term(), (Term::new(5), Some(me)));
    }
}

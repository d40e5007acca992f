use crate::commitlog::{Index, Log};
use crate::dispatch::MessageDispatcher;
use crate::replica::commit_log::{RaftLog, RaftLogEntry};
use crate::replica::election::{CurrentLeader, ElectionState};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::messages::{
    AppendEntriesRequest, AppendEntriesResponse, NewEntryRequest, NewEntryResponse,
    RequestVoteRequest, RequestVoteResponse, RpcMessage,
};
use crate::replica::peers::Cluster;
use crate::replica::state_machine::StateMachine;
use crate::replica::timeout::ElectionTimeoutGenerator;
use std::cmp;
use std::io;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub struct ReplicaConfig<L, P, M>
where
    L: Log<RaftLogEntry>,
    P: PersistentLocalState,
    M: StateMachine,
{
    pub logger: slog::Logger,
    pub cluster: Cluster,
    pub log: L,
    pub local_state: P,
    pub state_machine: M,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub election_timeout_generator: Box<dyn ElectionTimeoutGenerator>,
    pub leader_heartbeat_duration: Duration,
}

/// Fatal conditions only. Protocol-level rejections (stale terms, log
/// mismatches, refused votes) travel inside response messages and are never
/// errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// The persistent log failed underneath us. Continuing could diverge our
    /// state from what we acknowledged, so the replica halts.
    #[error("commit log I/O failure: {0}")]
    LogIo(#[from] io::Error),
}

/// A single raft replica: one member of the cluster, driven entirely by its
/// event loop. Handlers mutate local state and emit messages through the
/// dispatcher; they never block on remote replicas.
pub struct Replica<L, P, M>
where
    L: Log<RaftLogEntry>,
    P: PersistentLocalState,
    M: StateMachine,
{
    logger: slog::Logger,
    cluster: Cluster,
    local_state: P,
    commit_log: RaftLog<L>,
    state_machine: M,
    election_state: ElectionState,
    dispatcher: Arc<dyn MessageDispatcher>,
}

impl<L, P, M> Replica<L, P, M>
where
    L: Log<RaftLogEntry> + 'static,
    P: PersistentLocalState + 'static,
    M: StateMachine + 'static,
{
    pub fn new(config: ReplicaConfig<L, P, M>) -> Self {
        let election_state = ElectionState::new_follower(
            config.logger.clone(),
            config.leader_heartbeat_duration,
            config.election_timeout_generator,
        );
        let commit_log = RaftLog::new(config.logger.clone(), config.log);

        Replica {
            logger: config.logger,
            cluster: config.cluster,
            local_state: config.local_state,
            commit_log,
            state_machine: config.state_machine,
            election_state,
            dispatcher: config.dispatcher,
        }
    }

    /// The instant at which, absent any inbound message, the next timer
    /// action is due.
    pub fn next_deadline(&self) -> Instant {
        self.election_state.next_deadline()
    }

    /// Entry point for one inbound message: reconcile terms, dispatch to the
    /// kind-specific handler, then drain whatever became committed into the
    /// state machine.
    pub fn handle_message(&mut self, message: RpcMessage) -> Result<(), ReplicaError> {
        if let Some(term) = message.term() {
            self.reconcile_term(term);
        }

        match message {
            RpcMessage::AppendEntries(request) => self.handle_append_entries(request)?,
            RpcMessage::AppendEntriesResult(response) => {
                self.handle_append_entries_result(response)?
            }
            RpcMessage::RequestVote(request) => self.handle_request_vote(request)?,
            RpcMessage::RequestVoteResult(response) => self.handle_request_vote_result(response)?,
            RpcMessage::NewEntry(request) => self.handle_new_entry(request)?,
            RpcMessage::NewEntryResult(response) => {
                slog::warn!(
                    self.logger,
                    "Dropping client-bound response delivered to a replica: {:?}",
                    response
                );
            }
        }

        self.update_state_machine()
    }

    /// The event loop's poll deadline expired: a leader owes its followers a
    /// heartbeat, anyone else has waited long enough to suspect the leader is
    /// gone.
    pub fn handle_timer_expired(&mut self) -> Result<(), ReplicaError> {
        if self.election_state.is_leader() {
            self.send_append_entries_round(false)
        } else {
            self.start_election()
        }
    }

    // > If RPC request or response contains term T > currentTerm:
    // > set currentTerm = T, convert to follower (§5.1)
    fn reconcile_term(&mut self, observed_term: Term) {
        if self.local_state.store_term_if_increased(observed_term) {
            slog::info!(
                self.logger,
                "Updating term to {} to match higher term seen on another replica",
                observed_term
            );
            self.election_state.step_down("observed higher term");
        }
    }

    fn handle_append_entries(&mut self, request: AppendEntriesRequest) -> Result<(), ReplicaError> {
        if !self.cluster.contains_member(request.source) {
            slog::warn!(
                self.logger,
                "Dropping AppendEntries from unknown replica {}",
                request.source
            );
            return Ok(());
        }

        let current_term = self.local_state.current_term();

        // > 1. Reply false if term < currentTerm (§5.1)
        if request.term < current_term {
            self.respond_append_entries(&request, current_term, false);
            return Ok(());
        }

        // Reconciliation has run: a non-stale leader's term equals ours now.
        // Whatever we were doing, this term has a live leader to follow.
        self.election_state.follow_leader(request.source);
        self.election_state.reset_election_deadline();

        // > 2. Reply false if log doesn't contain an entry at prevLogIndex
        // > whose term matches prevLogTerm (§5.3)
        match self.commit_log.term_at(request.prev_log_index)? {
            Some(term) if term == request.prev_log_term => {}
            _ => {
                slog::debug!(
                    self.logger,
                    "Rejecting AppendEntries: no local entry matching index={} term={}",
                    request.prev_log_index,
                    request.prev_log_term
                );
                self.respond_append_entries(&request, current_term, false);
                return Ok(());
            }
        }

        // > 3. If an existing entry conflicts with a new one (same index but
        // > different terms), delete the existing entry and all that follow
        // > it (§5.3)
        // > 4. Append any new entries not already in the log
        let last_matched_index = if request.entries.is_empty() {
            request.prev_log_index
        } else {
            self.commit_log.delete_conflicting_and_append(&request.entries)?
        };

        // > 5. If leaderCommit > commitIndex, set commitIndex =
        // > min(leaderCommit, index of last new entry)
        if request.leader_commit > self.commit_log.commit_index() {
            let new_commit_index = cmp::min(request.leader_commit, last_matched_index);
            self.commit_log.ratchet_fwd_commit_index(new_commit_index);
        }

        self.respond_append_entries(&request, current_term, true);
        Ok(())
    }

    fn respond_append_entries(
        &self,
        request: &AppendEntriesRequest,
        term: Term,
        success: bool,
    ) {
        self.dispatcher.send_response(
            request.source,
            AppendEntriesResponse {
                source: self.cluster.me(),
                term,
                success,
                prev_log_index: request.prev_log_index,
                entry_count: request.entries.len(),
            }
            .into(),
        );
    }

    fn handle_append_entries_result(
        &mut self,
        response: AppendEntriesResponse,
    ) -> Result<(), ReplicaError> {
        if !self.cluster.contains_member(response.source) {
            return Ok(());
        }

        // A response from an older term says nothing about requests we sent
        // in this one. (A *newer* term already demoted us in reconciliation.)
        let current_term = self.local_state.current_term();
        if response.term != current_term || !self.election_state.is_leader() {
            return Ok(());
        }

        if !response.success {
            // > After a rejection, the leader decrements nextIndex and
            // > retries the AppendEntries RPC (§5.3)
            if let Some(leader) = self.election_state.leader_mut() {
                leader.decrement_next_index(response.source);
            }
            return Ok(());
        }

        if response.entry_count == 0 {
            // Heartbeat ack; nothing new was replicated.
            return Ok(());
        }

        let last_acked_index = response.prev_log_index.plus(response.entry_count as u64);
        if let Some(leader) = self.election_state.leader_mut() {
            if leader.next_index_for(response.source) > last_acked_index {
                // Duplicate of an ack we already counted.
                return Ok(());
            }
            leader.set_next_index(response.source, last_acked_index.plus(1));
        }

        self.record_acks_and_advance_commit(response.prev_log_index.plus(1), last_acked_index)
    }

    /// Tally one acknowledgement for each index in the inclusive range, in
    /// ascending order, committing every index that reaches a majority.
    fn record_acks_and_advance_commit(
        &mut self,
        from_inclusive: Index,
        to_inclusive: Index,
    ) -> Result<(), ReplicaError> {
        let majority_size = self.cluster.majority_size();
        let current_term = self.local_state.current_term();

        let mut index = cmp::max(from_inclusive, self.commit_log.commit_index().plus(1));
        while index <= to_inclusive {
            let ack_count = match self.election_state.leader_mut() {
                Some(leader) => leader.record_ack(index),
                None => return Ok(()),
            };

            // > Raft never commits log entries from previous terms by
            // > counting replicas; only log entries from the leader's current
            // > term are committed by counting replicas (§5.4.2)
            if ack_count >= majority_size && self.commit_log.term_at(index)? == Some(current_term)
            {
                slog::info!(
                    self.logger,
                    "Log index={} has been persisted by a majority and is committed",
                    index
                );
                self.commit_log.ratchet_fwd_commit_index(index);
                if let Some(leader) = self.election_state.leader_mut() {
                    leader.clear_acks_up_to(index);
                }
            }

            index = index.plus(1);
        }

        Ok(())
    }

    fn handle_request_vote(&mut self, request: RequestVoteRequest) -> Result<(), ReplicaError> {
        if !self.cluster.contains_member(request.source) {
            slog::warn!(
                self.logger,
                "Dropping RequestVote from unknown replica {}",
                request.source
            );
            return Ok(());
        }

        // Read our term/vote state as one atomic action.
        let (current_term, opt_voted_for) = self.local_state.voted_for_current_term();

        let mut vote_granted = false;
        // A stale candidate (term < ours) is refused with our term so it can
        // catch up. After reconciliation a live candidacy equals our term.
        if request.term == current_term {
            // > If votedFor is null or candidateId, and candidate's log is at
            // > least as up-to-date as receiver's log, grant vote (§5.2, §5.4)
            let can_vote_for_candidate = match opt_voted_for {
                None => true,
                Some(voted_for) => voted_for == request.source,
            };
            if can_vote_for_candidate && self.is_candidate_log_up_to_date(&request)? {
                vote_granted = self
                    .local_state
                    .store_vote_for_term_if_unvoted(current_term, request.source);
            }
        }

        if vote_granted {
            slog::info!(
                self.logger,
                "Voting for candidate {} in term {}",
                request.source,
                current_term
            );
            // Granting a vote is a reason to keep waiting; refusing is not.
            self.election_state.reset_election_deadline();
        }

        self.dispatcher.send_response(
            request.source,
            RequestVoteResponse {
                source: self.cluster.me(),
                term: current_term,
                vote_granted,
            }
            .into(),
        );

        Ok(())
    }

    // > Raft determines which of two logs is more up-to-date by comparing
    // > the index and term of the last entries in the logs. If the logs have
    // > last entries with different terms, then the log with the later term
    // > is more up-to-date. If the logs end with the same term, then
    // > whichever log is longer is more up-to-date. (§5.4.1)
    fn is_candidate_log_up_to_date(&self, request: &RequestVoteRequest) -> Result<bool, io::Error> {
        let (my_last_term, my_last_index) = self.commit_log.latest_entry()?;

        Ok(request.last_log_term > my_last_term
            || (request.last_log_term == my_last_term && request.last_log_index >= my_last_index))
    }

    fn handle_request_vote_result(
        &mut self,
        response: RequestVoteResponse,
    ) -> Result<(), ReplicaError> {
        if !self.cluster.contains_member(response.source) {
            return Ok(());
        }

        let current_term = self.local_state.current_term();
        if response.term != current_term || !response.vote_granted {
            return Ok(());
        }

        let votes_received = self
            .election_state
            .add_received_vote_if_candidate(current_term, response.source);
        if votes_received >= self.cluster.majority_size() {
            self.become_leader()?;
        }

        Ok(())
    }

    fn handle_new_entry(&mut self, request: NewEntryRequest) -> Result<(), ReplicaError> {
        match self.election_state.current_leader() {
            CurrentLeader::Me => {
                // > If command received from client: append entry to local
                // > log (§5.3). Commit notification reaches the client out of
                // > band, e.g. through its state machine.
                let term = self.local_state.current_term();
                let new_index = self.commit_log.append_new(term, request.data)?;
                slog::info!(
                    self.logger,
                    "Accepted new log entry, index={} term={}",
                    new_index,
                    term
                );

                self.dispatcher.send_response(
                    request.source,
                    NewEntryResponse {
                        source: self.cluster.me(),
                        accepted: true,
                        leader_redirect: None,
                    }
                    .into(),
                );

                // The leader itself counts as one of the replicas holding
                // the entry.
                self.record_acks_and_advance_commit(new_index, new_index)?;
                self.send_append_entries_round(false)?;
            }
            CurrentLeader::Other(leader_id) => {
                slog::info!(
                    self.logger,
                    "Redirecting new entry request to current leader {}",
                    leader_id
                );
                self.dispatcher.send_response(
                    request.source,
                    NewEntryResponse {
                        source: self.cluster.me(),
                        accepted: false,
                        leader_redirect: Some(leader_id),
                    }
                    .into(),
                );
            }
            CurrentLeader::Unknown => {
                self.dispatcher.send_response(
                    request.source,
                    NewEntryResponse {
                        source: self.cluster.me(),
                        accepted: false,
                        leader_redirect: None,
                    }
                    .into(),
                );
            }
        }

        Ok(())
    }

    fn start_election(&mut self) -> Result<(), ReplicaError> {
        // > On conversion to candidate: increment currentTerm, vote for
        // > self, reset election timer, send RequestVote to all other
        // > servers (§5.2)
        let new_term = self.local_state.increment_term_and_vote_for_self();
        slog::info!(self.logger, "Starting election for term {}", new_term);
        self.election_state
            .transition_to_candidate(new_term, self.cluster.me());

        let (last_log_term, last_log_index) = self.commit_log.latest_entry()?;
        let request = RequestVoteRequest {
            source: self.cluster.me(),
            term: new_term,
            last_log_index,
            last_log_term,
        };
        for peer_id in self.cluster.peer_ids() {
            self.dispatcher
                .send_request(*peer_id, request.clone().into());
        }

        self.election_state.reset_election_deadline();

        // A cluster of one is its own majority.
        if self.cluster.majority_size() <= 1 {
            self.become_leader()?;
        }

        Ok(())
    }

    fn become_leader(&mut self) -> Result<(), ReplicaError> {
        let (_, last_log_index) = self.commit_log.latest_entry()?;
        let became_leader = self
            .election_state
            .transition_to_leader(self.cluster.peer_ids(), last_log_index.plus(1));

        if became_leader {
            // Announce leadership immediately rather than waiting out a
            // heartbeat interval.
            self.send_append_entries_round(true)?;
        }

        Ok(())
    }

    /// One replication round: an AppendEntries request to every peer.
    /// `heartbeat_only` forces empty payloads (used to announce a fresh
    /// leadership); otherwise each peer gets everything from its `next_index`
    /// through the end of our log, which for a caught-up peer is also empty.
    fn send_append_entries_round(&mut self, heartbeat_only: bool) -> Result<(), ReplicaError> {
        let current_term = self.local_state.current_term();
        let commit_index = self.commit_log.commit_index();
        let (_, last_log_index) = self.commit_log.latest_entry()?;
        let snapshot = self.commit_log.snapshot();

        for peer_id in self.cluster.peer_ids().to_vec() {
            let mut next_index = match self.election_state.leader_mut() {
                Some(leader) => leader.next_index_for(peer_id),
                None => return Ok(()),
            };

            // A peer whose next_index fell behind our compacted prefix can't
            // be served entry-by-entry any more. Restart it at the first
            // retained entry; the snapshot boundary answers the consistency
            // check.
            if let Some(snapshot) = snapshot {
                if next_index <= snapshot.index {
                    slog::warn!(
                        self.logger,
                        "Peer {} next_index={} is behind the compacted log; restarting it at index={}",
                        peer_id,
                        next_index,
                        snapshot.index.plus(1)
                    );
                    next_index = snapshot.index.plus(1);
                    if let Some(leader) = self.election_state.leader_mut() {
                        leader.set_next_index(peer_id, next_index);
                    }
                }
            }

            let prev_log_index = next_index.minus(1);
            let prev_log_term = self
                .commit_log
                .term_at(prev_log_index)?
                .expect("log entry preceding a peer's next_index must exist");

            let entries = if heartbeat_only || next_index > last_log_index {
                Vec::new()
            } else {
                self.commit_log
                    .entries_between(next_index, last_log_index.plus(1))?
            };

            if entries.is_empty() {
                slog::debug!(self.logger, "Sending heartbeat to peer {}", peer_id);
            } else {
                slog::info!(
                    self.logger,
                    "Sending AppendEntries with {} entries to peer {}",
                    entries.len(),
                    peer_id
                );
            }

            self.dispatcher.send_request(
                peer_id,
                AppendEntriesRequest {
                    source: self.cluster.me(),
                    term: current_term,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: commit_index,
                }
                .into(),
            );
        }

        self.election_state.reset_heartbeat_deadline();
        Ok(())
    }

    // > If commitIndex > lastApplied: increment lastApplied, apply
    // > log[lastApplied] to state machine (§5.3)
    fn update_state_machine(&mut self) -> Result<(), ReplicaError> {
        let commit_index = self.commit_log.commit_index();
        let last_applied = self.state_machine.last_applied_index();
        if commit_index <= last_applied {
            return Ok(());
        }

        let to_apply = self
            .commit_log
            .entries_between(last_applied.plus(1), commit_index.plus(1))?;
        self.state_machine.apply_all(to_apply);

        // The state machine decides when a snapshot exists; we only garbage
        // collect the log behind it.
        let previous_snapshot = self.commit_log.snapshot();
        if let Some(snapshot) = self.state_machine.latest_snapshot() {
            let is_newer = previous_snapshot.map_or(true, |prev| snapshot.index > prev.index);
            if is_newer {
                self.commit_log.release_up_to_and_including(snapshot)?;
            }
        }

        Ok(())
    }
}

use crate::commitlog::Index;
use crate::replica::commit_log::RaftLogEntry;
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use bytes::Bytes;

/// RpcMessage is every kind of message a replica can receive, as one tagged
/// sum so that handling is a single exhaustive match. Every message carries
/// the id of the peer (or client) that sent it.
#[derive(Debug, Clone)]
pub enum RpcMessage {
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResult(AppendEntriesResponse),
    RequestVote(RequestVoteRequest),
    RequestVoteResult(RequestVoteResponse),
    NewEntry(NewEntryRequest),
    NewEntryResult(NewEntryResponse),
}

impl RpcMessage {
    /// The raft term carried by the message, if any. Client messages carry no
    /// term and skip term reconciliation.
    pub fn term(&self) -> Option<Term> {
        match self {
            RpcMessage::AppendEntries(req) => Some(req.term),
            RpcMessage::AppendEntriesResult(resp) => Some(resp.term),
            RpcMessage::RequestVote(req) => Some(req.term),
            RpcMessage::RequestVoteResult(resp) => Some(resp.term),
            RpcMessage::NewEntry(_) => None,
            RpcMessage::NewEntryResult(_) => None,
        }
    }

    pub fn source(&self) -> ReplicaId {
        match self {
            RpcMessage::AppendEntries(req) => req.source,
            RpcMessage::AppendEntriesResult(resp) => resp.source,
            RpcMessage::RequestVote(req) => req.source,
            RpcMessage::RequestVoteResult(resp) => resp.source,
            RpcMessage::NewEntry(req) => req.source,
            RpcMessage::NewEntryResult(resp) => resp.source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppendEntriesRequest {
    pub source: ReplicaId,
    pub term: Term,
    /// Index of the entry immediately preceding `entries`; 0 when the batch
    /// starts at the beginning of the log.
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    /// Empty for a heartbeat.
    pub entries: Vec<RaftLogEntry>,
    pub leader_commit: Index,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesResponse {
    pub source: ReplicaId,
    pub term: Term,
    pub success: bool,
    /// Echo of the request, so the leader knows which indices a success
    /// acknowledges: `(prev_log_index, prev_log_index + entry_count]`.
    pub prev_log_index: Index,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct RequestVoteRequest {
    pub source: ReplicaId,
    pub term: Term,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Debug, Clone)]
pub struct RequestVoteResponse {
    pub source: ReplicaId,
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone)]
pub struct NewEntryRequest {
    pub source: ReplicaId,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct NewEntryResponse {
    pub source: ReplicaId,
    /// True iff the replica was leader and appended the entry. Commit
    /// notification reaches the client out of band (e.g. through its state
    /// machine).
    pub accepted: bool,
    /// On refusal, the last known leader to retry against; None when no
    /// leader is known and the client should retry after a delay.
    pub leader_redirect: Option<ReplicaId>,
}

impl From<AppendEntriesRequest> for RpcMessage {
    fn from(req: AppendEntriesRequest) -> Self {
        RpcMessage::AppendEntries(req)
    }
}

impl From<AppendEntriesResponse> for RpcMessage {
    fn from(resp: AppendEntriesResponse) -> Self {
        RpcMessage::AppendEntriesResult(resp)
    }
}

impl From<RequestVoteRequest> for RpcMessage {
    fn from(req: RequestVoteRequest) -> Self {
        RpcMessage::RequestVote(req)
    }
}

impl From<RequestVoteResponse> for RpcMessage {
    fn from(resp: RequestVoteResponse) -> Self {
        RpcMessage::RequestVoteResult(resp)
    }
}

impl From<NewEntryRequest> for RpcMessage {
    fn from(req: NewEntryRequest) -> Self {
        RpcMessage::NewEntry(req)
    }
}

impl From<NewEntryResponse> for RpcMessage {
    fn from(resp: NewEntryResponse) -> Self {
        RpcMessage::NewEntryResult(resp)
    }
}

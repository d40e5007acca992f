mod commit_log;
mod election;
mod local_state;
mod messages;
mod peers;
mod replica;
mod state_machine;
mod timeout;

pub use commit_log::RaftLogEntry;
pub use election::CurrentLeader;
pub use local_state::InMemoryLocalState;
pub use local_state::PersistentLocalState;
pub use local_state::Term;
pub use messages::AppendEntriesRequest;
pub use messages::AppendEntriesResponse;
pub use messages::NewEntryRequest;
pub use messages::NewEntryResponse;
pub use messages::RequestVoteRequest;
pub use messages::RequestVoteResponse;
pub use messages::RpcMessage;
pub use peers::Cluster;
pub use peers::InvalidCluster;
pub use peers::ReplicaId;
pub use replica::Replica;
pub use replica::ReplicaConfig;
pub use replica::ReplicaError;
pub use state_machine::NoOpStateMachine;
pub use state_machine::Snapshot;
pub use state_machine::StateMachine;
pub use timeout::ElectionTimeoutGenerator;
pub use timeout::FixedElectionTimeoutGenerator;
pub use timeout::RandomElectionTimeoutGenerator;

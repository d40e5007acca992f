mod actor;
mod api;
mod commitlog;
mod dispatch;
mod replica;

pub use actor::ReplicaActor;
pub use actor::ReplicaHandle;
pub use api::create_replica;
pub use api::RaftOptions;
pub use api::ReplicaClientConfig;
pub use api::ReplicaCreationError;
pub use commitlog::Entry;
pub use commitlog::InMemoryLog;
pub use commitlog::Index;
pub use commitlog::Log;
pub use dispatch::InMemoryRouter;
pub use dispatch::MessageDispatcher;
pub use replica::AppendEntriesRequest;
pub use replica::AppendEntriesResponse;
pub use replica::Cluster;
pub use replica::CurrentLeader;
pub use replica::ElectionTimeoutGenerator;
pub use replica::FixedElectionTimeoutGenerator;
pub use replica::InMemoryLocalState;
pub use replica::InvalidCluster;
pub use replica::NewEntryRequest;
pub use replica::NewEntryResponse;
pub use replica::NoOpStateMachine;
pub use replica::PersistentLocalState;
pub use replica::RaftLogEntry;
pub use replica::RandomElectionTimeoutGenerator;
pub use replica::Replica;
pub use replica::ReplicaConfig;
pub use replica::ReplicaError;
pub use replica::ReplicaId;
pub use replica::RequestVoteRequest;
pub use replica::RequestVoteResponse;
pub use replica::RpcMessage;
pub use replica::Snapshot;
pub use replica::StateMachine;
pub use replica::Term;

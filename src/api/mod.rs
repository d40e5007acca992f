mod options;
mod wiring;

pub use options::RaftOptions;
pub use wiring::create_replica;
pub use wiring::ReplicaClientConfig;
pub use wiring::ReplicaCreationError;

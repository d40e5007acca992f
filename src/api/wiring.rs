use crate::actor::{ReplicaActor, ReplicaHandle};
use crate::api::options::{RaftOptions, RaftOptionsValidated};
use crate::commitlog::InMemoryLog;
use crate::dispatch::MessageDispatcher;
use crate::replica::{
    Cluster, ElectionTimeoutGenerator, InMemoryLocalState, InvalidCluster,
    RandomElectionTimeoutGenerator, Replica, ReplicaConfig, ReplicaId, StateMachine,
};
use std::convert::TryFrom;
use std::io;
use std::sync::Arc;

// Inbound messages waiting for the event loop. Beyond this the transport's
// messages are dropped and retried by protocol timers.
const REPLICA_QUEUE_SIZE: usize = 64;

pub struct ReplicaClientConfig {
    pub logger: slog::Logger,
    pub my_replica_id: ReplicaId,
    /// All members of the cluster, including this replica.
    pub cluster_members: Vec<ReplicaId>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub options: RaftOptions,
    /// None uses the jittered production generator derived from `options`.
    pub election_timeout_generator: Option<Box<dyn ElectionTimeoutGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaCreationError {
    #[error("Invalid cluster info")]
    InvalidClusterInfo(#[from] InvalidCluster),
    #[error("Illegal options for configuring replica: {0}")]
    IllegalOptions(String),
    #[error("Log initialization failure")]
    LogInitialization(#[from] io::Error),
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
}

/// Assembles a replica from its collaborators and spawns its event loop on
/// the current tokio runtime. The returned handle is the replica's inbound
/// queue; dropping every clone of it shuts the replica down.
pub fn create_replica<M>(
    config: ReplicaClientConfig,
    state_machine: M,
) -> Result<ReplicaHandle, ReplicaCreationError>
where
    M: StateMachine + Send + 'static,
{
    let root_logger = config.logger;

    let mut peers = config.cluster_members;
    let me_position = peers
        .iter()
        .position(|id| *id == config.my_replica_id)
        .ok_or(ReplicaCreationError::MeNotInCluster)?;
    peers.remove(me_position);
    let cluster = Cluster::create_valid_cluster(&root_logger, config.my_replica_id, peers)?;

    let options = RaftOptionsValidated::try_from(config.options)
        .map_err(|e| ReplicaCreationError::IllegalOptions(e.to_string()))?;
    let election_timeout_generator = config.election_timeout_generator.unwrap_or_else(|| {
        Box::new(RandomElectionTimeoutGenerator::new(
            options.follower_min_timeout,
            options.follower_max_timeout,
        ))
    });

    let log = InMemoryLog::create(root_logger.clone())?;
    let local_state = InMemoryLocalState::new(config.my_replica_id);

    let (handle, receiver) = ReplicaHandle::new(REPLICA_QUEUE_SIZE);
    let replica = Replica::new(ReplicaConfig {
        logger: root_logger.clone(),
        cluster,
        log,
        local_state,
        state_machine,
        dispatcher: config.dispatcher,
        election_timeout_generator,
        leader_heartbeat_duration: options.leader_heartbeat_duration,
    });

    let replica_actor = ReplicaActor::new(root_logger, receiver, replica);
    tokio::spawn(replica_actor.run_event_loop());

    Ok(handle)
}

use std::collections::HashSet;
use std::fmt;

/// ReplicaId is the ID of an entity participating in the replication cluster.
/// Conceptually a small integer; the message dispatcher delivers by it.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub fn new(replica_id: u32) -> Self {
        ReplicaId(replica_id)
    }

    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster is the group of replicas participating in a single instance of
/// raft together. Membership is fixed at construction.
pub struct Cluster {
    me: ReplicaId,
    peers: Vec<ReplicaId>,
}

impl Cluster {
    /// Validates that all ids are distinct and that we are not our own peer.
    ///
    /// An even total cluster size is legal (safety never depends on parity)
    /// but gets a warning, because an odd size tolerates the same number of
    /// failures with one server fewer.
    pub fn create_valid_cluster(
        logger: &slog::Logger,
        me: ReplicaId,
        peers: Vec<ReplicaId>,
    ) -> Result<Self, InvalidCluster> {
        let mut seen = HashSet::with_capacity(peers.len() + 1);
        seen.insert(me);
        for peer_id in &peers {
            if !seen.insert(*peer_id) {
                return Err(InvalidCluster::DuplicateReplicaId(*peer_id));
            }
        }

        let num_replicas = peers.len() + 1;
        if num_replicas % 2 == 0 {
            slog::warn!(
                logger,
                "Cluster has an even number of replicas ({}); an odd size gives better availability for the same fault tolerance",
                num_replicas
            );
        }

        Ok(Cluster { me, peers })
    }

    pub fn me(&self) -> ReplicaId {
        self.me
    }

    pub fn peer_ids(&self) -> &[ReplicaId] {
        &self.peers
    }

    pub fn contains_member(&self, id: ReplicaId) -> bool {
        id == self.me || self.peers.contains(&id)
    }

    /// num_voting_replicas() returns the total number of voting replicas
    /// (including self) that participate in elections.
    pub fn num_voting_replicas(&self) -> usize {
        self.peers.len() + 1
    }

    /// Smallest number of replicas (including self) that constitutes a
    /// majority of the cluster.
    pub fn majority_size(&self) -> usize {
        self.num_voting_replicas() / 2 + 1
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidCluster {
    #[error("duplicate replica '{0}' in cluster config")]
    DuplicateReplicaId(ReplicaId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn cluster_of(total: u32) -> Cluster {
        let peers = (1..total).map(ReplicaId::new).collect();
        Cluster::create_valid_cluster(&test_logger(), ReplicaId::new(0), peers).unwrap()
    }

    #[test]
    fn majority_size_is_floor_half_plus_one() {
        assert_eq!(cluster_of(1).majority_size(), 1);
        assert_eq!(cluster_of(3).majority_size(), 2);
        assert_eq!(cluster_of(4).majority_size(), 3);
        assert_eq!(cluster_of(5).majority_size(), 3);
    }

    #[test]
    fn duplicate_peer_id_is_rejected() {
        let peers = vec![ReplicaId::new(1), ReplicaId::new(1)];
        let result = Cluster::create_valid_cluster(&test_logger(), ReplicaId::new(0), peers);
        assert!(matches!(
            result,
            Err(InvalidCluster::DuplicateReplicaId(id)) if id == ReplicaId::new(1)
        ));
    }

    #[test]
    fn me_as_peer_is_rejected() {
        let peers = vec![ReplicaId::new(0), ReplicaId::new(1)];
        let result = Cluster::create_valid_cluster(&test_logger(), ReplicaId::new(0), peers);
        assert!(result.is_err());
    }

    #[test]
    fn even_cluster_size_is_accepted() {
        let cluster = cluster_of(4);
        assert_eq!(cluster.num_voting_replicas(), 4);
    }

    #[test]
    fn membership_includes_self_and_peers() {
        let cluster = cluster_of(3);
        assert!(cluster.contains_member(ReplicaId::new(0)));
        assert!(cluster.contains_member(ReplicaId::new(2)));
        assert!(!cluster.contains_member(ReplicaId::new(9)));
    }
}

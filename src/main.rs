use bytes::Bytes;
use raft_replica::{
    create_replica, InMemoryRouter, MessageDispatcher, NewEntryRequest, NoOpStateMachine,
    RaftOptions, ReplicaClientConfig, ReplicaId, RpcMessage,
};
use slog::Drain;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Demo: an in-process cluster of 5 replicas wired over the in-memory
/// router. A client submits a handful of entries, following leader
/// redirects. Watch the logs for elections and commits.
#[tokio::main]
async fn main() {
    let cluster_size = 5u32;
    let root_logger = create_root_logger_for_stdout();
    let router = Arc::new(InMemoryRouter::new(
        root_logger.new(slog::o!("Component" => "router")),
    ));

    let member_ids: Vec<ReplicaId> = (0..cluster_size).map(ReplicaId::new).collect();
    for member_id in &member_ids {
        let logger = root_logger.new(slog::o!("ReplicaId" => member_id.to_string()));
        let handle = create_replica(
            ReplicaClientConfig {
                logger,
                my_replica_id: *member_id,
                cluster_members: member_ids.clone(),
                dispatcher: router.clone(),
                options: RaftOptions::default(),
                election_timeout_generator: None,
            },
            NoOpStateMachine::new(),
        )
        .expect("replica construction failed");
        router.register_replica(*member_id, handle);
    }

    let client_id = ReplicaId::new(100);
    let mut mailbox = router.register_client(client_id);
    let client_logger = root_logger.new(slog::o!("Component" => "client"));

    for i in 0..5 {
        let data = Bytes::from(format!("entry-{}", i));
        submit_entry(
            &client_logger,
            router.as_ref(),
            &mut mailbox,
            client_id,
            member_ids[0],
            data,
        )
        .await;
    }

    slog::info!(root_logger, "All entries submitted; letting replication settle");
    tokio::time::sleep(Duration::from_secs(2)).await;
}

/// Submits one entry, retrying through redirects until a leader accepts it.
async fn submit_entry(
    logger: &slog::Logger,
    router: &InMemoryRouter,
    mailbox: &mut mpsc::UnboundedReceiver<RpcMessage>,
    client_id: ReplicaId,
    first_guess: ReplicaId,
    data: Bytes,
) {
    let mut target = first_guess;
    loop {
        router.send_request(
            target,
            NewEntryRequest {
                source: client_id,
                data: data.clone(),
            }
            .into(),
        );

        match timeout(Duration::from_millis(500), mailbox.recv()).await {
            Ok(Some(RpcMessage::NewEntryResult(response))) => {
                if response.accepted {
                    slog::info!(logger, "Entry accepted by leader {}", response.source);
                    return;
                }
                match response.leader_redirect {
                    Some(leader) => {
                        slog::info!(logger, "Redirected from {} to leader {}", target, leader);
                        target = leader;
                    }
                    None => {
                        // No leader yet, likely mid-election.
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
            _ => {
                // Response lost or unexpected; retry.
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

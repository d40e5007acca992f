use crate::commitlog::Log;
use crate::replica::{PersistentLocalState, RaftLogEntry, Replica, RpcMessage, StateMachine};
use tokio::sync::mpsc;
use tokio::time::timeout_at;

/// ReplicaHandle is the write side of a replica's inbound message queue.
/// Transports (or the in-process router) clone it freely; enqueueing is the
/// only cross-thread action in the whole replica.
#[derive(Clone)]
pub struct ReplicaHandle {
    sender: mpsc::Sender<RpcMessage>,
}

impl ReplicaHandle {
    /// Creates the handle/queue pair for one replica. The receiver end goes
    /// to the replica's actor.
    pub fn new(queue_size: usize) -> (Self, mpsc::Receiver<RpcMessage>) {
        let (sender, receiver) = mpsc::channel(queue_size);
        (ReplicaHandle { sender }, receiver)
    }

    /// Enqueue an inbound message, never blocking the caller. Returns false
    /// when the message was dropped (queue full or replica gone); the
    /// protocol treats that like any other lost message and self-corrects
    /// through timers.
    pub fn message_received(&self, message: RpcMessage) -> bool {
        self.sender.try_send(message).is_ok()
    }
}

/// ReplicaActor drives a replica: a single logical thread that consumes one
/// event per iteration, either the next inbound message or a timer expiry.
/// All replica state is owned here, so handlers run without locks.
pub struct ReplicaActor<L, P, M>
where
    L: Log<RaftLogEntry>,
    P: PersistentLocalState,
    M: StateMachine,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<RpcMessage>,
    replica: Replica<L, P, M>,
}

impl<L, P, M> ReplicaActor<L, P, M>
where
    L: Log<RaftLogEntry> + Send + 'static,
    P: PersistentLocalState + Send + 'static,
    M: StateMachine + Send + 'static,
{
    pub fn new(
        logger: slog::Logger,
        receiver: mpsc::Receiver<RpcMessage>,
        replica: Replica<L, P, M>,
    ) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    /// Runs until every handle is dropped or a collaborator fails fatally.
    /// Waits for a message no longer than the replica's next timer deadline;
    /// an empty poll means the timer fired.
    pub async fn run_event_loop(mut self) {
        loop {
            let deadline = self.replica.next_deadline();
            let result = match timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(message)) => {
                    slog::trace!(self.logger, "Received: {:?}", message);
                    self.replica.handle_message(message)
                }
                Ok(None) => {
                    slog::info!(self.logger, "All replica handles dropped; event loop exiting");
                    return;
                }
                Err(_elapsed) => self.replica.handle_timer_expired(),
            };

            if let Err(fatal) = result {
                slog::crit!(
                    self.logger,
                    "Replica halting rather than continuing with divergent state: {}",
                    fatal
                );
                return;
            }
        }
    }
}

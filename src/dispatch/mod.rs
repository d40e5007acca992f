use crate::actor::ReplicaHandle;
use crate::replica::{ReplicaId, RpcMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// MessageDispatcher delivers messages between replicas (and back to
/// clients) by recipient id. Sends are best-effort and non-blocking; the
/// protocol tolerates arbitrary drop and reorder underneath it.
///
/// One dispatcher instance is shared by everything that sends, so
/// implementations must be thread-safe.
pub trait MessageDispatcher: Send + Sync {
    fn send_request(&self, recipient: ReplicaId, request: RpcMessage);

    fn send_response(&self, recipient: ReplicaId, response: RpcMessage);
}

enum Route {
    Replica(ReplicaHandle),
    Client(mpsc::UnboundedSender<RpcMessage>),
}

/// In-process network: routes messages straight into the recipient's inbound
/// queue. Client ids get an unbounded mailbox instead of a replica queue.
/// Faults are simulated at three granularities: a whole endpoint down, an
/// endpoint that sends but no longer receives, and a single severed link
/// between two endpoints.
pub struct InMemoryRouter {
    logger: slog::Logger,
    routes: Mutex<HashMap<ReplicaId, Route>>,
    unreachable: Mutex<HashSet<ReplicaId>>,
    not_receiving: Mutex<HashSet<ReplicaId>>,
    severed_links: Mutex<HashSet<(ReplicaId, ReplicaId)>>,
}

impl InMemoryRouter {
    pub fn new(logger: slog::Logger) -> Self {
        InMemoryRouter {
            logger,
            routes: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            not_receiving: Mutex::new(HashSet::new()),
            severed_links: Mutex::new(HashSet::new()),
        }
    }

    pub fn register_replica(&self, id: ReplicaId, handle: ReplicaHandle) {
        self.routes
            .lock()
            .expect("router routes mutex poisoned")
            .insert(id, Route::Replica(handle));
    }

    /// Registers a client endpoint and returns its mailbox.
    pub fn register_client(&self, id: ReplicaId) -> mpsc::UnboundedReceiver<RpcMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .expect("router routes mutex poisoned")
            .insert(id, Route::Client(sender));
        receiver
    }

    /// While an endpoint is unreachable, messages to it and from it are
    /// silently dropped, like a crashed or partitioned server.
    pub fn set_reachable(&self, id: ReplicaId, reachable: bool) {
        let mut unreachable = self.unreachable.lock().expect("router mutex poisoned");
        if reachable {
            unreachable.remove(&id);
        } else {
            unreachable.insert(id);
        }
    }

    /// While an endpoint is not receiving, messages to it are dropped but
    /// its own sends still flow: a one-way partition.
    pub fn set_receiving(&self, id: ReplicaId, receiving: bool) {
        let mut not_receiving = self.not_receiving.lock().expect("router mutex poisoned");
        if receiving {
            not_receiving.remove(&id);
        } else {
            not_receiving.insert(id);
        }
    }

    /// Severs or restores the link between two endpoints. A severed link
    /// drops traffic in both directions while leaving each endpoint
    /// reachable to everyone else.
    pub fn set_link(&self, a: ReplicaId, b: ReplicaId, connected: bool) {
        let mut severed_links = self.severed_links.lock().expect("router mutex poisoned");
        if connected {
            severed_links.remove(&Self::link_key(a, b));
        } else {
            severed_links.insert(Self::link_key(a, b));
        }
    }

    fn link_key(a: ReplicaId, b: ReplicaId) -> (ReplicaId, ReplicaId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn deliver(&self, recipient: ReplicaId, message: RpcMessage) {
        let dropped = {
            let unreachable = self.unreachable.lock().expect("router mutex poisoned");
            let not_receiving = self.not_receiving.lock().expect("router mutex poisoned");
            let severed_links = self.severed_links.lock().expect("router mutex poisoned");
            unreachable.contains(&recipient)
                || unreachable.contains(&message.source())
                || not_receiving.contains(&recipient)
                || severed_links.contains(&Self::link_key(message.source(), recipient))
        };
        if dropped {
            slog::debug!(
                self.logger,
                "Dropping message to partitioned endpoint {}: {:?}",
                recipient,
                message
            );
            return;
        }

        match self
            .routes
            .lock()
            .expect("router routes mutex poisoned")
            .get(&recipient)
        {
            Some(Route::Replica(handle)) => {
                if !handle.message_received(message) {
                    slog::debug!(self.logger, "Replica {} queue rejected a message", recipient);
                }
            }
            Some(Route::Client(mailbox)) => {
                // A client that went away is indistinguishable from a lost
                // response.
                let _ = mailbox.send(message);
            }
            None => {
                slog::warn!(self.logger, "No route to recipient {}", recipient);
            }
        }
    }
}

impl MessageDispatcher for InMemoryRouter {
    fn send_request(&self, recipient: ReplicaId, request: RpcMessage) {
        self.deliver(recipient, request);
    }

    fn send_response(&self, recipient: ReplicaId, response: RpcMessage) {
        self.deliver(recipient, response);
    }
}

//! The threaded dispatch shell.
//!
//! One dedicated worker owns the engine. Producers (transport callbacks,
//! chain-channel subscribers) only ever push onto the [`MessageQueue`];
//! the worker dequeues one message at a time, sheds expired network
//! messages, feeds the engine, and fans its outputs out through the
//! registered channels. The deterministic simulator bypasses this shell and
//! drives the same engine inline.

use crate::engine::{Engine, Output};
use crate::queue::MessageQueue;
use randpa_messages::{NetworkMessage, RandpaMessage};
use randpa_types::{BlockId, SessionId};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A fan-out channel: a subscriber list that is append-only at startup and
/// read-only once the worker runs.
pub struct Channel<T> {
    subscribers: Vec<Box<dyn Fn(&T) + Send + Sync>>,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, callback: impl Fn(&T) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    pub fn send(&self, value: &T) {
        for subscriber in &self.subscribers {
            subscriber(value);
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound network message, addressed to one peer session.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub session_id: SessionId,
    pub message: NetworkMessage,
}

/// The running finality worker.
///
/// Owns the inbound queue and the worker thread; [`FinalityService::stop`]
/// terminates the queue, lets in-flight messages drain, and joins the
/// worker.
pub struct FinalityService {
    queue: Arc<MessageQueue<RandpaMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl FinalityService {
    /// Start the worker over a constructed engine. The channels must have
    /// their subscribers registered before this call; the subscriber lists
    /// are frozen from here on.
    pub fn start(
        mut engine: Engine,
        msg_expiration: Duration,
        out_net: Arc<Channel<OutboundMessage>>,
        finality: Arc<Channel<BlockId>>,
    ) -> Self {
        let queue = Arc::new(MessageQueue::new());
        let worker_queue = Arc::clone(&queue);

        let worker = std::thread::Builder::new()
            .name("randpa-worker".into())
            .spawn(move || {
                info!("finality worker started");
                while let Some(msg) = worker_queue.pop_wait() {
                    if let RandpaMessage::Net(net) = &msg {
                        if net.receive_time.elapsed() > msg_expiration {
                            info!(msg_type = net.data.type_name(), "network message dropped");
                            continue;
                        }
                    }

                    for output in engine.handle(msg) {
                        match output {
                            Output::Send {
                                session_id,
                                message,
                            } => out_net.send(&OutboundMessage {
                                session_id,
                                message,
                            }),
                            Output::Finalized(block_id) => {
                                debug!(block = %block_id, "emitting finalization");
                                finality.send(&block_id);
                            }
                        }
                    }
                }
                info!("finality worker terminated");
            })
            .expect("spawning the worker thread cannot fail");

        Self {
            queue,
            worker: Some(worker),
        }
    }

    /// Handle for producers to push inbound messages and events.
    pub fn sender(&self) -> Arc<MessageQueue<RandpaMessage>> {
        Arc::clone(&self.queue)
    }

    /// Terminate the queue and join the worker. In-flight messages are
    /// processed before exit.
    pub fn stop(&mut self) {
        self.queue.terminate();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("finality worker panicked");
            }
        }
    }
}

impl Drop for FinalityService {
    fn drop(&mut self) {
        self.stop();
    }
}

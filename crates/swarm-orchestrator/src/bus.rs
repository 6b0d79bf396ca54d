use crate::config::BusConfig;
use futures_util::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use swarm_core::{AgentId, Message, MessageKind, SwarmError, SwarmResult};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Receiving end of a bus endpoint.
///
/// Messages from one sender always come out in send order. When several
/// senders have messages waiting, the one whose oldest message has the
/// highest priority goes first.
pub struct Mailbox {
    endpoint: AgentId,
    rx: mpsc::Receiver<Message>,
    backlog: HashMap<AgentId, VecDeque<(u64, Message)>>,
    next_seq: u64,
}

impl Mailbox {
    fn new(endpoint: AgentId, rx: mpsc::Receiver<Message>) -> Self {
        Self {
            endpoint,
            rx,
            backlog: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn endpoint(&self) -> AgentId {
        self.endpoint
    }

    /// Next message, or `None` once the endpoint is unregistered and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.drain();
        if self.backlog.is_empty() {
            let message = self.rx.recv().await?;
            self.stash(message);
            self.drain();
        }
        self.pop_next()
    }

    /// Next message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.drain();
        self.pop_next()
    }

    /// Messages waiting to be received.
    pub fn pending(&self) -> usize {
        self.backlog.values().map(VecDeque::len).sum::<usize>() + self.rx.len()
    }

    fn drain(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            self.stash(message);
        }
    }

    fn stash(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.backlog
            .entry(message.sender)
            .or_default()
            .push_back((seq, message));
    }

    fn pop_next(&mut self) -> Option<Message> {
        let sender = self
            .backlog
            .iter()
            .filter_map(|(sender, queue)| queue.front().map(|(seq, m)| (*sender, m.priority, *seq)))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.2.cmp(&a.2)))
            .map(|(sender, _, _)| sender)?;
        let queue = self.backlog.get_mut(&sender)?;
        let (_, message) = queue.pop_front()?;
        if queue.is_empty() {
            self.backlog.remove(&sender);
        }
        Some(message)
    }
}

/// In-process delivery between agents and the orchestrator.
///
/// Delivery is at-least-once: a full or missing mailbox is retried with
/// exponential backoff up to `max_retries` times before the send fails.
pub struct MessageBus {
    endpoints: RwLock<HashMap<AgentId, mpsc::Sender<Message>>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Message>>>,
    config: BusConfig,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Open a mailbox for `endpoint`, replacing any previous one.
    pub async fn register(&self, endpoint: AgentId) -> Mailbox {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        self.endpoints.write().await.insert(endpoint, tx);
        debug!(endpoint = %endpoint, "Registered bus endpoint");
        Mailbox::new(endpoint, rx)
    }

    /// Close the endpoint. Its mailbox yields what is already queued, then `None`.
    pub async fn unregister(&self, endpoint: AgentId) -> bool {
        let removed = self.endpoints.write().await.remove(&endpoint).is_some();
        if removed {
            debug!(endpoint = %endpoint, "Unregistered bus endpoint");
        }
        removed
    }

    pub async fn is_registered(&self, endpoint: AgentId) -> bool {
        self.endpoints.read().await.contains_key(&endpoint)
    }

    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }

    /// Deliver one message. Replies to a pending request go straight to the
    /// waiting caller.
    pub async fn send(&self, mut message: Message) -> SwarmResult<()> {
        if let Some(correlation) = message.correlation_id {
            if let Some(waiter) = self.pending.lock().await.remove(&correlation) {
                // A dropped receiver means the requester already timed out.
                let _ = waiter.send(message);
                return Ok(());
            }
        }

        let mut attempt = 0;
        loop {
            let sender = self.endpoints.read().await.get(&message.recipient).cloned();
            let rejected = match sender {
                Some(tx) => match tx.try_send(message) {
                    Ok(()) => return Ok(()),
                    Err(TrySendError::Full(m)) | Err(TrySendError::Closed(m)) => m,
                },
                None => message,
            };
            message = rejected;

            if attempt >= self.config.max_retries {
                warn!(
                    message_id = %message.id,
                    recipient = %message.recipient,
                    attempts = attempt + 1,
                    "Message delivery failed"
                );
                return Err(SwarmError::DeliveryFailed {
                    message_id: message.id,
                    recipient: message.recipient,
                    attempts: attempt + 1,
                });
            }
            let delay = self.config.backoff(attempt);
            debug!(
                message_id = %message.id,
                recipient = %message.recipient,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying message delivery"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            message.retry_count = attempt;
        }
    }

    /// Fan a message out to every recipient concurrently. Returns how many
    /// deliveries succeeded; partial delivery is not an error.
    pub async fn broadcast(&self, from: AgentId, message: &Message, recipients: &[AgentId]) -> usize {
        let sends = recipients.iter().map(|recipient| {
            let mut copy = message.readdressed(*recipient);
            copy.sender = from;
            self.send(copy)
        });
        let results = join_all(sends).await;
        let delivered = results.iter().filter(|r| r.is_ok()).count();
        for error in results.into_iter().filter_map(Result::err) {
            warn!(error = %error, "Broadcast send failed");
        }
        debug!(delivered, total = recipients.len(), kind = ?message.kind, "Broadcast finished");
        delivered
    }

    /// Send `message` and wait for the recipient to [`respond`](Self::respond).
    pub async fn request_response(&self, mut message: Message, timeout: Duration) -> SwarmResult<Message> {
        message.requires_response = true;
        let request_id = message.id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send(message).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SwarmError::Cancelled(format!(
                "request {request_id} was dropped"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(SwarmError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Answer a request received from this bus.
    pub async fn respond(&self, request: &Message, payload: serde_json::Value) -> SwarmResult<()> {
        let kind = match request.kind {
            MessageKind::TaskDelegation => MessageKind::CompletionReport,
            other => other,
        };
        self.send(request.reply(kind, payload)).await
    }
}

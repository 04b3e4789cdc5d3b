//! Event stream listener: forwards the propagation trace over a bounded
//! channel.
//!
//! The engine never blocks on a subscriber: events are enqueued with a
//! non-blocking send, and a slow or disconnected subscriber drops events
//! (counted) rather than stalling a session mutation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bindings::Bindings;
use crate::error::{ForgeResult, StreamError};
use crate::fact::Fact;
use crate::listener::{RuleListener, SessionEvent};
use crate::network::NodeId;
use crate::token::{Activation, Element, Token};
use crate::value::Value;

/// Unique identifier for a stream subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A streamed propagation event, stamped with identity and wall-clock time.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    pub event_id: Uuid,
    pub subscription_id: SubscriptionId,
    pub timestamp: DateTime<Utc>,
    pub event: SessionEvent,
}

/// A listener that forwards every event into a bounded channel.
#[derive(Debug)]
pub struct StreamListener {
    subscription_id: SubscriptionId,
    tx: Sender<StreamEnvelope>,
    dropped: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
}

impl StreamListener {
    /// Create a listener/stream pair over a channel of the given capacity.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Arc<Self>, EventStream) {
        let subscription_id = SubscriptionId::new();
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let active = Arc::new(AtomicBool::new(true));
        let listener = Arc::new(Self {
            subscription_id,
            tx,
            dropped: Arc::clone(&dropped),
            active: Arc::clone(&active),
        });
        let stream = EventStream {
            subscription_id,
            rx,
            dropped,
            active,
        };
        (listener, stream)
    }

    /// The subscription this listener feeds.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    fn forward(&self, event: SessionEvent) {
        // Unsubscribed streams are silent, not "dropping".
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let envelope = StreamEnvelope {
            event_id: Uuid::new_v4(),
            subscription_id: self.subscription_id,
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl RuleListener for StreamListener {
    fn left_activate(&self, node: NodeId, tokens: &[Token]) {
        self.forward(SessionEvent::LeftActivate {
            node,
            tokens: tokens.to_vec(),
        });
    }

    fn left_retract(&self, node: NodeId, tokens: &[Token]) {
        self.forward(SessionEvent::LeftRetract {
            node,
            tokens: tokens.to_vec(),
        });
    }

    fn right_activate(&self, node: NodeId, elements: &[Element]) {
        self.forward(SessionEvent::RightActivate {
            node,
            elements: elements.to_vec(),
        });
    }

    fn right_retract(&self, node: NodeId, elements: &[Element]) {
        self.forward(SessionEvent::RightRetract {
            node,
            elements: elements.to_vec(),
        });
    }

    fn insert_facts(&self, facts: &[Fact]) {
        self.forward(SessionEvent::InsertFacts {
            facts: facts.to_vec(),
        });
    }

    fn retract_facts(&self, facts: &[Fact]) {
        self.forward(SessionEvent::RetractFacts {
            facts: facts.to_vec(),
        });
    }

    fn add_accum_reduced(
        &self,
        node: NodeId,
        join_bindings: &Bindings,
        reduced: &Value,
        fact_bindings: &Bindings,
    ) {
        self.forward(SessionEvent::AddAccumReduced {
            node,
            join_bindings: join_bindings.clone(),
            reduced: reduced.clone(),
            fact_bindings: fact_bindings.clone(),
        });
    }

    fn add_activations(&self, activations: &[Activation]) {
        self.forward(SessionEvent::AddActivations {
            activations: activations.to_vec(),
        });
    }

    fn remove_activations(&self, activations: &[Activation]) {
        self.forward(SessionEvent::RemoveActivations {
            activations: activations.to_vec(),
        });
    }

    fn fire_rules(&self, node: NodeId) {
        self.forward(SessionEvent::FireRules { node });
    }

    fn send_message(&self, message: &str) {
        self.forward(SessionEvent::Message {
            message: message.to_string(),
        });
    }
}

/// The receiving end of a [`StreamListener`].
///
/// Dropping the stream unsubscribes it.
#[derive(Debug)]
pub struct EventStream {
    subscription_id: SubscriptionId,
    rx: Receiver<StreamEnvelope>,
    dropped: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
}

impl EventStream {
    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Stop the listener from forwarding further events.
    ///
    /// Idempotent and non-blocking. Events already buffered in the channel
    /// remain receivable; nothing new arrives after this returns.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> ForgeResult<StreamEnvelope> {
        self.rx.recv().map_err(|_| StreamError::Disconnected.into())
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> ForgeResult<StreamEnvelope> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StreamError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }
            .into(),
            RecvTimeoutError::Disconnected => StreamError::Disconnected.into(),
        })
    }

    /// Receive without blocking; `None` when the channel is empty.
    #[must_use]
    pub fn try_recv(&self) -> Option<StreamEnvelope> {
        self.rx.try_recv().ok()
    }

    /// Events dropped because the subscriber was slow or gone.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

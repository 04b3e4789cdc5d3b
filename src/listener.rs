//! The listener pipeline: an observable stream of every propagation event.
//!
//! Listeners are strict observers: they must not mutate memory or the
//! session. They are called synchronously, in registration order, for every
//! event in propagation order, so a listener sees exactly the sequence of
//! work the engine performed. A listener failure propagates to the caller;
//! listeners are trusted code.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::bindings::Bindings;
use crate::fact::Fact;
use crate::network::NodeId;
use crate::token::{Activation, Element, Token};
use crate::value::Value;

/// One propagation event, in serializable form.
///
/// These are intentionally serializable so traces can be captured, asserted
/// on in tests, and shipped to tooling.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    InsertFacts { facts: Vec<Fact> },
    RetractFacts { facts: Vec<Fact> },
    LeftActivate { node: NodeId, tokens: Vec<Token> },
    LeftRetract { node: NodeId, tokens: Vec<Token> },
    RightActivate { node: NodeId, elements: Vec<Element> },
    RightRetract { node: NodeId, elements: Vec<Element> },
    AddAccumReduced {
        node: NodeId,
        join_bindings: Bindings,
        reduced: Value,
        fact_bindings: Bindings,
    },
    AddActivations { activations: Vec<Activation> },
    RemoveActivations { activations: Vec<Activation> },
    FireRules { node: NodeId },
    Message { message: String },
}

/// An observer of session propagation. Every method has a no-op default, so
/// implementations override only what they care about.
///
/// Implementations use interior mutability: the engine calls listeners
/// through shared references while it mutates transient memory.
pub trait RuleListener: Send + Sync {
    /// Tokens arriving on a node's left input.
    fn left_activate(&self, _node: NodeId, _tokens: &[Token]) {}

    /// Tokens leaving a node's left input.
    fn left_retract(&self, _node: NodeId, _tokens: &[Token]) {}

    /// Elements arriving on a node's right input.
    fn right_activate(&self, _node: NodeId, _elements: &[Element]) {}

    /// Elements leaving a node's right input.
    fn right_retract(&self, _node: NodeId, _elements: &[Element]) {}

    /// Facts presented to the alpha roots.
    fn insert_facts(&self, _facts: &[Fact]) {}

    /// Facts retracted through the alpha roots.
    fn retract_facts(&self, _facts: &[Fact]) {}

    /// A reduced accumulator state was recorded.
    fn add_accum_reduced(
        &self,
        _node: NodeId,
        _join_bindings: &Bindings,
        _reduced: &Value,
        _fact_bindings: &Bindings,
    ) {
    }

    /// Activations were queued on the agenda.
    fn add_activations(&self, _activations: &[Activation]) {}

    /// Pending activations were dropped from the agenda.
    fn remove_activations(&self, _activations: &[Activation]) {}

    /// An activation of this production node is about to fire.
    fn fire_rules(&self, _node: NodeId) {}

    /// Free-form message, e.g. from a rule's RHS.
    fn send_message(&self, _message: &str) {}
}

/// The identity listener: observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullListener;

impl RuleListener for NullListener {}

/// Forwards every event to an ordered list of children.
#[derive(Default)]
pub struct DelegatingListener {
    children: Vec<Arc<dyn RuleListener>>,
}

impl DelegatingListener {
    /// A delegating listener over the given children, called in order.
    #[must_use]
    pub fn new(children: Vec<Arc<dyn RuleListener>>) -> Self {
        Self { children }
    }
}

impl RuleListener for DelegatingListener {
    fn left_activate(&self, node: NodeId, tokens: &[Token]) {
        for child in &self.children {
            child.left_activate(node, tokens);
        }
    }

    fn left_retract(&self, node: NodeId, tokens: &[Token]) {
        for child in &self.children {
            child.left_retract(node, tokens);
        }
    }

    fn right_activate(&self, node: NodeId, elements: &[Element]) {
        for child in &self.children {
            child.right_activate(node, elements);
        }
    }

    fn right_retract(&self, node: NodeId, elements: &[Element]) {
        for child in &self.children {
            child.right_retract(node, elements);
        }
    }

    fn insert_facts(&self, facts: &[Fact]) {
        for child in &self.children {
            child.insert_facts(facts);
        }
    }

    fn retract_facts(&self, facts: &[Fact]) {
        for child in &self.children {
            child.retract_facts(facts);
        }
    }

    fn add_accum_reduced(
        &self,
        node: NodeId,
        join_bindings: &Bindings,
        reduced: &Value,
        fact_bindings: &Bindings,
    ) {
        for child in &self.children {
            child.add_accum_reduced(node, join_bindings, reduced, fact_bindings);
        }
    }

    fn add_activations(&self, activations: &[Activation]) {
        for child in &self.children {
            child.add_activations(activations);
        }
    }

    fn remove_activations(&self, activations: &[Activation]) {
        for child in &self.children {
            child.remove_activations(activations);
        }
    }

    fn fire_rules(&self, node: NodeId) {
        for child in &self.children {
            child.fire_rules(node);
        }
    }

    fn send_message(&self, message: &str) {
        for child in &self.children {
            child.send_message(message);
        }
    }
}

/// Records every event, in order, into an in-memory log.
#[derive(Debug, Default)]
pub struct TraceListener {
    events: Mutex<Vec<SessionEvent>>,
}

impl TraceListener {
    /// An empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: SessionEvent) {
        let Ok(mut events) = self.events.lock() else {
            return;
        };
        events.push(event);
    }

    /// A copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drain the recorded events.
    #[must_use]
    pub fn take_events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl RuleListener for TraceListener {
    fn left_activate(&self, node: NodeId, tokens: &[Token]) {
        self.push(SessionEvent::LeftActivate {
            node,
            tokens: tokens.to_vec(),
        });
    }

    fn left_retract(&self, node: NodeId, tokens: &[Token]) {
        self.push(SessionEvent::LeftRetract {
            node,
            tokens: tokens.to_vec(),
        });
    }

    fn right_activate(&self, node: NodeId, elements: &[Element]) {
        self.push(SessionEvent::RightActivate {
            node,
            elements: elements.to_vec(),
        });
    }

    fn right_retract(&self, node: NodeId, elements: &[Element]) {
        self.push(SessionEvent::RightRetract {
            node,
            elements: elements.to_vec(),
        });
    }

    fn insert_facts(&self, facts: &[Fact]) {
        self.push(SessionEvent::InsertFacts {
            facts: facts.to_vec(),
        });
    }

    fn retract_facts(&self, facts: &[Fact]) {
        self.push(SessionEvent::RetractFacts {
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
        self.push(SessionEvent::AddAccumReduced {
            node,
            join_bindings: join_bindings.clone(),
            reduced: reduced.clone(),
            fact_bindings: fact_bindings.clone(),
        });
    }

    fn add_activations(&self, activations: &[Activation]) {
        self.push(SessionEvent::AddActivations {
            activations: activations.to_vec(),
        });
    }

    fn remove_activations(&self, activations: &[Activation]) {
        self.push(SessionEvent::RemoveActivations {
            activations: activations.to_vec(),
        });
    }

    fn fire_rules(&self, node: NodeId) {
        self.push(SessionEvent::FireRules { node });
    }

    fn send_message(&self, message: &str) {
        self.push(SessionEvent::Message {
            message: message.to_string(),
        });
    }
}

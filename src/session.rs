//! Sessions: the public state container binding rulebase, memory, and
//! listeners.
//!
//! A session is a value. Every mutation clones the memory snapshot into a
//! transient form, runs the propagation, and snapshots back; the original
//! session remains valid and shareable. The firing loop hands each RHS an
//! explicit [`RuleContext`] through which it re-enters the session.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::bindings::Bindings;
use crate::error::{ForgeError, ForgeResult, SessionError};
use crate::fact::Fact;
use crate::listener::RuleListener;
use crate::memory::{PersistentMemory, TransientMemory};
use crate::network::propagate::Propagation;
use crate::network::{BetaNode, NodeId, Rulebase};
use crate::token::Token;

/// A snapshot of a rule session. Immutable; mutations return a new session.
///
/// # Examples
///
/// ```rust,ignore
/// let session = Session::new(rulebase)
///     .insert(&[Fact::new("Person").with("name", "A").with("age", 30)])
///     .fire_rules()?;
/// let adults = session.query("adults", &Bindings::new())?;
/// ```
#[derive(Clone)]
pub struct Session {
    rulebase: Arc<Rulebase>,
    memory: PersistentMemory,
    listeners: Vec<Arc<dyn RuleListener>>,
}

/// Borrowed view of a session's parts, for inspection and tooling.
#[allow(missing_docs)]
pub struct SessionComponents<'a> {
    pub rulebase: &'a Rulebase,
    pub memory: &'a PersistentMemory,
    pub listeners: &'a [Arc<dyn RuleListener>],
}

impl Session {
    /// Create a session over a rulebase, with no listeners.
    #[must_use]
    pub fn new(rulebase: Arc<Rulebase>) -> Self {
        Self::with_listeners(rulebase, Vec::new())
    }

    /// Create a session with a single listener.
    #[must_use]
    pub fn with_listener(rulebase: Arc<Rulebase>, listener: Arc<dyn RuleListener>) -> Self {
        Self::with_listeners(rulebase, vec![listener])
    }

    /// Create a session with listeners; they observe every propagation,
    /// starting with the beta-root seeding performed here.
    #[must_use]
    pub fn with_listeners(
        rulebase: Arc<Rulebase>,
        listeners: Vec<Arc<dyn RuleListener>>,
    ) -> Self {
        let mut transient = PersistentMemory::default().to_transient();
        {
            let mut propagation = Propagation::new(&rulebase, &mut transient, &listeners);
            let seed = [Token::empty()];
            propagation.send_tokens(rulebase.beta_roots(), &seed);
        }
        Self {
            rulebase,
            memory: transient.into_persistent(),
            listeners,
        }
    }

    fn advance(&self, transient: TransientMemory) -> Self {
        Self {
            rulebase: Arc::clone(&self.rulebase),
            memory: transient.into_persistent(),
            listeners: self.listeners.clone(),
        }
    }

    /// Insert facts and propagate the resulting matches.
    #[must_use]
    pub fn insert(&self, facts: &[Fact]) -> Self {
        debug!(count = facts.len(), "insert");
        let mut transient = self.memory.to_transient();
        {
            let mut propagation =
                Propagation::new(&self.rulebase, &mut transient, &self.listeners);
            propagation.insert_facts(facts);
        }
        self.advance(transient)
    }

    /// Retract facts, inverting their propagation.
    #[must_use]
    pub fn retract(&self, facts: &[Fact]) -> Self {
        debug!(count = facts.len(), "retract");
        let mut transient = self.memory.to_transient();
        {
            let mut propagation =
                Propagation::new(&self.rulebase, &mut transient, &self.listeners);
            propagation.retract_facts(facts);
        }
        self.advance(transient)
    }

    /// Drain the agenda, firing each pending activation's RHS.
    ///
    /// Runs to quiescence: activations produced while firing are drained
    /// too. On an RHS failure the in-flight state is dropped and this
    /// session remains the last consistent snapshot.
    pub fn fire_rules(&self) -> ForgeResult<Self> {
        let mut transient = self.memory.to_transient();
        {
            let mut propagation =
                Propagation::new(&self.rulebase, &mut transient, &self.listeners);
            propagation.run_agenda()?;
        }
        Ok(self.advance(transient))
    }

    /// Run a registered query with the given parameters, returning the
    /// bindings of every stored match.
    pub fn query(&self, name: &str, params: &Bindings) -> ForgeResult<Vec<Bindings>> {
        let Some(node_id) = self.rulebase.query_node(name) else {
            return Err(SessionError::UnknownQuery {
                name: name.to_string(),
            }
            .into());
        };
        let BetaNode::Query { param_keys, .. } = self.rulebase.beta(node_id) else {
            return Err(ForgeError::internal(format!(
                "query '{name}' registered against a non-query node"
            )));
        };
        for key in param_keys {
            if !params.contains(key) {
                return Err(SessionError::MissingParameter {
                    query: name.to_string(),
                    parameter: key.clone(),
                }
                .into());
            }
        }
        let join_bindings = params.project(param_keys);
        Ok(self
            .memory
            .tokens_at(node_id, &join_bindings)
            .iter()
            .map(|t| t.bindings.clone())
            .collect())
    }

    /// Borrow the session's parts.
    #[must_use]
    pub fn components(&self) -> SessionComponents<'_> {
        SessionComponents {
            rulebase: &self.rulebase,
            memory: &self.memory,
            listeners: &self.listeners,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("rulebase", &self.rulebase)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

/// The handle a firing RHS uses to re-enter the session.
///
/// Insertions through [`RuleContext::insert`] are recorded against the
/// triggering token, so they are retracted automatically if that token is
/// later revoked; [`RuleContext::insert_unconditional`] skips the record
/// and the facts outlive their justification.
pub struct RuleContext<'p, 'a> {
    pub(crate) propagation: &'p mut Propagation<'a>,
    pub(crate) node: NodeId,
    pub(crate) token: &'p Token,
    pub(crate) production: &'p str,
}

impl RuleContext<'_, '_> {
    /// Logically insert facts: recorded in the insertion log and retracted
    /// when the triggering token is revoked.
    pub fn insert(&mut self, facts: &[Fact]) {
        self.propagation
            .memory
            .record_insertions(self.node, self.token, facts);
        self.propagation.insert_facts(facts);
    }

    /// Insert facts without recording them; they survive retraction of the
    /// triggering token.
    pub fn insert_unconditional(&mut self, facts: &[Fact]) {
        self.propagation.insert_facts(facts);
    }

    /// Retract facts from within the RHS.
    pub fn retract(&mut self, facts: &[Fact]) {
        self.propagation.retract_facts(facts);
    }

    /// Send a free-form message to the listeners.
    pub fn send_message(&mut self, message: &str) {
        for listener in self.propagation.listeners {
            listener.send_message(message);
        }
    }

    /// The token that triggered this firing.
    #[must_use]
    pub fn token(&self) -> &Token {
        self.token
    }

    /// The name of the production being fired.
    #[must_use]
    pub fn production(&self) -> &str {
        self.production
    }
}

impl Propagation<'_> {
    /// Pop and fire activations until the agenda is empty.
    pub(crate) fn run_agenda(&mut self) -> ForgeResult<()> {
        let mut fired = 0_usize;
        while let Some(activation) = self.memory.pop_activation() {
            let node_id = activation.node;
            let rulebase = self.rulebase;
            let BetaNode::Production {
                name, env, rhs, ..
            } = rulebase.beta(node_id)
            else {
                return Err(ForgeError::internal(format!(
                    "agenda entry for non-production node {node_id:?}"
                )));
            };
            for listener in self.listeners {
                listener.fire_rules(node_id);
            }
            trace!(rule = %name, "firing");

            let token = activation.token;
            let previous = self.current_production.replace(node_id);
            let result = {
                let mut context = RuleContext {
                    propagation: self,
                    node: node_id,
                    token: &token,
                    production: name,
                };
                rhs(&mut context, &token, env)
            };
            self.current_production = previous;
            result.map_err(|err| SessionError::RhsFailure {
                production: name.clone(),
                message: err.to_string(),
            })?;
            fired += 1;
        }
        debug!(fired, "agenda drained");
        Ok(())
    }
}

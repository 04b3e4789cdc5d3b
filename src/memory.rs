//! Working memory: tokens, elements, accumulator reductions, insertion
//! provenance, and the agenda.
//!
//! Memory has two shapes. [`PersistentMemory`] is an immutable snapshot a
//! session holds; it is freely shareable. [`TransientMemory`] is the
//! single-threaded mutating form used for the duration of one
//! insert/retract/fire call. `to_transient` clones the snapshot;
//! `into_persistent` consumes the transient, so touching a transient after
//! the handover is a compile error rather than a runtime one.
//!
//! Removal of a non-present token or element is a no-op; callers rely on
//! the returned multiset to decide downstream retractions, so retractions
//! never fabricate matches.

use std::collections::{HashMap, VecDeque};

use crate::bindings::Bindings;
use crate::fact::Fact;
use crate::network::NodeId;
use crate::token::{Activation, Element, Token};
use crate::value::Value;

/// Multiset removal: removes the first occurrence of each wanted item and
/// returns what was actually removed.
fn remove_first<T: PartialEq>(stored: &mut Vec<T>, wanted: &[T]) -> Vec<T> {
    let mut removed = Vec::with_capacity(wanted.len());
    for item in wanted {
        if let Some(pos) = stored.iter().position(|s| s == item) {
            removed.push(stored.remove(pos));
        }
    }
    removed
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tokens: HashMap<NodeId, HashMap<Bindings, Vec<Token>>>,
    elements: HashMap<NodeId, HashMap<Bindings, Vec<Element>>>,
    // Ordered per key so accumulate emissions are reproducible.
    accum: HashMap<NodeId, HashMap<Bindings, Vec<(Bindings, Value)>>>,
    insertions: HashMap<NodeId, HashMap<Token, Vec<Fact>>>,
    agenda: VecDeque<Activation>,
}

/// Immutable working-memory snapshot held by a session.
#[derive(Debug, Clone, Default)]
pub struct PersistentMemory {
    state: MemoryState,
}

impl PersistentMemory {
    /// Begin a mutation cycle. The snapshot itself is untouched.
    #[must_use]
    pub fn to_transient(&self) -> TransientMemory {
        TransientMemory {
            state: self.state.clone(),
        }
    }

    /// Tokens stored for a node under the given join bindings.
    #[must_use]
    pub fn tokens_at(&self, node: NodeId, join_bindings: &Bindings) -> &[Token] {
        self.state
            .tokens
            .get(&node)
            .and_then(|per_node| per_node.get(join_bindings))
            .map_or(&[], Vec::as_slice)
    }

    /// Elements stored for a node under the given join bindings.
    #[must_use]
    pub fn elements_at(&self, node: NodeId, join_bindings: &Bindings) -> &[Element] {
        self.state
            .elements
            .get(&node)
            .and_then(|per_node| per_node.get(join_bindings))
            .map_or(&[], Vec::as_slice)
    }

    /// Accumulator reductions stored for a node under the join bindings,
    /// as (fact-bindings, reduced state) pairs in recording order.
    #[must_use]
    pub fn accum_reductions_at(
        &self,
        node: NodeId,
        join_bindings: &Bindings,
    ) -> &[(Bindings, Value)] {
        self.state
            .accum
            .get(&node)
            .and_then(|per_node| per_node.get(join_bindings))
            .map_or(&[], Vec::as_slice)
    }

    /// Pending activations in firing order.
    pub fn agenda(&self) -> impl Iterator<Item = &Activation> {
        self.state.agenda.iter()
    }

    /// Whether the agenda is empty.
    #[must_use]
    pub fn agenda_is_empty(&self) -> bool {
        self.state.agenda.is_empty()
    }
}

/// The mutating form of working memory. Not thread-safe; confined to the
/// calling thread for one session mutation.
#[derive(Debug)]
pub struct TransientMemory {
    state: MemoryState,
}

impl TransientMemory {
    /// End the mutation cycle. Consumes the transient.
    #[must_use]
    pub fn into_persistent(self) -> PersistentMemory {
        PersistentMemory { state: self.state }
    }

    /// Tokens stored for a node under the given join bindings.
    #[must_use]
    pub fn tokens(&self, node: NodeId, join_bindings: &Bindings) -> &[Token] {
        self.state
            .tokens
            .get(&node)
            .and_then(|per_node| per_node.get(join_bindings))
            .map_or(&[], Vec::as_slice)
    }

    /// Append tokens for a node under the given join bindings.
    pub fn add_tokens(&mut self, node: NodeId, join_bindings: &Bindings, tokens: Vec<Token>) {
        if tokens.is_empty() {
            return;
        }
        self.state
            .tokens
            .entry(node)
            .or_default()
            .entry(join_bindings.clone())
            .or_default()
            .extend(tokens);
    }

    /// Remove tokens; returns the multiset actually removed.
    pub fn remove_tokens(
        &mut self,
        node: NodeId,
        join_bindings: &Bindings,
        tokens: &[Token],
    ) -> Vec<Token> {
        let Some(per_node) = self.state.tokens.get_mut(&node) else {
            return Vec::new();
        };
        let Some(stored) = per_node.get_mut(join_bindings) else {
            return Vec::new();
        };
        let removed = remove_first(stored, tokens);
        if stored.is_empty() {
            per_node.remove(join_bindings);
            if per_node.is_empty() {
                self.state.tokens.remove(&node);
            }
        }
        removed
    }

    /// Elements stored for a node under the given join bindings.
    #[must_use]
    pub fn elements(&self, node: NodeId, join_bindings: &Bindings) -> &[Element] {
        self.state
            .elements
            .get(&node)
            .and_then(|per_node| per_node.get(join_bindings))
            .map_or(&[], Vec::as_slice)
    }

    /// Append elements for a node under the given join bindings.
    pub fn add_elements(
        &mut self,
        node: NodeId,
        join_bindings: &Bindings,
        elements: Vec<Element>,
    ) {
        if elements.is_empty() {
            return;
        }
        self.state
            .elements
            .entry(node)
            .or_default()
            .entry(join_bindings.clone())
            .or_default()
            .extend(elements);
    }

    /// Remove elements; returns the multiset actually removed.
    pub fn remove_elements(
        &mut self,
        node: NodeId,
        join_bindings: &Bindings,
        elements: &[Element],
    ) -> Vec<Element> {
        let Some(per_node) = self.state.elements.get_mut(&node) else {
            return Vec::new();
        };
        let Some(stored) = per_node.get_mut(join_bindings) else {
            return Vec::new();
        };
        let removed = remove_first(stored, elements);
        if stored.is_empty() {
            per_node.remove(join_bindings);
            if per_node.is_empty() {
                self.state.elements.remove(&node);
            }
        }
        removed
    }

    /// The reduced state recorded for a (node, join-bindings, fact-bindings)
    /// key, if any.
    #[must_use]
    pub fn accum_reduced(
        &self,
        node: NodeId,
        join_bindings: &Bindings,
        fact_bindings: &Bindings,
    ) -> Option<&Value> {
        self.state
            .accum
            .get(&node)?
            .get(join_bindings)?
            .iter()
            .find(|(fb, _)| fb == fact_bindings)
            .map(|(_, state)| state)
    }

    /// All reductions for a (node, join-bindings) key, in recording order.
    #[must_use]
    pub fn accum_reductions(&self, node: NodeId, join_bindings: &Bindings) -> &[(Bindings, Value)] {
        self.state
            .accum
            .get(&node)
            .and_then(|per_node| per_node.get(join_bindings))
            .map_or(&[], Vec::as_slice)
    }

    /// Record (or replace) the reduced state for a fact-bindings group.
    pub fn set_accum_reduced(
        &mut self,
        node: NodeId,
        join_bindings: &Bindings,
        fact_bindings: Bindings,
        reduced: Value,
    ) {
        let stored = self
            .state
            .accum
            .entry(node)
            .or_default()
            .entry(join_bindings.clone())
            .or_default();
        if let Some(entry) = stored.iter_mut().find(|(fb, _)| *fb == fact_bindings) {
            entry.1 = reduced;
        } else {
            stored.push((fact_bindings, reduced));
        }
    }

    /// Drop the reduced state for a fact-bindings group.
    pub fn remove_accum_reduced(
        &mut self,
        node: NodeId,
        join_bindings: &Bindings,
        fact_bindings: &Bindings,
    ) -> Option<Value> {
        let per_node = self.state.accum.get_mut(&node)?;
        let stored = per_node.get_mut(join_bindings)?;
        let pos = stored.iter().position(|(fb, _)| fb == fact_bindings)?;
        let (_, state) = stored.remove(pos);
        if stored.is_empty() {
            per_node.remove(join_bindings);
            if per_node.is_empty() {
                self.state.accum.remove(&node);
            }
        }
        Some(state)
    }

    /// Queue activations, ordered by descending salience, FIFO within a
    /// salience class.
    pub fn add_activations(&mut self, activations: &[Activation]) {
        for activation in activations {
            let pos = self
                .state
                .agenda
                .iter()
                .position(|queued| queued.salience < activation.salience)
                .unwrap_or(self.state.agenda.len());
            self.state.agenda.insert(pos, activation.clone());
        }
    }

    /// Remove pending activations; returns those actually removed.
    pub fn remove_activations(&mut self, activations: &[Activation]) -> Vec<Activation> {
        let mut removed = Vec::new();
        for activation in activations {
            if let Some(pos) = self.state.agenda.iter().position(|q| q == activation) {
                if let Some(found) = self.state.agenda.remove(pos) {
                    removed.push(found);
                }
            }
        }
        removed
    }

    /// Pop the next activation to fire.
    pub fn pop_activation(&mut self) -> Option<Activation> {
        self.state.agenda.pop_front()
    }

    /// Record facts inserted by a token's RHS.
    pub fn record_insertions(&mut self, node: NodeId, token: &Token, facts: &[Fact]) {
        if facts.is_empty() {
            return;
        }
        self.state
            .insertions
            .entry(node)
            .or_default()
            .entry(token.clone())
            .or_default()
            .extend_from_slice(facts);
    }

    /// Take the facts recorded for a token; the log entry is removed.
    pub fn remove_insertions(&mut self, node: NodeId, token: &Token) -> Vec<Fact> {
        let Some(per_node) = self.state.insertions.get_mut(&node) else {
            return Vec::new();
        };
        let facts = per_node.remove(token).unwrap_or_default();
        if per_node.is_empty() {
            self.state.insertions.remove(&node);
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ConditionId;
    use crate::token::Matched;

    fn token(label: &str) -> Token {
        Token::empty().extend(
            Matched::Fact(Fact::new("T").with("label", label)),
            ConditionId::new(0),
            &Bindings::new(),
        )
    }

    fn element(label: &str) -> Element {
        Element::new(Fact::new("E").with("label", label), Bindings::new())
    }

    fn activation(label: &str, salience: i32) -> Activation {
        Activation {
            node: NodeId::new(0),
            token: token(label),
            salience,
        }
    }

    #[test]
    fn test_tokens_round_trip() {
        let mut mem = PersistentMemory::default().to_transient();
        let node = NodeId::new(1);
        let jb = Bindings::new().with("?x", 1);

        mem.add_tokens(node, &jb, vec![token("a"), token("b")]);
        assert_eq!(mem.tokens(node, &jb).len(), 2);
        assert!(mem.tokens(node, &Bindings::new()).is_empty());

        let removed = mem.remove_tokens(node, &jb, &[token("a"), token("z")]);
        assert_eq!(removed, vec![token("a")]);
        assert_eq!(mem.tokens(node, &jb), &[token("b")]);
    }

    #[test]
    fn test_remove_is_noop_for_absent_items() {
        let mut mem = PersistentMemory::default().to_transient();
        let node = NodeId::new(0);
        let jb = Bindings::new();
        assert!(mem.remove_elements(node, &jb, &[element("x")]).is_empty());
        assert!(mem.remove_tokens(node, &jb, &[token("x")]).is_empty());
    }

    #[test]
    fn test_duplicate_tokens_form_a_multiset() {
        let mut mem = PersistentMemory::default().to_transient();
        let node = NodeId::new(0);
        let jb = Bindings::new();

        mem.add_tokens(node, &jb, vec![token("a"), token("a")]);
        let removed = mem.remove_tokens(node, &jb, &[token("a")]);
        assert_eq!(removed.len(), 1);
        assert_eq!(mem.tokens(node, &jb).len(), 1);
    }

    #[test]
    fn test_accum_reductions_replace_in_place() {
        let mut mem = PersistentMemory::default().to_transient();
        let node = NodeId::new(2);
        let jb = Bindings::new();
        let fb = Bindings::new().with("?c", "X");

        mem.set_accum_reduced(node, &jb, fb.clone(), Value::Int(15));
        assert_eq!(mem.accum_reduced(node, &jb, &fb), Some(&Value::Int(15)));

        mem.set_accum_reduced(node, &jb, fb.clone(), Value::Int(10));
        assert_eq!(mem.accum_reduced(node, &jb, &fb), Some(&Value::Int(10)));
        assert_eq!(mem.accum_reductions(node, &jb).len(), 1);

        assert_eq!(
            mem.remove_accum_reduced(node, &jb, &fb),
            Some(Value::Int(10))
        );
        assert!(mem.accum_reductions(node, &jb).is_empty());
    }

    #[test]
    fn test_agenda_orders_by_salience_then_fifo() {
        let mut mem = PersistentMemory::default().to_transient();
        mem.add_activations(&[activation("a", 0), activation("b", 0)]);
        mem.add_activations(&[activation("c", 10)]);
        mem.add_activations(&[activation("d", 0)]);

        let order: Vec<Activation> = std::iter::from_fn(|| mem.pop_activation()).collect();
        assert_eq!(
            order,
            vec![
                activation("c", 10),
                activation("a", 0),
                activation("b", 0),
                activation("d", 0),
            ]
        );
    }

    #[test]
    fn test_remove_activations_returns_removed() {
        let mut mem = PersistentMemory::default().to_transient();
        mem.add_activations(&[activation("a", 0)]);
        let removed = mem.remove_activations(&[activation("a", 0), activation("b", 0)]);
        assert_eq!(removed, vec![activation("a", 0)]);
        assert!(mem.pop_activation().is_none());
    }

    #[test]
    fn test_insertion_log_round_trip() {
        let mut mem = PersistentMemory::default().to_transient();
        let node = NodeId::new(3);
        let t = token("t");
        let facts = [Fact::new("Adult").with("name", "A")];

        mem.record_insertions(node, &t, &facts);
        mem.record_insertions(node, &t, &facts);
        assert_eq!(mem.remove_insertions(node, &t).len(), 2);
        assert!(mem.remove_insertions(node, &t).is_empty());
    }

    #[test]
    fn test_persistent_snapshot_is_isolated() {
        let persistent = PersistentMemory::default();
        let node = NodeId::new(0);
        let jb = Bindings::new();

        let mut transient = persistent.to_transient();
        transient.add_tokens(node, &jb, vec![token("a")]);
        let advanced = transient.into_persistent();

        assert!(persistent.tokens_at(node, &jb).is_empty());
        assert_eq!(advanced.tokens_at(node, &jb).len(), 1);
    }
}

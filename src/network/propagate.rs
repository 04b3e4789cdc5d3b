//! The propagation engine: match-dispatch over beta node kinds.
//!
//! A [`Propagation`] binds the rulebase, the transient memory, and the
//! listener list for the duration of one session mutation. Every activation
//! and retraction notifies the listeners before the node's own rules run,
//! so the observed event stream is the propagation order.
//!
//! Retractions always work from the multiset memory actually removed, never
//! from the caller's request, so retracting an absent match cascades
//! nothing.

use std::sync::Arc;

use tracing::trace;

use crate::accumulate::Accumulator;
use crate::bindings::Bindings;
use crate::fact::{Fact, FactType};
use crate::listener::RuleListener;
use crate::memory::TransientMemory;
use crate::network::{BetaNode, ConditionId, NodeId, Rulebase};
use crate::token::{Activation, Element, Matched, Token};
use crate::transport::group_by;
use crate::value::Value;

/// One mutation cycle's view of the engine: rulebase, transient memory,
/// listeners, and the production currently firing (for no-loop).
pub(crate) struct Propagation<'a> {
    pub(crate) rulebase: &'a Rulebase,
    pub(crate) memory: &'a mut TransientMemory,
    pub(crate) listeners: &'a [Arc<dyn RuleListener>],
    pub(crate) current_production: Option<NodeId>,
}

/// Order-preserving grouping of facts by their type tag.
fn group_facts_by_type(facts: &[Fact]) -> Vec<(FactType, Vec<Fact>)> {
    let mut groups: Vec<(FactType, Vec<Fact>)> = Vec::new();
    for fact in facts {
        let ftype = fact.fact_type();
        match groups.iter_mut().find(|(existing, _)| existing == ftype) {
            Some((_, group)) => group.push(fact.clone()),
            None => groups.push((ftype.clone(), vec![fact.clone()])),
        }
    }
    groups
}

/// Build the composite token an accumulate node emits for a left token and
/// a reduced state.
fn accum_token(
    token: &Token,
    state: &Value,
    fact_bindings: &Bindings,
    condition: ConditionId,
    accumulator: &Accumulator,
    result_binding: Option<&String>,
) -> Token {
    let converted = accumulator.convert(state);
    let mut extra = fact_bindings.clone();
    if let Some(var) = result_binding {
        extra.bind(var.clone(), converted.clone());
    }
    let mut matches = token.matches.clone();
    matches.push((Matched::Derived(converted), condition));
    Token {
        matches,
        bindings: token.bindings.merge(&extra),
    }
}

impl<'a> Propagation<'a> {
    pub(crate) fn new(
        rulebase: &'a Rulebase,
        memory: &'a mut TransientMemory,
        listeners: &'a [Arc<dyn RuleListener>],
    ) -> Self {
        Self {
            rulebase,
            memory,
            listeners,
            current_production: None,
        }
    }

    /// Present facts to the alpha roots registered under their types and
    /// propagate the resulting elements.
    pub(crate) fn insert_facts(&mut self, facts: &[Fact]) {
        if facts.is_empty() {
            return;
        }
        for listener in self.listeners {
            listener.insert_facts(facts);
        }
        let rulebase = self.rulebase;
        for (ftype, group) in group_facts_by_type(facts) {
            for &alpha_id in rulebase.alpha_roots_for(&ftype) {
                let alpha = rulebase.alpha(alpha_id);
                let elements = alpha.matches(&group);
                if !elements.is_empty() {
                    self.send_elements(alpha.children(), &elements);
                }
            }
        }
    }

    /// Inverse of [`Self::insert_facts`]: re-derive the elements each alpha
    /// root produced and retract them.
    pub(crate) fn retract_facts(&mut self, facts: &[Fact]) {
        if facts.is_empty() {
            return;
        }
        for listener in self.listeners {
            listener.retract_facts(facts);
        }
        let rulebase = self.rulebase;
        for (ftype, group) in group_facts_by_type(facts) {
            for &alpha_id in rulebase.alpha_roots_for(&ftype) {
                let alpha = rulebase.alpha(alpha_id);
                let elements = alpha.matches(&group);
                if !elements.is_empty() {
                    self.retract_elements(alpha.children(), &elements);
                }
            }
        }
    }

    pub(crate) fn right_activate(
        &mut self,
        node_id: NodeId,
        join_bindings: &Bindings,
        elements: Vec<Element>,
    ) {
        for listener in self.listeners {
            listener.right_activate(node_id, &elements);
        }
        let rulebase = self.rulebase;
        let node = rulebase.beta(node_id);
        trace!(node = %node.description(), count = elements.len(), "right-activate");
        match node {
            BetaNode::RootJoin {
                condition,
                children,
            } => {
                self.memory
                    .add_elements(node_id, join_bindings, elements.clone());
                let tokens: Vec<Token> = elements
                    .iter()
                    .map(|e| {
                        Token::empty().extend(
                            Matched::Fact(e.fact.clone()),
                            *condition,
                            &e.bindings,
                        )
                    })
                    .collect();
                self.send_tokens(children, &tokens);
            }
            BetaNode::Join {
                condition,
                children,
                ..
            } => {
                self.memory
                    .add_elements(node_id, join_bindings, elements.clone());
                let stored = self.memory.tokens(node_id, join_bindings).to_vec();
                let mut out = Vec::with_capacity(elements.len() * stored.len());
                for element in &elements {
                    for token in &stored {
                        out.push(token.extend(
                            Matched::Fact(element.fact.clone()),
                            *condition,
                            &element.bindings,
                        ));
                    }
                }
                if !out.is_empty() {
                    self.send_tokens(children, &out);
                }
            }
            BetaNode::Negation { children, .. } => {
                let had_elements = !self.memory.elements(node_id, join_bindings).is_empty();
                self.memory.add_elements(node_id, join_bindings, elements);
                if !had_elements {
                    // The stored tokens were propagated while the element
                    // set was empty; they are no longer negatively satisfied.
                    let blocked = self.memory.tokens(node_id, join_bindings).to_vec();
                    if !blocked.is_empty() {
                        self.retract_tokens(children, &blocked);
                    }
                }
            }
            BetaNode::Accumulate { accumulator, .. } => {
                self.memory
                    .add_elements(node_id, join_bindings, elements.clone());
                let pairs = accumulator.pre_reduce(&elements);
                self.right_activate_reduced(node_id, join_bindings, pairs);
            }
            BetaNode::Test { .. } | BetaNode::Production { .. } | BetaNode::Query { .. } => {
                trace!(node = %node.description(), "ignoring right activation");
            }
        }
    }

    /// Merge externally reduced (fact-bindings, state) pairs into an
    /// accumulate node and re-emit its accumulated tokens.
    pub(crate) fn right_activate_reduced(
        &mut self,
        node_id: NodeId,
        join_bindings: &Bindings,
        pairs: Vec<(Bindings, Value)>,
    ) {
        let rulebase = self.rulebase;
        let BetaNode::Accumulate {
            condition,
            accumulator,
            result_binding,
            children,
            ..
        } = rulebase.beta(node_id)
        else {
            return;
        };
        for (fact_bindings, reduced) in pairs {
            let previous = self
                .memory
                .accum_reduced(node_id, join_bindings, &fact_bindings)
                .cloned();
            let matched = self.memory.tokens(node_id, join_bindings).to_vec();

            if let Some(prev) = &previous {
                let old: Vec<Token> = matched
                    .iter()
                    .map(|t| {
                        accum_token(
                            t,
                            prev,
                            &fact_bindings,
                            *condition,
                            accumulator,
                            result_binding.as_ref(),
                        )
                    })
                    .collect();
                if !old.is_empty() {
                    self.retract_tokens(children, &old);
                }
            }

            let combined = match &previous {
                Some(prev) => accumulator.combine(prev, &reduced),
                None => reduced,
            };
            self.memory.set_accum_reduced(
                node_id,
                join_bindings,
                fact_bindings.clone(),
                combined.clone(),
            );
            for listener in self.listeners {
                listener.add_accum_reduced(node_id, join_bindings, &combined, &fact_bindings);
            }

            let fresh: Vec<Token> = matched
                .iter()
                .map(|t| {
                    accum_token(
                        t,
                        &combined,
                        &fact_bindings,
                        *condition,
                        accumulator,
                        result_binding.as_ref(),
                    )
                })
                .collect();
            if !fresh.is_empty() {
                self.send_tokens(children, &fresh);
            }
        }
    }

    pub(crate) fn right_retract(
        &mut self,
        node_id: NodeId,
        join_bindings: &Bindings,
        elements: Vec<Element>,
    ) {
        for listener in self.listeners {
            listener.right_retract(node_id, &elements);
        }
        let rulebase = self.rulebase;
        let node = rulebase.beta(node_id);
        trace!(node = %node.description(), count = elements.len(), "right-retract");
        match node {
            BetaNode::RootJoin {
                condition,
                children,
            } => {
                let removed = self.memory.remove_elements(node_id, join_bindings, &elements);
                let tokens: Vec<Token> = removed
                    .iter()
                    .map(|e| {
                        Token::empty().extend(
                            Matched::Fact(e.fact.clone()),
                            *condition,
                            &e.bindings,
                        )
                    })
                    .collect();
                if !tokens.is_empty() {
                    self.retract_tokens(children, &tokens);
                }
            }
            BetaNode::Join {
                condition,
                children,
                ..
            } => {
                let removed = self.memory.remove_elements(node_id, join_bindings, &elements);
                let stored = self.memory.tokens(node_id, join_bindings).to_vec();
                let mut out = Vec::with_capacity(removed.len() * stored.len());
                for element in &removed {
                    for token in &stored {
                        out.push(token.extend(
                            Matched::Fact(element.fact.clone()),
                            *condition,
                            &element.bindings,
                        ));
                    }
                }
                if !out.is_empty() {
                    self.retract_tokens(children, &out);
                }
            }
            BetaNode::Negation { children, .. } => {
                // Remove first, then re-emit only if the set became empty.
                let removed = self.memory.remove_elements(node_id, join_bindings, &elements);
                if !removed.is_empty()
                    && self.memory.elements(node_id, join_bindings).is_empty()
                {
                    let stored = self.memory.tokens(node_id, join_bindings).to_vec();
                    if !stored.is_empty() {
                        self.send_tokens(children, &stored);
                    }
                }
            }
            BetaNode::Accumulate { .. } => {
                self.accumulate_right_retract(node_id, join_bindings, &elements);
            }
            BetaNode::Test { .. } | BetaNode::Production { .. } | BetaNode::Query { .. } => {
                trace!(node = %node.description(), "ignoring right retraction");
            }
        }
    }

    fn accumulate_right_retract(
        &mut self,
        node_id: NodeId,
        join_bindings: &Bindings,
        elements: &[Element],
    ) {
        let rulebase = self.rulebase;
        let BetaNode::Accumulate {
            condition,
            accumulator,
            result_binding,
            binding_keys,
            children,
            ..
        } = rulebase.beta(node_id)
        else {
            return;
        };
        let removed = self.memory.remove_elements(node_id, join_bindings, elements);
        if removed.is_empty() {
            return;
        }
        let matched = self.memory.tokens(node_id, join_bindings).to_vec();

        for (fact_bindings, group) in group_by(&removed, |e| e.bindings.clone()) {
            let Some(previous) = self
                .memory
                .accum_reduced(node_id, join_bindings, &fact_bindings)
                .cloned()
            else {
                continue;
            };

            let remaining: Vec<Fact> = self
                .memory
                .elements(node_id, join_bindings)
                .iter()
                .filter(|e| e.bindings == fact_bindings)
                .map(|e| e.fact.clone())
                .collect();

            let new_state = if remaining.is_empty() {
                // The group is gone. It persists at the initial value only
                // for tokens that themselves determine the group bindings;
                // element-derived groups disappear with their last element.
                match accumulator.initial() {
                    Some(init)
                        if matched.iter().any(|t| {
                            t.bindings.contains_all(binding_keys)
                                && t.bindings.project(binding_keys) == fact_bindings
                        }) =>
                    {
                        Some(init.clone())
                    }
                    _ => None,
                }
            } else {
                // Incremental retraction, falling back to a re-fold of the
                // remaining elements when the fold is not invertible.
                let mut state = Some(previous.clone());
                for element in &group {
                    state = state.and_then(|s| accumulator.retract(&s, &element.fact));
                }
                match state {
                    Some(s) => Some(s),
                    None => accumulator.fold(remaining.iter()),
                }
            };

            let old: Vec<Token> = matched
                .iter()
                .map(|t| {
                    accum_token(
                        t,
                        &previous,
                        &fact_bindings,
                        *condition,
                        accumulator,
                        result_binding.as_ref(),
                    )
                })
                .collect();
            if !old.is_empty() {
                self.retract_tokens(children, &old);
            }

            match new_state {
                Some(state) => {
                    self.memory.set_accum_reduced(
                        node_id,
                        join_bindings,
                        fact_bindings.clone(),
                        state.clone(),
                    );
                    for listener in self.listeners {
                        listener.add_accum_reduced(
                            node_id,
                            join_bindings,
                            &state,
                            &fact_bindings,
                        );
                    }
                    let fresh: Vec<Token> = matched
                        .iter()
                        .map(|t| {
                            accum_token(
                                t,
                                &state,
                                &fact_bindings,
                                *condition,
                                accumulator,
                                result_binding.as_ref(),
                            )
                        })
                        .collect();
                    if !fresh.is_empty() {
                        self.send_tokens(children, &fresh);
                    }
                }
                None => {
                    self.memory
                        .remove_accum_reduced(node_id, join_bindings, &fact_bindings);
                }
            }
        }
    }

    pub(crate) fn left_activate(
        &mut self,
        node_id: NodeId,
        join_bindings: &Bindings,
        tokens: Vec<Token>,
    ) {
        for listener in self.listeners {
            listener.left_activate(node_id, &tokens);
        }
        let rulebase = self.rulebase;
        let node = rulebase.beta(node_id);
        trace!(node = %node.description(), count = tokens.len(), "left-activate");
        match node {
            // The left side of a root join is forever the empty token.
            BetaNode::RootJoin { .. } => {}
            BetaNode::Join {
                condition,
                children,
                ..
            } => {
                self.memory
                    .add_tokens(node_id, join_bindings, tokens.clone());
                let stored = self.memory.elements(node_id, join_bindings).to_vec();
                let mut out = Vec::with_capacity(stored.len() * tokens.len());
                for element in &stored {
                    for token in &tokens {
                        out.push(token.extend(
                            Matched::Fact(element.fact.clone()),
                            *condition,
                            &element.bindings,
                        ));
                    }
                }
                if !out.is_empty() {
                    self.send_tokens(children, &out);
                }
            }
            BetaNode::Negation { children, .. } => {
                self.memory
                    .add_tokens(node_id, join_bindings, tokens.clone());
                if self.memory.elements(node_id, join_bindings).is_empty() {
                    self.send_tokens(children, &tokens);
                }
            }
            BetaNode::Test { test, children } => {
                let passing: Vec<Token> =
                    tokens.into_iter().filter(|t| test(&t.bindings)).collect();
                if !passing.is_empty() {
                    self.send_tokens(children, &passing);
                }
            }
            BetaNode::Accumulate {
                condition,
                accumulator,
                result_binding,
                binding_keys,
                children,
                ..
            } => {
                self.memory
                    .add_tokens(node_id, join_bindings, tokens.clone());
                let reductions = self
                    .memory
                    .accum_reductions(node_id, join_bindings)
                    .to_vec();
                if reductions.is_empty() {
                    let Some(init) = accumulator.initial().cloned() else {
                        return;
                    };
                    let mut out = Vec::new();
                    for token in &tokens {
                        if !token.bindings.contains_all(binding_keys) {
                            continue;
                        }
                        let fact_bindings = token.bindings.project(binding_keys);
                        self.memory.set_accum_reduced(
                            node_id,
                            join_bindings,
                            fact_bindings.clone(),
                            init.clone(),
                        );
                        for listener in self.listeners {
                            listener.add_accum_reduced(
                                node_id,
                                join_bindings,
                                &init,
                                &fact_bindings,
                            );
                        }
                        out.push(accum_token(
                            token,
                            &init,
                            &fact_bindings,
                            *condition,
                            accumulator,
                            result_binding.as_ref(),
                        ));
                    }
                    if !out.is_empty() {
                        self.send_tokens(children, &out);
                    }
                } else {
                    let mut out = Vec::with_capacity(tokens.len() * reductions.len());
                    for token in &tokens {
                        for (fact_bindings, state) in &reductions {
                            out.push(accum_token(
                                token,
                                state,
                                fact_bindings,
                                *condition,
                                accumulator,
                                result_binding.as_ref(),
                            ));
                        }
                    }
                    self.send_tokens(children, &out);
                }
            }
            BetaNode::Production {
                name,
                salience,
                no_loop,
                ..
            } => {
                self.memory
                    .add_tokens(node_id, join_bindings, tokens.clone());
                if *no_loop && self.current_production == Some(node_id) {
                    trace!(rule = %name, "no-loop: suppressing self-activation");
                    return;
                }
                let activations: Vec<Activation> = tokens
                    .into_iter()
                    .map(|token| Activation {
                        node: node_id,
                        token,
                        salience: *salience,
                    })
                    .collect();
                self.memory.add_activations(&activations);
                for listener in self.listeners {
                    listener.add_activations(&activations);
                }
            }
            BetaNode::Query { .. } => {
                self.memory.add_tokens(node_id, join_bindings, tokens);
            }
        }
    }

    pub(crate) fn left_retract(
        &mut self,
        node_id: NodeId,
        join_bindings: &Bindings,
        tokens: Vec<Token>,
    ) {
        for listener in self.listeners {
            listener.left_retract(node_id, &tokens);
        }
        let rulebase = self.rulebase;
        let node = rulebase.beta(node_id);
        trace!(node = %node.description(), count = tokens.len(), "left-retract");
        match node {
            BetaNode::RootJoin { .. } => {}
            BetaNode::Join {
                condition,
                children,
                ..
            } => {
                let removed = self.memory.remove_tokens(node_id, join_bindings, &tokens);
                let stored = self.memory.elements(node_id, join_bindings).to_vec();
                let mut out = Vec::with_capacity(stored.len() * removed.len());
                for element in &stored {
                    for token in &removed {
                        out.push(token.extend(
                            Matched::Fact(element.fact.clone()),
                            *condition,
                            &element.bindings,
                        ));
                    }
                }
                if !out.is_empty() {
                    self.retract_tokens(children, &out);
                }
            }
            BetaNode::Negation { children, .. } => {
                let removed = self.memory.remove_tokens(node_id, join_bindings, &tokens);
                if !removed.is_empty()
                    && self.memory.elements(node_id, join_bindings).is_empty()
                {
                    self.retract_tokens(children, &removed);
                }
            }
            // The predicate is pure over bindings: everything previously
            // forwarded also passed, so retractions forward untested.
            BetaNode::Test { children, .. } => {
                self.retract_tokens(children, &tokens);
            }
            BetaNode::Accumulate {
                condition,
                accumulator,
                result_binding,
                children,
                ..
            } => {
                let removed = self.memory.remove_tokens(node_id, join_bindings, &tokens);
                if removed.is_empty() {
                    return;
                }
                let reductions = self
                    .memory
                    .accum_reductions(node_id, join_bindings)
                    .to_vec();
                let mut out = Vec::with_capacity(removed.len() * reductions.len());
                for token in &removed {
                    for (fact_bindings, state) in &reductions {
                        out.push(accum_token(
                            token,
                            state,
                            fact_bindings,
                            *condition,
                            accumulator,
                            result_binding.as_ref(),
                        ));
                    }
                }
                if !out.is_empty() {
                    self.retract_tokens(children, &out);
                }
            }
            BetaNode::Production { salience, .. } => {
                let removed = self.memory.remove_tokens(node_id, join_bindings, &tokens);
                if removed.is_empty() {
                    return;
                }
                let activations: Vec<Activation> = removed
                    .iter()
                    .map(|token| Activation {
                        node: node_id,
                        token: token.clone(),
                        salience: *salience,
                    })
                    .collect();
                let dropped = self.memory.remove_activations(&activations);
                if !dropped.is_empty() {
                    for listener in self.listeners {
                        listener.remove_activations(&dropped);
                    }
                }
                // Cascade: facts this token's RHS inserted are retracted
                // through the alpha network.
                for token in &removed {
                    let facts = self.memory.remove_insertions(node_id, token);
                    if !facts.is_empty() {
                        self.retract_facts(&facts);
                    }
                }
            }
            BetaNode::Query { .. } => {
                self.memory.remove_tokens(node_id, join_bindings, &tokens);
            }
        }
    }
}

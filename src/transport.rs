//! Transport: routes tokens and elements to downstream nodes, grouping by
//! each target's join bindings.
//!
//! The transport owns no state; batching is purely a fan-out discipline.
//! Grouping is order-preserving over the input so listener traces are
//! reproducible across runs.

use crate::bindings::Bindings;
use crate::network::propagate::Propagation;
use crate::network::NodeId;
use crate::token::{Element, Token};

/// Order-preserving group-by: groups appear in first-seen order and items
/// keep their input order within a group.
pub(crate) fn group_by<T, F>(items: &[T], key: F) -> Vec<(Bindings, Vec<T>)>
where
    T: Clone,
    F: Fn(&T) -> Bindings,
{
    let mut groups: Vec<(Bindings, Vec<T>)> = Vec::new();
    for item in items {
        let k = key(item);
        match groups.iter_mut().find(|(existing, _)| *existing == k) {
            Some((_, group)) => group.push(item.clone()),
            None => groups.push((k, vec![item.clone()])),
        }
    }
    groups
}

impl Propagation<'_> {
    /// Fan elements out to each node, grouped by the projection of their
    /// bindings onto the node's join keys. Nodes without join keys receive
    /// the whole batch in a single call.
    pub(crate) fn send_elements(&mut self, nodes: &[NodeId], elements: &[Element]) {
        let rulebase = self.rulebase;
        for &node in nodes {
            let keys = rulebase.beta(node).join_keys();
            if keys.is_empty() {
                if !elements.is_empty() {
                    self.right_activate(node, &Bindings::new(), elements.to_vec());
                }
            } else {
                for (join_bindings, group) in group_by(elements, |e| e.bindings.project(keys)) {
                    self.right_activate(node, &join_bindings, group);
                }
            }
        }
    }

    /// Fan tokens out to each node, grouped like [`Self::send_elements`].
    pub(crate) fn send_tokens(&mut self, nodes: &[NodeId], tokens: &[Token]) {
        let rulebase = self.rulebase;
        for &node in nodes {
            let keys = rulebase.beta(node).join_keys();
            if keys.is_empty() {
                if !tokens.is_empty() {
                    self.left_activate(node, &Bindings::new(), tokens.to_vec());
                }
            } else {
                for (join_bindings, group) in group_by(tokens, |t| t.bindings.project(keys)) {
                    self.left_activate(node, &join_bindings, group);
                }
            }
        }
    }

    /// Retraction fan-out: group by full bindings, then restrict each group
    /// to the target node's join keys.
    pub(crate) fn retract_elements(&mut self, nodes: &[NodeId], elements: &[Element]) {
        let rulebase = self.rulebase;
        for &node in nodes {
            let keys = rulebase.beta(node).join_keys();
            for (full, group) in group_by(elements, |e| e.bindings.clone()) {
                let join_bindings = full.project(keys);
                self.right_retract(node, &join_bindings, group);
            }
        }
    }

    /// Token retraction fan-out, mirroring [`Self::retract_elements`].
    pub(crate) fn retract_tokens(&mut self, nodes: &[NodeId], tokens: &[Token]) {
        let rulebase = self.rulebase;
        for &node in nodes {
            let keys = rulebase.beta(node).join_keys();
            for (full, group) in group_by(tokens, |t| t.bindings.clone()) {
                let join_bindings = full.project(keys);
                self.left_retract(node, &join_bindings, group);
            }
        }
    }
}

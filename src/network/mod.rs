//! The typed node graph: alpha network, beta network, and the rulebase.
//!
//! Nodes live in flat arenas indexed by id; node kinds are tagged variants
//! so the propagation engine dispatches with a `match` instead of virtual
//! calls. The [`RulebaseBuilder`] is the construction surface the rule
//! compiler (an external collaborator) drives; tests drive it directly.

pub mod alpha;
pub(crate) mod propagate;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accumulate::Accumulator;
use crate::bindings::Bindings;
use crate::conditions::{AlphaEnv, AlphaFn};
use crate::error::{BuildError, ForgeResult};
use crate::fact::FactType;
use crate::session::RuleContext;
use crate::token::Token;

pub use alpha::AlphaNode;

/// Index of a beta node in the rulebase arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// Wrap a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Index of an alpha node in the rulebase arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlphaId(usize);

impl AlphaId {
    /// Wrap a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Identity of a compiled condition, used in token provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(usize);

impl ConditionId {
    /// Wrap a raw condition index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw condition index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A stateless predicate over token bindings, used by test nodes.
pub type TestFn = Arc<dyn Fn(&Bindings) -> bool + Send + Sync>;

/// A production's right-hand side. Receives the firing context, the matched
/// token, and the production's compile-time environment.
pub type RhsFn = Arc<
    dyn for<'p, 'a> Fn(&mut RuleContext<'p, 'a>, &Token, &Bindings) -> ForgeResult<()>
        + Send
        + Sync,
>;

/// Wrap a closure as an [`RhsFn`].
pub fn rhs<F>(f: F) -> RhsFn
where
    F: for<'p, 'a> Fn(&mut RuleContext<'p, 'a>, &Token, &Bindings) -> ForgeResult<()>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// A production registered with the rulebase builder.
///
/// # Examples
///
/// ```rust,ignore
/// let production = Production::new("adult", rhs)
///     .with_salience(10)
///     .with_no_loop(true);
/// ```
#[derive(Clone)]
pub struct Production {
    pub(crate) name: String,
    pub(crate) env: Bindings,
    pub(crate) salience: i32,
    pub(crate) no_loop: bool,
    pub(crate) rhs: RhsFn,
}

impl Production {
    /// Create a production with default salience (0) and no-loop off.
    #[must_use]
    pub fn new(name: impl Into<String>, rhs: RhsFn) -> Self {
        Self {
            name: name.into(),
            env: Bindings::new(),
            salience: 0,
            no_loop: false,
            rhs,
        }
    }

    /// Set the agenda priority. Higher fires first.
    #[must_use]
    pub fn with_salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    /// Suppress this production from activating itself during its own RHS.
    #[must_use]
    pub fn with_no_loop(mut self, no_loop: bool) -> Self {
        self.no_loop = no_loop;
        self
    }

    /// Set the compile-time environment handed to the RHS on every firing.
    #[must_use]
    pub fn with_env(mut self, env: Bindings) -> Self {
        self.env = env;
        self
    }
}

impl std::fmt::Debug for Production {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Production")
            .field("name", &self.name)
            .field("salience", &self.salience)
            .field("no_loop", &self.no_loop)
            .finish_non_exhaustive()
    }
}

/// A beta network node.
///
/// Left inputs carry tokens, right inputs carry elements; each variant has
/// its own activation rules (see the propagation engine).
#[derive(Clone)]
pub enum BetaNode {
    /// Entry join: its left side is forever the empty token. One child
    /// token per incoming element.
    RootJoin {
        /// Condition recorded in emitted tokens' provenance.
        condition: ConditionId,
        /// Downstream nodes.
        children: Vec<NodeId>,
    },
    /// Inner join: cross-product of stored tokens and stored elements that
    /// agree on the join keys.
    Join {
        /// Condition recorded in emitted tokens' provenance.
        condition: ConditionId,
        /// Variables both sides must agree on.
        join_keys: Vec<String>,
        /// Downstream nodes.
        children: Vec<NodeId>,
    },
    /// Emits tokens only while the right-side element set for the join
    /// bindings is empty.
    Negation {
        /// Variables both sides must agree on.
        join_keys: Vec<String>,
        /// Downstream nodes.
        children: Vec<NodeId>,
    },
    /// Stateless filter over token bindings.
    Test {
        /// The predicate; must be pure over bindings.
        test: TestFn,
        /// Downstream nodes.
        children: Vec<NodeId>,
    },
    /// Folds matching elements into a derived value per binding group.
    Accumulate {
        /// Condition recorded in emitted tokens' provenance.
        condition: ConditionId,
        /// The fold specification.
        accumulator: Accumulator,
        /// Variable the converted result is bound to, if any.
        result_binding: Option<String>,
        /// Variables the accumulated condition binds (group identity).
        binding_keys: Vec<String>,
        /// Variables both sides must agree on.
        join_keys: Vec<String>,
        /// Downstream nodes.
        children: Vec<NodeId>,
    },
    /// Terminal: queues activations on the agenda.
    Production {
        /// Rule name, used in errors and traces.
        name: String,
        /// Compile-time environment handed to the RHS.
        env: Bindings,
        /// Agenda priority.
        salience: i32,
        /// Self-activation suppression flag.
        no_loop: bool,
        /// The right-hand side.
        rhs: RhsFn,
    },
    /// Terminal: stores tokens for parameterised lookup.
    Query {
        /// Registered query name.
        name: String,
        /// Parameter keys; stored tokens are keyed by their projection.
        param_keys: Vec<String>,
    },
}

impl BetaNode {
    /// The variables this node groups its inputs by.
    #[must_use]
    pub fn join_keys(&self) -> &[String] {
        match self {
            Self::Join { join_keys, .. }
            | Self::Negation { join_keys, .. }
            | Self::Accumulate { join_keys, .. } => join_keys,
            Self::Query { param_keys, .. } => param_keys,
            Self::RootJoin { .. } | Self::Test { .. } | Self::Production { .. } => &[],
        }
    }

    /// Downstream nodes; terminals have none.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        match self {
            Self::RootJoin { children, .. }
            | Self::Join { children, .. }
            | Self::Negation { children, .. }
            | Self::Test { children, .. }
            | Self::Accumulate { children, .. } => children,
            Self::Production { .. } | Self::Query { .. } => &[],
        }
    }

    /// A short human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::RootJoin { .. } => "root-join".to_string(),
            Self::Join { join_keys, .. } => format!("join on {join_keys:?}"),
            Self::Negation { join_keys, .. } => format!("negation on {join_keys:?}"),
            Self::Test { .. } => "test".to_string(),
            Self::Accumulate { join_keys, .. } => format!("accumulate on {join_keys:?}"),
            Self::Production { name, .. } => format!("production '{name}'"),
            Self::Query { name, .. } => format!("query '{name}'"),
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::RootJoin { .. } => "root-join",
            Self::Join { .. } => "join",
            Self::Negation { .. } => "negation",
            Self::Test { .. } => "test",
            Self::Accumulate { .. } => "accumulate",
            Self::Production { .. } => "production",
            Self::Query { .. } => "query",
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            Self::RootJoin { children, .. }
            | Self::Join { children, .. }
            | Self::Negation { children, .. }
            | Self::Test { children, .. }
            | Self::Accumulate { children, .. } => Some(children),
            Self::Production { .. } | Self::Query { .. } => None,
        }
    }
}

impl std::fmt::Debug for BetaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BetaNode({})", self.description())
    }
}

/// The compiled rule network: alpha roots keyed by fact type, the beta node
/// arena, beta roots seeded with the empty token, and the production and
/// query registries.
pub struct Rulebase {
    conditions: Vec<String>,
    alpha: Vec<AlphaNode>,
    beta: Vec<BetaNode>,
    alpha_roots: HashMap<FactType, Vec<AlphaId>>,
    beta_roots: Vec<NodeId>,
    productions: Vec<NodeId>,
    queries: HashMap<String, NodeId>,
}

impl Rulebase {
    /// The alpha node at `id`.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this rulebase's builder.
    #[must_use]
    pub fn alpha(&self, id: AlphaId) -> &AlphaNode {
        &self.alpha[id.index()]
    }

    /// The beta node at `id`.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this rulebase's builder.
    #[must_use]
    pub fn beta(&self, id: NodeId) -> &BetaNode {
        &self.beta[id.index()]
    }

    /// Alpha roots registered for a fact type; empty for unknown types.
    #[must_use]
    pub fn alpha_roots_for(&self, fact_type: &FactType) -> &[AlphaId] {
        self.alpha_roots
            .get(fact_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Nodes that receive the empty token at session construction.
    #[must_use]
    pub fn beta_roots(&self) -> &[NodeId] {
        &self.beta_roots
    }

    /// All production nodes.
    #[must_use]
    pub fn productions(&self) -> &[NodeId] {
        &self.productions
    }

    /// Look up a query node by registered name.
    #[must_use]
    pub fn query_node(&self, name: &str) -> Option<NodeId> {
        self.queries.get(name).copied()
    }

    /// The label of a compiled condition.
    #[must_use]
    pub fn condition_label(&self, id: ConditionId) -> Option<&str> {
        self.conditions.get(id.index()).map(String::as_str)
    }

    /// Number of beta nodes.
    #[must_use]
    pub fn beta_len(&self) -> usize {
        self.beta.len()
    }
}

impl std::fmt::Debug for Rulebase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rulebase")
            .field("alpha_nodes", &self.alpha.len())
            .field("beta_nodes", &self.beta.len())
            .field("productions", &self.productions.len())
            .field("queries", &self.queries.len())
            .finish()
    }
}

/// Programmatic construction surface for [`Rulebase`].
///
/// The rule compiler allocates conditions and nodes, wires alpha roots to
/// beta children, and links beta parents to children. `build` validates the
/// wiring.
///
/// # Examples
///
/// ```rust,ignore
/// let mut builder = RulebaseBuilder::new();
/// let cond = builder.condition("Person{age >= 21}");
/// let alpha = builder.alpha("Person", AlphaEnv::new(), activation);
/// let root = builder.root_join(cond);
/// builder.link_alpha(alpha, root)?;
/// let rulebase = builder.build()?;
/// ```
#[derive(Default)]
pub struct RulebaseBuilder {
    conditions: Vec<String>,
    alpha: Vec<AlphaNode>,
    beta: Vec<BetaNode>,
    alpha_roots: HashMap<FactType, Vec<AlphaId>>,
    beta_roots: Vec<NodeId>,
    productions: Vec<NodeId>,
    query_names: Vec<(String, NodeId)>,
}

impl RulebaseBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a condition label for token provenance.
    pub fn condition(&mut self, label: impl Into<String>) -> ConditionId {
        self.conditions.push(label.into());
        ConditionId::new(self.conditions.len() - 1)
    }

    /// Register an alpha node under its fact type's roots.
    pub fn alpha(
        &mut self,
        fact_type: impl Into<FactType>,
        env: AlphaEnv,
        activation: AlphaFn,
    ) -> AlphaId {
        let fact_type = fact_type.into();
        let id = AlphaId::new(self.alpha.len());
        self.alpha
            .push(AlphaNode::new(fact_type.clone(), env, activation));
        self.alpha_roots.entry(fact_type).or_default().push(id);
        id
    }

    fn push_beta(&mut self, node: BetaNode) -> NodeId {
        let id = NodeId::new(self.beta.len());
        self.beta.push(node);
        id
    }

    /// Add a root join; it is registered as a beta root automatically.
    pub fn root_join(&mut self, condition: ConditionId) -> NodeId {
        let id = self.push_beta(BetaNode::RootJoin {
            condition,
            children: Vec::new(),
        });
        self.beta_roots.push(id);
        id
    }

    /// Add an inner join over the given keys.
    pub fn join(&mut self, condition: ConditionId, join_keys: Vec<String>) -> NodeId {
        self.push_beta(BetaNode::Join {
            condition,
            join_keys,
            children: Vec::new(),
        })
    }

    /// Add a negation over the given keys.
    pub fn negation(&mut self, join_keys: Vec<String>) -> NodeId {
        self.push_beta(BetaNode::Negation {
            join_keys,
            children: Vec::new(),
        })
    }

    /// Add a stateless test node.
    pub fn test(&mut self, test: TestFn) -> NodeId {
        self.push_beta(BetaNode::Test {
            test,
            children: Vec::new(),
        })
    }

    /// Add an accumulate node.
    pub fn accumulate(
        &mut self,
        condition: ConditionId,
        accumulator: Accumulator,
        result_binding: Option<String>,
        binding_keys: Vec<String>,
        join_keys: Vec<String>,
    ) -> NodeId {
        self.push_beta(BetaNode::Accumulate {
            condition,
            accumulator,
            result_binding,
            binding_keys,
            join_keys,
            children: Vec::new(),
        })
    }

    /// Add a production node.
    pub fn production(&mut self, production: Production) -> NodeId {
        let Production {
            name,
            env,
            salience,
            no_loop,
            rhs,
        } = production;
        let id = self.push_beta(BetaNode::Production {
            name,
            env,
            salience,
            no_loop,
            rhs,
        });
        self.productions.push(id);
        id
    }

    /// Add a query node.
    pub fn query(&mut self, name: impl Into<String>, param_keys: Vec<String>) -> NodeId {
        let name = name.into();
        let id = self.push_beta(BetaNode::Query {
            name: name.clone(),
            param_keys,
        });
        self.query_names.push((name, id));
        id
    }

    /// Mark a node as a beta root (it receives the empty token at session
    /// construction). Root joins are marked automatically; use this for a
    /// negation or accumulate standing first in a rule.
    pub fn mark_root(&mut self, node: NodeId) -> ForgeResult<()> {
        if node.index() >= self.beta.len() {
            return Err(BuildError::UnknownNode(node).into());
        }
        self.beta_roots.push(node);
        Ok(())
    }

    /// Wire an alpha node to a beta child (its right input).
    pub fn link_alpha(&mut self, alpha: AlphaId, child: NodeId) -> ForgeResult<()> {
        if child.index() >= self.beta.len() {
            return Err(BuildError::UnknownNode(child).into());
        }
        let Some(node) = self.alpha.get_mut(alpha.index()) else {
            return Err(BuildError::UnknownAlpha(alpha).into());
        };
        node.add_child(child);
        Ok(())
    }

    /// Wire a beta parent to a beta child (its left input).
    pub fn link(&mut self, parent: NodeId, child: NodeId) -> ForgeResult<()> {
        if child.index() >= self.beta.len() {
            return Err(BuildError::UnknownNode(child).into());
        }
        let Some(node) = self.beta.get_mut(parent.index()) else {
            return Err(BuildError::UnknownNode(parent).into());
        };
        let kind = node.kind();
        let Some(children) = node.children_mut() else {
            return Err(BuildError::TerminalParent { node: parent, kind }.into());
        };
        children.push(child);
        Ok(())
    }

    /// Validate and produce the rulebase.
    pub fn build(self) -> ForgeResult<Rulebase> {
        let mut queries = HashMap::new();
        for (name, id) in self.query_names {
            if queries.insert(name.clone(), id).is_some() {
                return Err(BuildError::DuplicateQuery { name }.into());
            }
        }
        Ok(Rulebase {
            conditions: self.conditions,
            alpha: self.alpha,
            beta: self.beta,
            alpha_roots: self.alpha_roots,
            beta_roots: self.beta_roots,
            productions: self.productions,
            queries,
        })
    }
}

impl std::fmt::Debug for RulebaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulebaseBuilder")
            .field("alpha_nodes", &self.alpha.len())
            .field("beta_nodes", &self.beta.len())
            .finish()
    }
}

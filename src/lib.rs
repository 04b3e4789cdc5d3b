//! # ruleforge - forward-chaining rules on a Rete-style network
//!
//! ruleforge is a production-rule engine: rules (conditions paired with
//! actions) and queries (conditions paired with parameters) are compiled
//! into a discrimination network, and a session keeps the set of matches
//! incrementally consistent as facts are inserted and retracted.
//!
//! ## Core Concepts
//!
//! - **Fact**: an opaque user record with a type tag indexing the alpha roots
//! - **Token**: a partial match carrying provenance and variable bindings
//! - **Activation**: a pending execution of a rule's RHS for one token
//! - **Session**: an immutable snapshot; every mutation returns a new one
//! - **Listener**: a strict observer of every propagation event, in order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ruleforge::{Bindings, Fact, RulebaseBuilder, Session, conditions};
//!
//! let mut builder = RulebaseBuilder::new();
//! let cond = builder.condition("Person{age >= 21}");
//! let alpha = builder.alpha("Person", Bindings::new(), conditions::all(vec![
//!     conditions::field_cmp("age", conditions::Cmp::Ge, 21),
//!     conditions::bind_field("name", "?n"),
//! ]));
//! let root = builder.root_join(cond);
//! builder.link_alpha(alpha, root)?;
//! let adults = builder.query("adults", vec![]);
//! builder.link(root, adults)?;
//!
//! let session = Session::new(builder.build()?.into())
//!     .insert(&[Fact::new("Person").with("name", "A").with("age", 30)]);
//! assert_eq!(session.query("adults", &Bindings::new())?.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod bindings;
pub mod fact;
pub mod token;
pub mod value;

// Network and machinery
pub mod accumulate;
pub mod conditions;
pub mod error;
pub mod memory;
pub mod network;
pub(crate) mod transport;

// Session surface and observers
pub mod listener;
pub mod session;
pub mod stream;

// Re-export primary types at crate root for convenience
pub use accumulate::Accumulator;
pub use bindings::Bindings;
pub use error::{BuildError, ForgeError, ForgeResult, SessionError, StreamError};
pub use fact::{Fact, FactType};
pub use listener::{DelegatingListener, NullListener, RuleListener, SessionEvent, TraceListener};
pub use memory::{PersistentMemory, TransientMemory};
pub use network::{
    rhs, AlphaId, AlphaNode, BetaNode, ConditionId, NodeId, Production, RhsFn, Rulebase,
    RulebaseBuilder, TestFn,
};
pub use session::{RuleContext, Session, SessionComponents};
pub use stream::{EventStream, StreamEnvelope, StreamListener, SubscriptionId};
pub use token::{Activation, Element, Matched, Token};
pub use value::Value;

//! Accumulators: the fold-over-matches machinery used by accumulate nodes.
//!
//! An accumulator is a mini fold interface: `reduce` folds a fact into
//! state, `combine` merges two states (associative), `retract` undoes a fact
//! from state, and `convert` maps the final state to the value exposed
//! downstream. The fold must be deterministic; without an initial value the
//! accumulator emits nothing on empty input.

use std::sync::Arc;

use crate::bindings::Bindings;
use crate::fact::Fact;
use crate::token::Element;
use crate::value::Value;

/// Folds a fact into the running state. `None` state means no initial value
/// was configured and nothing has been folded yet.
pub type ReduceFn = Arc<dyn Fn(Option<&Value>, &Fact) -> Value + Send + Sync>;

/// Merges two reduced states. Must be associative.
pub type CombineFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Undoes a fact from state. Returning `None` signals the fold cannot be
/// inverted for this fact; the engine then re-folds the remaining elements.
pub type RetractFn = Arc<dyn Fn(&Value, &Fact) -> Option<Value> + Send + Sync>;

/// Maps the final state to the value exposed downstream.
pub type ConvertFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A reduce/combine/retract/convert specification for an accumulate node.
///
/// # Examples
///
/// ```
/// use ruleforge::accumulate;
/// use ruleforge::{Fact, Value};
///
/// let count = accumulate::count();
/// let facts = [Fact::new("Order"), Fact::new("Order")];
/// assert_eq!(count.fold(facts.iter()), Some(Value::Int(2)));
/// ```
#[derive(Clone)]
pub struct Accumulator {
    initial: Option<Value>,
    reduce: ReduceFn,
    combine: CombineFn,
    retract: RetractFn,
    convert: ConvertFn,
}

impl Accumulator {
    /// Assemble an accumulator from its parts.
    #[must_use]
    pub fn new(
        initial: Option<Value>,
        reduce: ReduceFn,
        combine: CombineFn,
        retract: RetractFn,
        convert: ConvertFn,
    ) -> Self {
        Self {
            initial,
            reduce,
            combine,
            retract,
            convert,
        }
    }

    /// The initial state, if any.
    #[must_use]
    pub const fn initial(&self) -> Option<&Value> {
        self.initial.as_ref()
    }

    /// Fold a fact into the state.
    #[must_use]
    pub fn reduce(&self, state: Option<&Value>, fact: &Fact) -> Value {
        (self.reduce)(state, fact)
    }

    /// Merge two states.
    #[must_use]
    pub fn combine(&self, a: &Value, b: &Value) -> Value {
        (self.combine)(a, b)
    }

    /// Undo a fact from the state; `None` means the fold is not invertible
    /// for this fact.
    #[must_use]
    pub fn retract(&self, state: &Value, fact: &Fact) -> Option<Value> {
        (self.retract)(state, fact)
    }

    /// Map the final state to the downstream value.
    #[must_use]
    pub fn convert(&self, state: &Value) -> Value {
        (self.convert)(state)
    }

    /// Fold a group of facts from the initial value.
    ///
    /// Returns `None` when the group is empty and no initial value is
    /// configured.
    #[must_use]
    pub fn fold<'a>(&self, facts: impl IntoIterator<Item = &'a Fact>) -> Option<Value> {
        let mut state = self.initial.clone();
        for fact in facts {
            state = Some(self.reduce(state.as_ref(), fact));
        }
        state
    }

    /// Group elements by their bindings and fold each group from the
    /// initial value, returning (bindings, state) pairs in first-seen group
    /// order. This is the out-of-band half of right activation.
    #[must_use]
    pub fn pre_reduce(&self, elements: &[Element]) -> Vec<(Bindings, Value)> {
        crate::transport::group_by(elements, |e| e.bindings.clone())
            .into_iter()
            .filter_map(|(bindings, group)| {
                self.fold(group.iter().map(|e| &e.fact))
                    .map(|state| (bindings, state))
            })
            .collect()
    }
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accumulator")
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}

fn numeric_add(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(Value::Int(x + y)),
        _ => Some(Value::Float(a.as_float()? + b.as_float()?)),
    }
}

fn numeric_sub(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(Value::Int(x - y)),
        _ => Some(Value::Float(a.as_float()? - b.as_float()?)),
    }
}

/// Count of matched facts. Initial value 0, so empty groups read as zero.
#[must_use]
pub fn count() -> Accumulator {
    Accumulator::new(
        Some(Value::Int(0)),
        Arc::new(|state, _| Value::Int(state.and_then(Value::as_int).unwrap_or(0) + 1)),
        Arc::new(|a, b| numeric_add(a, b).unwrap_or_else(|| a.clone())),
        Arc::new(|state, _| Some(Value::Int(state.as_int().unwrap_or(0) - 1))),
        Arc::new(Value::clone),
    )
}

/// Sum of a numeric field. Facts without the field (or with a non-numeric
/// value there) leave the state unchanged.
#[must_use]
pub fn sum(field: impl Into<String>) -> Accumulator {
    let field = field.into();
    let reduce_field = field.clone();
    let retract_field = field;
    Accumulator::new(
        Some(Value::Int(0)),
        Arc::new(move |state, fact| {
            let state = state.cloned().unwrap_or(Value::Int(0));
            match fact.field(&reduce_field) {
                Some(v) => numeric_add(&state, v).unwrap_or(state),
                None => state,
            }
        }),
        Arc::new(|a, b| numeric_add(a, b).unwrap_or_else(|| a.clone())),
        Arc::new(move |state, fact| {
            let v = fact.field(&retract_field)?;
            numeric_sub(state, v)
        }),
        Arc::new(Value::clone),
    )
}

/// Minimum of a comparable field. No initial value: empty groups emit
/// nothing. Retracting the current minimum re-folds the remaining facts.
#[must_use]
pub fn min(field: impl Into<String>) -> Accumulator {
    extremum(field.into(), std::cmp::Ordering::Less)
}

/// Maximum of a comparable field. No initial value: empty groups emit
/// nothing. Retracting the current maximum re-folds the remaining facts.
#[must_use]
pub fn max(field: impl Into<String>) -> Accumulator {
    extremum(field.into(), std::cmp::Ordering::Greater)
}

fn extremum(field: String, keep: std::cmp::Ordering) -> Accumulator {
    let reduce_field = field.clone();
    let retract_field = field;
    Accumulator::new(
        None,
        Arc::new(move |state, fact| {
            let Some(v) = fact.field(&reduce_field) else {
                return state.cloned().unwrap_or(Value::Null);
            };
            match state {
                None => v.clone(),
                Some(s) => match v.compare(s) {
                    Some(ord) if ord == keep => v.clone(),
                    _ => s.clone(),
                },
            }
        }),
        Arc::new(move |a, b| match a.compare(b) {
            Some(ord) if ord == keep => a.clone(),
            _ => b.clone(),
        }),
        // The extremum is only invertible when the retracted fact did not
        // hold it; otherwise signal a re-fold.
        Arc::new(move |state, fact| {
            let v = fact.field(&retract_field)?;
            if v == state {
                None
            } else {
                Some(state.clone())
            }
        }),
        Arc::new(Value::clone),
    )
}

//! End-to-end scenarios driving the engine through the public session
//! surface: insert, retract, fire, query, and the listener trace.

use std::sync::Arc;

use ruleforge::conditions::{self, Cmp};
use ruleforge::{
    accumulate, rhs, Bindings, Fact, ForgeError, NodeId, Production, Rulebase, RulebaseBuilder,
    Session, SessionError, SessionEvent, TraceListener, Value,
};

fn person(name: &str, age: i64) -> Fact {
    Fact::new("Person").with("name", name).with("age", age)
}

fn order(customer: &str, amount: i64) -> Fact {
    Fact::new("Order")
        .with("customer", customer)
        .with("amount", amount)
}

/// "if Person{age >= 21, name ?n} then emit Adult{?n}", plus an "adults"
/// query over the emitted facts. Returns (rulebase, root node, production).
fn adult_rulebase() -> (Arc<Rulebase>, NodeId, NodeId) {
    let mut builder = RulebaseBuilder::new();
    let person_cond = builder.condition("Person{age >= 21}");
    let adult_cond = builder.condition("Adult");

    let person_alpha = builder.alpha(
        "Person",
        Bindings::new(),
        conditions::all(vec![
            conditions::field_cmp("age", Cmp::Ge, 21),
            conditions::bind_field("name", "?n"),
        ]),
    );
    let person_root = builder.root_join(person_cond);
    builder.link_alpha(person_alpha, person_root).unwrap();

    let emit_adult = builder.production(Production::new(
        "emit-adult",
        rhs(|ctx, token, _env| {
            let name = token.bindings.get("?n").cloned().unwrap_or_default();
            ctx.insert(&[Fact::new("Adult").with("name", name)]);
            Ok(())
        }),
    ));
    builder.link(person_root, emit_adult).unwrap();

    let adult_alpha = builder.alpha(
        "Adult",
        Bindings::new(),
        conditions::bind_field("name", "?n"),
    );
    let adult_root = builder.root_join(adult_cond);
    builder.link_alpha(adult_alpha, adult_root).unwrap();
    let adults = builder.query("adults", vec![]);
    builder.link(adult_root, adults).unwrap();

    (Arc::new(builder.build().unwrap()), person_root, emit_adult)
}

#[test]
fn adult_rule_emits_and_cascades_retraction() {
    let (rulebase, _, _) = adult_rulebase();
    let session = Session::new(rulebase)
        .insert(&[person("A", 30), person("B", 15)])
        .fire_rules()
        .unwrap();

    let adults = session.query("adults", &Bindings::new()).unwrap();
    assert_eq!(adults, vec![Bindings::new().with("?n", "A")]);

    // Retracting the justifying Person removes the inserted Adult too.
    let session = session.retract(&[person("A", 30)]);
    assert!(session.query("adults", &Bindings::new()).unwrap().is_empty());
}

#[test]
fn old_session_snapshot_survives_mutation() {
    let (rulebase, _, _) = adult_rulebase();
    let before = Session::new(rulebase);
    let after = before.insert(&[person("A", 30)]).fire_rules().unwrap();

    assert!(before.query("adults", &Bindings::new()).unwrap().is_empty());
    assert_eq!(after.query("adults", &Bindings::new()).unwrap().len(), 1);
}

/// Accumulator: sum of Order{amount} grouped by ?customer, with a
/// parameterless "total" query and a parameterised "total-for" query.
fn totals_rulebase() -> Arc<Rulebase> {
    let mut builder = RulebaseBuilder::new();
    let sum_cond = builder.condition("sum(Order.amount) by ?c");

    let order_alpha = builder.alpha(
        "Order",
        Bindings::new(),
        conditions::bind_field("customer", "?c"),
    );
    let totals = builder.accumulate(
        sum_cond,
        accumulate::sum("amount"),
        Some("?t".to_string()),
        vec!["?c".to_string()],
        vec![],
    );
    builder.mark_root(totals).unwrap();
    builder.link_alpha(order_alpha, totals).unwrap();

    let all = builder.query("total", vec![]);
    builder.link(totals, all).unwrap();
    let by_customer = builder.query("total-for", vec!["?c".to_string()]);
    builder.link(totals, by_customer).unwrap();

    Arc::new(builder.build().unwrap())
}

#[test]
fn sum_accumulator_groups_by_customer() {
    let session = Session::new(totals_rulebase()).insert(&[
        order("X", 10),
        order("X", 5),
        order("Y", 3),
    ]);

    let rows = sorted(session.query("total", &Bindings::new()).unwrap());
    assert_eq!(
        rows,
        vec![
            Bindings::new().with("?c", "X").with("?t", 15),
            Bindings::new().with("?c", "Y").with("?t", 3),
        ]
    );

    let session = session.retract(&[order("X", 5)]);
    let rows = sorted(session.query("total", &Bindings::new()).unwrap());
    assert_eq!(
        rows,
        vec![
            Bindings::new().with("?c", "X").with("?t", 10),
            Bindings::new().with("?c", "Y").with("?t", 3),
        ]
    );
}

#[test]
fn parameterised_query_filters_by_bindings() {
    let session = Session::new(totals_rulebase()).insert(&[order("X", 10), order("Y", 3)]);

    let rows = session
        .query("total-for", &Bindings::new().with("?c", "X"))
        .unwrap();
    assert_eq!(rows, vec![Bindings::new().with("?c", "X").with("?t", 10)]);

    let rows = session
        .query("total-for", &Bindings::new().with("?c", "Z"))
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn query_errors_are_typed() {
    let session = Session::new(totals_rulebase());

    let err = session.query("nope", &Bindings::new()).unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Session(SessionError::UnknownQuery { ref name }) if name == "nope"
    ));

    let err = session.query("total-for", &Bindings::new()).unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Session(SessionError::MissingParameter { ref parameter, .. })
            if parameter == "?c"
    ));
}

#[test]
fn accumulator_group_disappears_with_last_element() {
    let session = Session::new(totals_rulebase()).insert(&[order("X", 10)]);
    assert_eq!(session.query("total", &Bindings::new()).unwrap().len(), 1);

    // The X group was derived from its elements; with all of them gone the
    // row disappears instead of lingering at zero.
    let session = session.retract(&[order("X", 10)]);
    assert!(session.query("total", &Bindings::new()).unwrap().is_empty());
}

/// Negation: "if Employee{?e} and not Manager{?e} then ?e is an IC".
fn ic_rulebase() -> Arc<Rulebase> {
    let mut builder = RulebaseBuilder::new();
    let employee_cond = builder.condition("Employee{?e}");

    let employee_alpha = builder.alpha(
        "Employee",
        Bindings::new(),
        conditions::bind_field("name", "?e"),
    );
    let manager_alpha = builder.alpha(
        "Manager",
        Bindings::new(),
        conditions::bind_field("name", "?e"),
    );

    let employee_root = builder.root_join(employee_cond);
    builder.link_alpha(employee_alpha, employee_root).unwrap();
    let not_manager = builder.negation(vec!["?e".to_string()]);
    builder.link(employee_root, not_manager).unwrap();
    builder.link_alpha(manager_alpha, not_manager).unwrap();

    let ics = builder.query("ics", vec![]);
    builder.link(not_manager, ics).unwrap();

    Arc::new(builder.build().unwrap())
}

#[test]
fn negation_tracks_blocking_facts() {
    let employee = Fact::new("Employee").with("name", "E");
    let manager = Fact::new("Manager").with("name", "E");
    let row = Bindings::new().with("?e", "E");

    let session = Session::new(ic_rulebase()).insert(&[employee]);
    assert_eq!(session.query("ics", &Bindings::new()).unwrap(), vec![row.clone()]);

    let session = session.insert(&[manager.clone()]);
    assert!(session.query("ics", &Bindings::new()).unwrap().is_empty());

    let session = session.retract(&[manager]);
    assert_eq!(session.query("ics", &Bindings::new()).unwrap(), vec![row]);
}

#[test]
fn negation_only_blocks_matching_bindings() {
    let session = Session::new(ic_rulebase()).insert(&[
        Fact::new("Employee").with("name", "E1"),
        Fact::new("Employee").with("name", "E2"),
        Fact::new("Manager").with("name", "E2"),
    ]);
    assert_eq!(
        session.query("ics", &Bindings::new()).unwrap(),
        vec![Bindings::new().with("?e", "E1")]
    );
}

/// no-loop: a rule that inserts Flag whenever Flag is present.
fn flag_rulebase() -> (Arc<Rulebase>, NodeId) {
    let mut builder = RulebaseBuilder::new();
    let flag_cond = builder.condition("Flag");
    let flag_alpha = builder.alpha("Flag", Bindings::new(), conditions::always());
    let flag_root = builder.root_join(flag_cond);
    builder.link_alpha(flag_alpha, flag_root).unwrap();

    let propagate_flag = builder.production(
        Production::new(
            "propagate-flag",
            rhs(|ctx, _token, _env| {
                ctx.insert(&[Fact::new("Flag")]);
                Ok(())
            }),
        )
        .with_no_loop(true),
    );
    builder.link(flag_root, propagate_flag).unwrap();

    (Arc::new(builder.build().unwrap()), propagate_flag)
}

#[test]
fn no_loop_fires_exactly_once() {
    let (rulebase, production) = flag_rulebase();
    let trace = Arc::new(TraceListener::new());
    let session = Session::with_listener(rulebase, trace.clone()).insert(&[Fact::new("Flag")]);

    let session = session.fire_rules().unwrap();
    let firings = trace
        .events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::FireRules { node } if *node == production))
        .count();
    assert_eq!(firings, 1);
    assert!(session.components().memory.agenda_is_empty());
}

#[test]
fn listener_trace_is_ordered_and_reproducible() {
    let (rulebase, person_root, emit_adult) = adult_rulebase();

    let observe = |rulebase: Arc<Rulebase>| {
        let trace = Arc::new(TraceListener::new());
        let session = Session::with_listener(rulebase, trace.clone());
        let _ = trace.take_events(); // drop the beta-root seeding prefix
        let session = session.insert(&[person("A", 30)]);
        let _fired = session.fire_rules().unwrap();
        trace.take_events()
    };

    let events = observe(rulebase.clone());

    assert!(matches!(
        &events[0],
        SessionEvent::InsertFacts { facts } if facts == &[person("A", 30)]
    ));
    assert!(matches!(
        &events[1],
        SessionEvent::RightActivate { node, elements }
            if *node == person_root && elements.len() == 1
    ));
    assert!(matches!(
        &events[2],
        SessionEvent::LeftActivate { node, tokens }
            if *node == emit_adult && tokens.len() == 1
    ));
    assert!(matches!(
        &events[3],
        SessionEvent::AddActivations { activations } if activations.len() == 1
    ));
    assert!(matches!(
        &events[4],
        SessionEvent::FireRules { node } if *node == emit_adult
    ));

    // Exact order is reproducible across runs.
    let again = observe(rulebase);
    assert_eq!(events, again);
}

/// Initial-value accumulator: count over Task facts with no grouping.
fn task_count_rulebase() -> Arc<Rulebase> {
    let mut builder = RulebaseBuilder::new();
    let count_cond = builder.condition("count(Task)");
    let task_alpha = builder.alpha("Task", Bindings::new(), conditions::always());
    let task_count = builder.accumulate(
        count_cond,
        accumulate::count(),
        Some("?count".to_string()),
        vec![],
        vec![],
    );
    builder.mark_root(task_count).unwrap();
    builder.link_alpha(task_alpha, task_count).unwrap();
    let query = builder.query("task-count", vec![]);
    builder.link(task_count, query).unwrap();
    Arc::new(builder.build().unwrap())
}

#[test]
fn initial_value_accumulator_counts_from_zero() {
    let zero = vec![Bindings::new().with("?count", 0)];
    let one = vec![Bindings::new().with("?count", 1)];

    let session = Session::new(task_count_rulebase());
    assert_eq!(session.query("task-count", &Bindings::new()).unwrap(), zero);

    let session = session.insert(&[Fact::new("Task").with("id", 1)]);
    assert_eq!(session.query("task-count", &Bindings::new()).unwrap(), one);

    let session = session.retract(&[Fact::new("Task").with("id", 1)]);
    assert_eq!(session.query("task-count", &Bindings::new()).unwrap(), zero);
}

/// Join: A{x ?x} joined with B{x ?x, y ?y}.
fn pair_rulebase() -> Arc<Rulebase> {
    let mut builder = RulebaseBuilder::new();
    let a_cond = builder.condition("A{?x}");
    let b_cond = builder.condition("B{?x ?y}");

    let a_alpha = builder.alpha("A", Bindings::new(), conditions::bind_field("x", "?x"));
    let b_alpha = builder.alpha(
        "B",
        Bindings::new(),
        conditions::all(vec![
            conditions::bind_field("x", "?x"),
            conditions::bind_field("y", "?y"),
        ]),
    );

    let a_root = builder.root_join(a_cond);
    builder.link_alpha(a_alpha, a_root).unwrap();
    let pairs = builder.join(b_cond, vec!["?x".to_string()]);
    builder.link(a_root, pairs).unwrap();
    builder.link_alpha(b_alpha, pairs).unwrap();

    let query = builder.query("pairs", vec![]);
    builder.link(pairs, query).unwrap();
    Arc::new(builder.build().unwrap())
}

fn sorted(mut rows: Vec<Bindings>) -> Vec<Bindings> {
    rows.sort_by_key(|b| format!("{b}"));
    rows
}

#[test]
fn join_emits_the_cross_product_on_agreeing_keys() {
    let facts = [
        Fact::new("A").with("x", 1),
        Fact::new("A").with("x", 2),
        Fact::new("B").with("x", 1).with("y", 10),
        Fact::new("B").with("x", 1).with("y", 20),
    ];
    let session = Session::new(pair_rulebase()).insert(&facts);

    let rows = sorted(session.query("pairs", &Bindings::new()).unwrap());
    assert_eq!(
        rows,
        vec![
            Bindings::new().with("?x", 1).with("?y", 10),
            Bindings::new().with("?x", 1).with("?y", 20),
        ]
    );
}

#[test]
fn insert_order_does_not_change_the_match_set() {
    let a = Fact::new("A").with("x", 1);
    let b = Fact::new("B").with("x", 1).with("y", 10);

    let left_first = Session::new(pair_rulebase()).insert(&[a.clone()]).insert(&[b.clone()]);
    let right_first = Session::new(pair_rulebase()).insert(&[b]).insert(&[a]);

    assert_eq!(
        sorted(left_first.query("pairs", &Bindings::new()).unwrap()),
        sorted(right_first.query("pairs", &Bindings::new()).unwrap())
    );
}

#[test]
fn insert_then_retract_restores_the_match_set() {
    let base = Session::new(pair_rulebase()).insert(&[
        Fact::new("A").with("x", 1),
        Fact::new("B").with("x", 1).with("y", 10),
    ]);
    let before = sorted(base.query("pairs", &Bindings::new()).unwrap());

    let extra = Fact::new("B").with("x", 1).with("y", 99);
    let after = base.insert(&[extra.clone()]).retract(&[extra]);

    assert_eq!(sorted(after.query("pairs", &Bindings::new()).unwrap()), before);
    assert!(after.components().memory.agenda_is_empty());
}

#[test]
fn retracting_an_absent_fact_is_a_noop() {
    let session = Session::new(pair_rulebase()).insert(&[
        Fact::new("A").with("x", 1),
        Fact::new("B").with("x", 1).with("y", 10),
    ]);
    let before = session.query("pairs", &Bindings::new()).unwrap();

    let session = session.retract(&[Fact::new("B").with("x", 1).with("y", 77)]);
    assert_eq!(session.query("pairs", &Bindings::new()).unwrap(), before);
}

/// Test node: a stateless guard over the joined bindings.
#[test]
fn test_node_filters_tokens_by_bindings() {
    let mut builder = RulebaseBuilder::new();
    let person_cond = builder.condition("Person{?n ?age}");
    let person_alpha = builder.alpha(
        "Person",
        Bindings::new(),
        conditions::all(vec![
            conditions::bind_field("name", "?n"),
            conditions::bind_field("age", "?age"),
        ]),
    );
    let root = builder.root_join(person_cond);
    builder.link_alpha(person_alpha, root).unwrap();

    let guard = builder.test(Arc::new(|bindings: &Bindings| {
        bindings
            .get("?age")
            .and_then(Value::as_int)
            .is_some_and(|age| age >= 21)
    }));
    builder.link(root, guard).unwrap();
    let query = builder.query("adults", vec![]);
    builder.link(guard, query).unwrap();
    let rulebase = Arc::new(builder.build().unwrap());

    let session = Session::new(rulebase).insert(&[person("A", 30), person("B", 15)]);
    let rows = session.query("adults", &Bindings::new()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("?n"), Some(&Value::String("A".into())));

    // Retraction forwards through the test node untested.
    let session = session.retract(&[person("A", 30)]);
    assert!(session.query("adults", &Bindings::new()).unwrap().is_empty());
}

#[test]
fn salience_orders_firing() {
    let mut builder = RulebaseBuilder::new();
    let flag_cond = builder.condition("Flag");
    let flag_alpha = builder.alpha("Flag", Bindings::new(), conditions::always());
    let root = builder.root_join(flag_cond);
    builder.link_alpha(flag_alpha, root).unwrap();

    let low = builder.production(Production::new(
        "low",
        rhs(|ctx, _token, _env| {
            ctx.send_message("low");
            Ok(())
        }),
    ));
    let high = builder.production(
        Production::new(
            "high",
            rhs(|ctx, _token, _env| {
                ctx.send_message("high");
                Ok(())
            }),
        )
        .with_salience(10),
    );
    builder.link(root, low).unwrap();
    builder.link(root, high).unwrap();
    let rulebase = Arc::new(builder.build().unwrap());

    let trace = Arc::new(TraceListener::new());
    let session = Session::with_listener(rulebase, trace.clone()).insert(&[Fact::new("Flag")]);
    let _fired = session.fire_rules().unwrap();

    let messages: Vec<SessionEvent> = trace
        .events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Message { .. }))
        .collect();
    assert_eq!(
        messages,
        vec![
            SessionEvent::Message {
                message: "high".to_string()
            },
            SessionEvent::Message {
                message: "low".to_string()
            },
        ]
    );
}

#[test]
fn rhs_failure_carries_the_production_name() {
    let mut builder = RulebaseBuilder::new();
    let flag_cond = builder.condition("Flag");
    let flag_alpha = builder.alpha("Flag", Bindings::new(), conditions::always());
    let root = builder.root_join(flag_cond);
    builder.link_alpha(flag_alpha, root).unwrap();
    let boom = builder.production(Production::new(
        "boom",
        rhs(|_ctx, _token, _env| Err(ForgeError::internal("rhs exploded"))),
    ));
    builder.link(root, boom).unwrap();
    let rulebase = Arc::new(builder.build().unwrap());

    let err = Session::new(rulebase)
        .insert(&[Fact::new("Flag")])
        .fire_rules()
        .unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Session(SessionError::RhsFailure { ref production, .. })
            if production == "boom"
    ));
}

#[test]
fn unconditional_insertions_survive_token_retraction() {
    let mut builder = RulebaseBuilder::new();
    let person_cond = builder.condition("Person{?n}");
    let seen_cond = builder.condition("Seen");
    let person_alpha = builder.alpha(
        "Person",
        Bindings::new(),
        conditions::bind_field("name", "?n"),
    );
    let root = builder.root_join(person_cond);
    builder.link_alpha(person_alpha, root).unwrap();
    let record = builder.production(Production::new(
        "record-seen",
        rhs(|ctx, token, _env| {
            let name = token.bindings.get("?n").cloned().unwrap_or_default();
            ctx.insert_unconditional(&[Fact::new("Seen").with("name", name)]);
            Ok(())
        }),
    ));
    builder.link(root, record).unwrap();

    let seen_alpha = builder.alpha("Seen", Bindings::new(), conditions::bind_field("name", "?n"));
    let seen_root = builder.root_join(seen_cond);
    builder.link_alpha(seen_alpha, seen_root).unwrap();
    let seen = builder.query("seen", vec![]);
    builder.link(seen_root, seen).unwrap();
    let rulebase = Arc::new(builder.build().unwrap());

    let session = Session::new(rulebase)
        .insert(&[person("A", 30)])
        .fire_rules()
        .unwrap()
        .retract(&[person("A", 30)]);

    // Logical insertions would be gone; unconditional ones remain.
    assert_eq!(session.query("seen", &Bindings::new()).unwrap().len(), 1);
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use lpi::analysis::{PolicyAnalysis, Verdict};
use lpi::cfa::{Cfa, ProgramDescription};
use lpi::errors::PolicyError;
use lpi::formula::{Formula, LinearExpr};
use lpi::location::{Location, LocationId};
use lpi::options::{
    AbstractionLocations, Interprocedural, PolicyOptions, TemplateLevel,
    ValueDeterminationStrategy,
};
use lpi::path_formula::{PathFormula, SsaMap};
use lpi::policy_bound::PolicyBound;
use lpi::policy_iteration::PolicyIterationManager;
use lpi::policy_state::{AbstractedId, PolicyAbstractedState, PolicyState, StateArena};
use lpi::precision::TemplatePrecision;
use lpi::template::{self, Template};
use lpi::utils::{self, rational, ratio, Rational, ShutdownNotifier};
use lpi::value_determination::ValueDeterminationManager;
use lpi::z3_solver::Z3Solver;
use rpds::RedBlackTreeMap;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

fn load(program: serde_json::Value) -> Cfa {
    let description: ProgramDescription = serde_json::from_value(program).unwrap();
    Cfa::from_description(&description).unwrap()
}

/// x and y are incremented together while x < 10.
fn octagon_program() -> Cfa {
    load(json!({
        "functions": [{
            "name": "main",
            "locals": [{ "name": "x" }, { "name": "y" }],
            "entry": "entry",
            "exit": "exit",
            "error_nodes": ["error"],
            "edges": [
                { "from": "entry", "to": "init", "statement": { "assign": { "target": "x", "value": { "constant": 0 } } } },
                { "from": "init", "to": "loop", "statement": { "assign": { "target": "y", "value": { "constant": 0 } } } },
                { "from": "loop", "to": "body", "statement": { "assume": { "lt": [{ "var": "x" }, { "constant": 10 }] } } },
                { "from": "body", "to": "step", "statement": { "assign": { "target": "x", "value": { "add": [{ "var": "x" }, { "constant": 1 }] } } } },
                { "from": "step", "to": "loop", "statement": { "assign": { "target": "y", "value": { "add": [{ "var": "y" }, { "constant": 1 }] } } } },
                { "from": "loop", "to": "after", "statement": { "assume": { "ge": [{ "var": "x" }, { "constant": 10 }] } } },
                { "from": "after", "to": "error", "statement": { "assume": { "ne": [{ "var": "x" }, { "var": "y" }] } } },
                { "from": "after", "to": "exit", "statement": { "assume": { "eq": [{ "var": "x" }, { "var": "y" }] } } }
            ]
        }]
    }))
}

/// main passes a to f, which adds it to a global.
fn call_program() -> Cfa {
    load(json!({
        "globals": [{ "name": "total" }],
        "functions": [
            {
                "name": "f",
                "parameters": [{ "name": "p" }],
                "entry": "entry",
                "exit": "exit",
                "edges": [
                    { "from": "entry", "to": "exit", "statement": { "assign": { "target": "total", "value": { "add": [{ "var": "total" }, { "var": "p" }] } } } }
                ]
            },
            {
                "name": "main",
                "locals": [{ "name": "a" }, { "name": "b" }],
                "entry": "entry",
                "exit": "exit",
                "edges": [
                    { "from": "entry", "to": "call", "statement": { "havoc": "a" } },
                    { "from": "call", "to": "exit", "statement": { "call": { "function": "f", "arguments": [{ "var": "a" }] } } }
                ]
            }
        ]
    }))
}

fn variable_template(cfa: &Cfa, name: &str) -> Template {
    Template::variable(cfa.variable(name).unwrap())
}

fn abstracted(state: PolicyState) -> AbstractedId {
    match state {
        PolicyState::Abstracted(id) => id,
        PolicyState::Intermediate(..) => panic!("expected an abstracted state"),
    }
}

#[test]
fn options_parse_from_a_string() {
    let mut options = PolicyOptions::default();
    let inputs = options
        .parse_from_str(
            "--templates unary --interprocedural bam --widening_threshold 2 \
             --epsilon 1/10 --value_determination shared --abstraction_locations merges \
             --no_decomposition program.json",
        )
        .unwrap();
    assert_eq!(inputs, vec!["program.json".to_string()]);
    assert_eq!(options.template_level, TemplateLevel::Unary);
    assert_eq!(options.interprocedural, Interprocedural::Bam);
    assert_eq!(options.widening_threshold, 2);
    assert_eq!(options.epsilon, ratio(1, 10));
    assert_eq!(
        options.value_determination,
        ValueDeterminationStrategy::SharedWithFallback
    );
    assert_eq!(options.abstraction_locations, AbstractionLocations::Merges);
    assert!(!options.use_decomposition);
    assert!(options.use_bound_hints);
}

#[test]
fn invalid_options_are_rejected() {
    for arguments in [
        "--widening_threshold 0",
        "--epsilon abc",
        "--templates polyhedra",
        "--no_such_option",
    ] {
        let mut options = PolicyOptions::default();
        assert!(
            matches!(options.parse_from_str(arguments), Err(PolicyError::Options(..))),
            "{} was accepted",
            arguments
        );
    }
}

#[test]
fn location_ids_are_stable() {
    let cfa = octagon_program();
    let node = cfa.node("main::loop").unwrap();
    let other = cfa.node("main::after").unwrap();
    let location = Location::new(node);
    assert_eq!(location.id(), LocationId::of(&Location::new(node)));
    assert_ne!(location.id(), Location::new(other).id());
    let called = Location::new(other).entered(node);
    assert_ne!(location.id(), called.id());
    assert_eq!(called.returned(other), Some(Location::new(other)));
    assert_eq!(location.describe(&cfa), "main::loop");
}

#[test]
fn precision_only_grows() {
    let cfa = octagon_program();
    let location = Location::new(cfa.node("main::loop").unwrap());
    let mut precision = TemplatePrecision::new(TemplateLevel::Unary);
    let unary = precision.templates(&cfa, &location);
    assert_eq!(unary.len(), 4);
    assert!(unary.iter().all(|t| t.variable_count() == 1));

    let x = cfa.variable("main::x").unwrap();
    let y = cfa.variable("main::y").unwrap();
    let difference =
        Template::new(&LinearExpr::variable(x.clone()).minus(&LinearExpr::variable(y.clone())))
            .unwrap();
    assert!(precision.add_templates(&cfa, &location, vec![difference.clone()]));
    assert!(!precision.add_templates(&cfa, &location, vec![difference.clone()]));
    assert_eq!(precision.refinement_size(), 1);
    assert!(precision.templates(&cfa, &location).contains(&difference));

    assert!(!precision.raise_level(TemplateLevel::Unary));
    assert!(precision.raise_level(TemplateLevel::Octagon));
    let octagon = precision.templates(&cfa, &location);
    assert!(unary.iter().all(|t| octagon.contains(t)));
    assert!(octagon.contains(&difference));
    assert!(octagon.len() > unary.len());
}

#[test]
fn merging_a_covered_state_keeps_the_reached_state() {
    let cfa = octagon_program();
    let options = PolicyOptions::default();
    let precision = TemplatePrecision::new(options.template_level);
    let solver = Z3Solver::new();
    let mut manager = PolicyIterationManager::new(
        &cfa,
        &options,
        &precision,
        &solver,
        &solver,
        ShutdownNotifier::new(),
    );
    let location = Location::new(cfa.node("main::loop").unwrap());
    let x = variable_template(&cfa, "main::x");
    let larger = manager.root_state(
        location.clone(),
        &[(x.clone(), rational(5)), (x.negated(), rational(0))],
    );
    let smaller = manager.root_state(
        location,
        &[(x.clone(), rational(3)), (x.negated(), rational(0))],
    );
    assert!(manager.is_less_or_equal(smaller, larger));
    assert!(!manager.is_less_or_equal(larger, smaller));
    assert_eq!(manager.merge(smaller, larger).unwrap(), larger);
    assert_eq!(manager.merge(larger, smaller).unwrap(), larger);
}

#[test]
fn merge_widens_templates_past_the_threshold() {
    let cfa = octagon_program();
    let mut options = PolicyOptions::default();
    // Every update of a bound widens it.
    options.widening_threshold = 0;
    let precision = TemplatePrecision::new(options.template_level);
    let solver = Z3Solver::new();
    let mut manager = PolicyIterationManager::new(
        &cfa,
        &options,
        &precision,
        &solver,
        &solver,
        ShutdownNotifier::new(),
    );
    let location = Location::new(cfa.node("main::loop").unwrap());
    let x = variable_template(&cfa, "main::x");
    let y = variable_template(&cfa, "main::y");
    let old = manager.root_state(
        location.clone(),
        &[
            (x.clone(), rational(0)),
            (x.negated(), rational(0)),
            (y.clone(), rational(5)),
        ],
    );
    let new = manager.root_state(
        location.clone(),
        &[
            (x.clone(), rational(1)),
            (x.negated(), rational(0)),
            (y.clone(), rational(2)),
        ],
    );
    let merged = manager.merge(new, old).unwrap();
    assert!(manager.is_less_or_equal(old, merged));
    assert!(manager.is_less_or_equal(new, merged));
    let state = manager.arena().abstracted(abstracted(merged));
    assert!(state.bound(&x).is_none());
    assert_eq!(state.bound(&x.negated()).map(|b| b.bound.clone()), Some(rational(0)));
    assert_eq!(state.bound(&y).map(|b| b.bound.clone()), Some(rational(5)));
    assert_eq!(manager.latest_state(&location), Some(abstracted(merged)));
}

#[test]
fn reduction_keeps_what_the_callee_can_see() {
    let cfa = call_program();
    let options = PolicyOptions::default();
    let precision = TemplatePrecision::new(options.template_level);
    let solver = Z3Solver::new();
    let mut manager = PolicyIterationManager::new(
        &cfa,
        &options,
        &precision,
        &solver,
        &solver,
        ShutdownNotifier::new(),
    );
    let callee = cfa.function("f").unwrap();
    let p = variable_template(&cfa, "f::p");
    let b = variable_template(&cfa, "main::b");
    let total = variable_template(&cfa, "total");
    let entry = manager.root_state(
        Location::new(callee.entry),
        &[
            (p.clone(), rational(3)),
            (p.negated(), rational(-3)),
            (b.clone(), rational(7)),
            (total.negated(), rational(0)),
        ],
    );
    let reduced = manager.reduce(abstracted(entry), "f");
    assert_eq!(&*reduced.callee, "f");
    // p <= 3 only repeats that p is fixed by -p <= -3. b is invisible to f.
    assert!(reduced.bounds.contains(&(p.negated(), rational(-3))));
    assert!(reduced.bounds.contains(&(total.negated(), rational(0))));
    assert!(!reduced.bounds.iter().any(|(t, _)| *t == p || *t == b));
}

#[test]
fn recursive_programs_are_unsupported() {
    let cfa = load(json!({
        "functions": [{
            "name": "main",
            "entry": "entry",
            "exit": "exit",
            "edges": [
                { "from": "entry", "to": "exit", "statement": { "call": { "function": "main" } } }
            ]
        }]
    }));
    let options = PolicyOptions::default();
    let solver = Z3Solver::new();
    assert!(matches!(
        PolicyAnalysis::new(&cfa, &options, &solver).run(),
        Err(PolicyError::Unsupported(..))
    ));
}

#[test]
fn interrupted_analyses_are_unknown() {
    let cfa = octagon_program();
    let options = PolicyOptions::default();
    let solver = Z3Solver::new();
    let analysis = PolicyAnalysis::new(&cfa, &options, &solver);
    analysis.notifier().request_shutdown();
    let report = analysis.run().unwrap();
    assert_eq!(report.verdict, Verdict::Unknown);
    assert!(report.reason.is_some());
}

#[test]
fn strategies_agree_on_the_verdict() {
    let cfa = octagon_program();
    let solver = Z3Solver::new();
    for arguments in [
        "",
        "--no_decomposition",
        "--no_bound_hints",
        "--value_determination shared",
        "--abstraction_locations merges",
    ] {
        let mut options = PolicyOptions::default();
        options.parse_from_str(arguments).unwrap();
        let report = PolicyAnalysis::new(&cfa, &options, &solver).run().unwrap();
        assert_eq!(report.verdict, Verdict::Safe, "with options {:?}", arguments);
    }
}

#[test]
fn spurious_counterexamples_raise_the_template_level() {
    let cfa = octagon_program();
    let solver = Z3Solver::new();
    let mut options = PolicyOptions::default();
    options
        .parse_from_str("--templates unary --no_interpolation")
        .unwrap();
    let report = PolicyAnalysis::new(&cfa, &options, &solver).run().unwrap();
    assert_eq!(report.verdict, Verdict::Safe);
    assert_eq!(report.rounds, 2);
    assert_eq!(report.refined_templates, 0);
}

#[test]
fn counterexamples_carry_a_model() {
    let cfa = load(json!({
        "functions": [{
            "name": "main",
            "parameters": [{ "name": "n" }],
            "entry": "entry",
            "exit": "exit",
            "error_nodes": ["error"],
            "edges": [
                { "from": "entry", "to": "error", "statement": { "assume": { "gt": [{ "var": "n" }, { "constant": 41 }] } } },
                { "from": "entry", "to": "exit", "statement": { "assume": { "le": [{ "var": "n" }, { "constant": 41 }] } } }
            ]
        }]
    }));
    let options = PolicyOptions::default();
    let solver = Z3Solver::new();
    let report = PolicyAnalysis::new(&cfa, &options, &solver).run().unwrap();
    assert_eq!(report.verdict, Verdict::Unsafe);
    let model = report.model.unwrap();
    let n = model
        .iter()
        .find(|(name, _)| name.starts_with("main::n"))
        .map(|(_, value)| utils::parse_rational(value).unwrap())
        .unwrap();
    assert!(n > rational(41));
}

#[test]
fn programs_load_from_files() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    let program = json!({
        "functions": [{
            "name": "main",
            "locals": [{ "name": "x", "type": "u8" }],
            "entry": "entry",
            "exit": "exit",
            "edges": [
                { "from": "entry", "to": "exit", "statement": { "assign": { "target": "x", "value": { "constant": 1 } } } }
            ]
        }]
    });
    write!(file, "{}", program).unwrap();
    let cfa = Cfa::load(file.path()).unwrap();
    assert_eq!(&*cfa.main, "main");
    assert!(cfa.variable("main::x").unwrap().sort.is_unsigned());
    assert!(cfa.node("main::exit").is_some());
}

#[test]
fn malformed_programs_are_rejected() {
    let undeclared = json!({
        "functions": [{
            "name": "main",
            "entry": "entry",
            "exit": "exit",
            "edges": [
                { "from": "entry", "to": "exit", "statement": { "havoc": "x" } }
            ]
        }]
    });
    let description: ProgramDescription = serde_json::from_value(undeclared).unwrap();
    assert!(matches!(
        Cfa::from_description(&description),
        Err(PolicyError::InvalidProgram(..))
    ));
    assert!(matches!(
        Cfa::from_json("{ \"functions\": 3 }"),
        Err(PolicyError::Json(..))
    ));
    let no_main = json!({ "functions": [] });
    let description: ProgramDescription = serde_json::from_value(no_main).unwrap();
    assert!(matches!(
        Cfa::from_description(&description),
        Err(PolicyError::InvalidProgram(..))
    ));
}

/// x and y are only assigned constants in the loop. They are read after the blank exit edge.
fn blank_exit_program() -> Cfa {
    load(json!({
        "functions": [{
            "name": "main",
            "locals": [{ "name": "x" }, { "name": "y" }],
            "entry": "entry",
            "exit": "exit",
            "error_nodes": ["error"],
            "edges": [
                { "from": "entry", "to": "loop", "statement": { "assign": { "target": "x", "value": { "constant": 0 } } } },
                { "from": "loop", "to": "body", "statement": { "assume": "nondet" } },
                { "from": "body", "to": "step", "statement": { "assign": { "target": "x", "value": { "constant": 1 } } } },
                { "from": "step", "to": "loop", "statement": { "assign": { "target": "y", "value": { "constant": 2 } } } },
                { "from": "loop", "to": "after", "statement": "blank" },
                { "from": "after", "to": "error", "statement": { "assume": { "gt": [{ "add": [{ "var": "x" }, { "var": "y" }] }, { "constant": 3 }] } } },
                { "from": "after", "to": "exit", "statement": { "assume": { "le": [{ "add": [{ "var": "x" }, { "var": "y" }] }, { "constant": 3 }] } } }
            ]
        }]
    }))
}

/// x and y are chosen independently in [0, 3] and [0, 4] before a loop that changes neither.
fn independent_program() -> Cfa {
    load(json!({
        "functions": [{
            "name": "main",
            "locals": [{ "name": "x" }, { "name": "y" }],
            "entry": "entry",
            "exit": "exit",
            "edges": [
                { "from": "entry", "to": "pick_x", "statement": { "havoc": "x" } },
                { "from": "pick_x", "to": "pick_y", "statement": { "assume": { "and": [
                    { "ge": [{ "var": "x" }, { "constant": 0 }] },
                    { "le": [{ "var": "x" }, { "constant": 3 }] }
                ] } } },
                { "from": "pick_y", "to": "bound_y", "statement": { "havoc": "y" } },
                { "from": "bound_y", "to": "loop", "statement": { "assume": { "and": [
                    { "ge": [{ "var": "y" }, { "constant": 0 }] },
                    { "le": [{ "var": "y" }, { "constant": 4 }] }
                ] } } },
                { "from": "loop", "to": "body", "statement": { "assume": "nondet" } },
                { "from": "body", "to": "loop", "statement": "blank" },
                { "from": "loop", "to": "exit", "statement": { "assume": "nondet" } }
            ]
        }]
    }))
}

fn new_manager<'a>(
    cfa: &'a Cfa,
    options: &'a PolicyOptions,
    precision: &'a TemplatePrecision,
    solver: &'a Z3Solver,
) -> PolicyIterationManager<'a> {
    PolicyIterationManager::new(
        cfa,
        options,
        precision,
        solver,
        solver,
        ShutdownNotifier::new(),
    )
}

#[test]
fn variables_read_after_a_blank_edge_are_live() {
    let cfa = blank_exit_program();
    let node = cfa.node("main::loop").unwrap();
    let x = cfa.variable("main::x").unwrap().clone();
    let y = cfa.variable("main::y").unwrap().clone();
    let live = cfa.live_variables(node);
    assert!(live.contains(&x));
    assert!(live.contains(&y));

    let templates = template::generate_templates(&cfa, node, TemplateLevel::Octagon);
    let difference =
        Template::new(&LinearExpr::variable(x.clone()).minus(&LinearExpr::variable(y.clone())))
            .unwrap();
    assert!(templates.contains(&difference));
    assert!(templates.contains(&difference.negated()));
    assert!(templates.contains(&Template::variable(&x)));
}

#[test]
fn decomposition_does_not_change_the_bounds() {
    let cfa = independent_program();
    let solver = Z3Solver::new();
    let mut reports = Vec::new();
    for arguments in ["", "--no_decomposition"] {
        let mut options = PolicyOptions::default();
        options.parse_from_str(arguments).unwrap();
        let report = PolicyAnalysis::new(&cfa, &options, &solver).run().unwrap();
        assert_eq!(report.verdict, Verdict::Safe, "with options {:?}", arguments);
        reports.push(report);
    }
    let with = reports[0].invariants_at("main::loop");
    let without = reports[1].invariants_at("main::loop");
    assert!(!with.is_empty());
    assert_eq!(with.len(), without.len());
    assert!(with.iter().all(|b| without.contains(b)));
    let sum = with
        .iter()
        .find(|b| {
            b.coefficients.len() == 2 && b.coefficients.values().all(|c| c.as_str() == "1")
        })
        .unwrap();
    assert_eq!(sum.bound, "7");
}

#[test]
fn bound_hints_do_not_change_the_bounds() {
    let cfa = octagon_program();
    let solver = Z3Solver::new();
    let mut invariants = Vec::new();
    for arguments in ["", "--no_bound_hints"] {
        let mut options = PolicyOptions::default();
        options.parse_from_str(arguments).unwrap();
        let report = PolicyAnalysis::new(&cfa, &options, &solver).run().unwrap();
        assert_eq!(report.verdict, Verdict::Safe, "with options {:?}", arguments);
        invariants.push(report.invariants_at("main::loop").to_vec());
    }
    assert_eq!(invariants[0].len(), invariants[1].len());
    assert!(invariants[0].iter().all(|b| invariants[1].contains(b)));
}

#[test]
fn widening_allows_threshold_many_updates() {
    let cfa = octagon_program();
    let mut options = PolicyOptions::default();
    options.widening_threshold = 2;
    let precision = TemplatePrecision::new(options.template_level);
    let solver = Z3Solver::new();
    let mut manager = new_manager(&cfa, &options, &precision, &solver);
    let location = Location::new(cfa.node("main::loop").unwrap());
    let x = variable_template(&cfa, "main::x");
    let y = variable_template(&cfa, "main::y");
    let mut reached = manager.root_state(
        location.clone(),
        &[
            (x.clone(), rational(0)),
            (x.negated(), rational(0)),
            (y.clone(), rational(5)),
        ],
    );
    for k in 1..=3 {
        // The smaller bound on y keeps the new state from covering the reached one.
        let new = manager.root_state(
            location.clone(),
            &[
                (x.clone(), rational(k)),
                (x.negated(), rational(0)),
                (y.clone(), rational(2)),
            ],
        );
        reached = manager.merge(new, reached).unwrap();
        let state = manager.arena().abstracted(abstracted(reached));
        let x_bound = state.bound(&x).map(|b| b.bound.clone());
        if k <= 2 {
            assert_eq!(x_bound, Some(rational(k)));
        } else {
            assert_eq!(x_bound, None);
        }
        assert_eq!(state.bound(&y).map(|b| b.bound.clone()), Some(rational(5)));
    }
}

/// Builds a root state at main::init with closed bounds, and a state at main::loop whose
/// bounds follow the policy x@1 = x@0 from the root state. Each bound of the second state
/// depends on the same template of the root state.
fn identity_policy_arena(
    cfa: &Cfa,
    root_bounds: &[(Template, Rational)],
    bounds: &[(Template, Rational)],
) -> (StateArena, HashMap<Location, AbstractedId>, AbstractedId) {
    let mut arena = StateArena::new();
    let name = cfa.variable("main::x").unwrap().name.clone();
    let start = SsaMap::new().with_index(name.clone(), 0);
    let end = start.with_index(name, 1);
    let root_location = Location::new(cfa.node("main::init").unwrap());
    let root = arena.next_abstracted_id();
    let root_state = PolicyAbstractedState {
        location_id: root_location.id(),
        location: root_location.clone(),
        abstraction: root_bounds
            .iter()
            .map(|(t, b)| (t.clone(), PolicyBound::closed(t, b.clone(), &start, root)))
            .collect::<RedBlackTreeMap<_, _>>(),
        ssa: start.clone(),
        generator: None,
        sibling: None,
        extra_invariant: Formula::truth(),
    };
    assert_eq!(arena.add_abstracted(root_state), root);

    let x = variable_template(cfa, "main::x");
    let policy = PathFormula {
        formula: Formula::eq(&x.instantiate(&end), &x.instantiate(&start)),
        ssa: end.clone(),
        length: 1,
    };
    let location = Location::new(cfa.node("main::loop").unwrap());
    let merged_state = PolicyAbstractedState {
        location_id: location.id(),
        location: location.clone(),
        abstraction: bounds
            .iter()
            .map(|(t, b)| {
                let bound = PolicyBound::new(
                    b.clone(),
                    policy.clone(),
                    root,
                    BTreeSet::from([t.clone()]),
                );
                (t.clone(), bound)
            })
            .collect::<RedBlackTreeMap<_, _>>(),
        ssa: end,
        generator: None,
        sibling: None,
        extra_invariant: Formula::truth(),
    };
    let merged = arena.add_abstracted(merged_state);
    let latest = HashMap::from([(root_location, root), (location, merged)]);
    (arena, latest, merged)
}

#[test]
fn shared_value_determination_falls_back_to_unique_namespaces() {
    let cfa = octagon_program();
    let x = variable_template(&cfa, "main::x");
    // The root state is empty: x <= 5 and x >= 7. Sharing the namespace of the common policy
    // makes the system unsatisfiable, while separate namespaces keep both bounds.
    let bounds = [(x.clone(), rational(5)), (x.negated(), rational(-7))];
    let (arena, latest, merged) = identity_policy_arena(&cfa, &bounds, &bounds);
    let solver = Z3Solver::new();
    let manager = ValueDeterminationManager::new(&solver, ratio(1, 1000), ShutdownNotifier::new());
    let updated = BTreeSet::from([x.clone(), x.negated()]);
    let shared = manager
        .determine(
            &arena,
            &latest,
            merged,
            &updated,
            ValueDeterminationStrategy::SharedWithFallback,
        )
        .unwrap();
    let precise = manager
        .determine(
            &arena,
            &latest,
            merged,
            &updated,
            ValueDeterminationStrategy::Precise,
        )
        .unwrap();
    for abstraction in [shared, precise] {
        assert_eq!(abstraction.get(&x).map(|b| b.bound.clone()), Some(rational(5)));
        assert_eq!(
            abstraction.get(&x.negated()).map(|b| b.bound.clone()),
            Some(rational(-7))
        );
    }
}

#[test]
fn unsatisfiable_precise_value_determination_is_a_contract_violation() {
    let cfa = octagon_program();
    let x = variable_template(&cfa, "main::x");
    // x <= 6 cannot follow from x <= 5 through x@1 = x@0.
    let (arena, latest, merged) = identity_policy_arena(
        &cfa,
        &[(x.clone(), rational(5))],
        &[(x.clone(), rational(6))],
    );
    let solver = Z3Solver::new();
    let manager = ValueDeterminationManager::new(&solver, ratio(1, 1000), ShutdownNotifier::new());
    let updated = BTreeSet::from([x]);
    for strategy in [
        ValueDeterminationStrategy::Precise,
        ValueDeterminationStrategy::SharedWithFallback,
    ] {
        assert!(matches!(
            manager.determine(&arena, &latest, merged, &updated, strategy),
            Err(PolicyError::ContractViolation(..))
        ));
    }
}

/// main calls f, which only writes the global t, from the body of a loop over i.
fn loop_call_program() -> Cfa {
    load(json!({
        "globals": [{ "name": "t" }],
        "functions": [
            {
                "name": "f",
                "entry": "entry",
                "exit": "exit",
                "edges": [
                    { "from": "entry", "to": "exit", "statement": { "assign": { "target": "t", "value": { "constant": 5 } } } }
                ]
            },
            {
                "name": "main",
                "locals": [{ "name": "i" }],
                "entry": "entry",
                "exit": "exit",
                "error_nodes": ["error"],
                "edges": [
                    { "from": "entry", "to": "loop", "statement": { "assign": { "target": "i", "value": { "constant": 0 } } } },
                    { "from": "loop", "to": "call", "statement": { "assume": { "lt": [{ "var": "i" }, { "constant": 10 }] } } },
                    { "from": "call", "to": "ret", "statement": { "call": { "function": "f" } } },
                    { "from": "ret", "to": "loop", "statement": { "assign": { "target": "i", "value": { "add": [{ "var": "i" }, { "constant": 1 }] } } } },
                    { "from": "loop", "to": "after", "statement": { "assume": { "ge": [{ "var": "i" }, { "constant": 10 }] } } },
                    { "from": "after", "to": "error", "statement": { "assume": { "gt": [{ "var": "i" }, { "constant": 10 }] } } },
                    { "from": "after", "to": "exit", "statement": { "assume": { "le": [{ "var": "i" }, { "constant": 10 }] } } }
                ]
            }
        ]
    }))
}

#[test]
fn value_determination_follows_policies_through_summarized_calls() {
    let cfa = loop_call_program();
    let solver = Z3Solver::new();
    let upper = BTreeMap::from([("main::i".to_string(), "1".to_string())]);
    for arguments in ["", "--interprocedural bam", "--interprocedural summaries"] {
        let mut options = PolicyOptions::default();
        options.parse_from_str(arguments).unwrap();
        let report = PolicyAnalysis::new(&cfa, &options, &solver).run().unwrap();
        assert_eq!(report.verdict, Verdict::Safe, "with options {:?}", arguments);
        let bound = report
            .invariants_at("main::loop")
            .iter()
            .find(|b| b.coefficients == upper)
            .map(|b| b.bound.clone());
        assert_eq!(bound.as_deref(), Some("10"), "with options {:?}", arguments);
    }
}

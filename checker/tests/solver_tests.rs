// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use lpi::errors::PolicyError;
use lpi::formula::{Formula, LinearExpr, Relation, Sort, Variable};
use lpi::smt_solver::{
    InterpolatingSolver, OptimizationSolver, OptimizationStatus, SmtResult, SmtSolver,
};
use lpi::utils::{rational, ratio, Rational};
use lpi::z3_solver::Z3Solver;

fn int(name: &str) -> Variable {
    Variable::new(name, Sort::INTEGER)
}

fn var(variable: &Variable) -> LinearExpr {
    LinearExpr::variable(variable.clone())
}

fn constant(value: i64) -> LinearExpr {
    LinearExpr::constant(rational(value))
}

#[test]
fn satisfiability_of_conjunctions() {
    let solver = Z3Solver::new();
    let x = int("x");
    let contradiction = Formula::and(vec![
        Formula::le(&var(&x), &constant(1)),
        Formula::ge(&var(&x), &constant(2)),
    ]);
    assert_eq!(solver.solve(&contradiction), SmtResult::Unsatisfiable);
    assert!(solver.is_unsat(&contradiction).unwrap());

    let fixed = Formula::and(vec![
        Formula::le(&var(&x), &constant(3)),
        Formula::ge(&var(&x), &constant(3)),
    ]);
    let model = solver.model(&fixed).unwrap().unwrap();
    assert_eq!(model.value(&x), Some(&rational(3)));
}

#[test]
fn integer_models_are_integral() {
    let solver = Z3Solver::new();
    let x = int("x");
    let y = int("y");
    // 2 <= 2x + 2y <= 3 forces x + y = 1 over the integers.
    let sum = var(&x).plus(&var(&y)).scaled(&rational(2));
    let formula = Formula::and(vec![
        Formula::ge(&sum, &constant(2)),
        Formula::le(&sum, &constant(3)),
        Formula::ge(&var(&x), &constant(0)),
        Formula::ge(&var(&y), &constant(0)),
    ]);
    let model = solver.model(&formula).unwrap().unwrap();
    let x_value = model.value(&x).cloned().unwrap_or_else(|| rational(0));
    let y_value = model.value(&y).cloned().unwrap_or_else(|| rational(0));
    assert!(x_value.is_integer());
    assert!(y_value.is_integer());
    assert_eq!(x_value + y_value, rational(1));

    // 0 < x < 1 has rational but no integral solutions.
    let between = Formula::and(vec![
        Formula::gt(&var(&x), &constant(0)),
        Formula::lt(&var(&x), &constant(1)),
    ]);
    assert!(solver.is_unsat(&between).unwrap());
}

#[test]
fn strict_inequalities_over_the_rationals() {
    let solver = Z3Solver::new();
    let r = Variable::new("r", Sort::Rational);
    let open = Formula::and(vec![
        Formula::gt(&var(&r), &constant(0)),
        Formula::lt(&var(&r), &constant(1)),
    ]);
    let model = solver.model(&open).unwrap().unwrap();
    let value = model.value(&r).cloned().unwrap_or_else(|| rational(0));
    assert!(value > rational(0) && value < rational(1));

    let empty = Formula::and(vec![
        Formula::gt(&var(&r), &constant(0)),
        Formula::lt(&var(&r), &constant(0)),
    ]);
    assert!(solver.is_unsat(&empty).unwrap());
}

#[test]
fn disjunctions_are_satisfied_by_one_operand() {
    let solver = Z3Solver::new();
    let x = int("x");
    let formula = Formula::and(vec![
        Formula::or(vec![
            Formula::le(&var(&x), &constant(0)),
            Formula::ge(&var(&x), &constant(10)),
        ]),
        Formula::ge(&var(&x), &constant(5)),
    ]);
    let model = solver.model(&formula).unwrap().unwrap();
    assert!(model.value(&x).map_or(false, |v| *v >= rational(10)));
}

#[test]
fn parity_constraints_are_unsatisfiable_over_the_integers() {
    let solver = Z3Solver::new();
    let (x, a, b) = (int("x"), int("a"), int("b"));
    let formula = Formula::and(vec![
        Formula::eq(&var(&x), &var(&a).scaled(&rational(2))),
        Formula::eq(
            &var(&x),
            &var(&b).scaled(&rational(2)).plus(&constant(1)),
        ),
    ]);
    assert_eq!(solver.solve(&formula), SmtResult::Unsatisfiable);
    assert_eq!(solver.model(&formula).unwrap(), None);
}

#[test]
fn interpolation_gives_up_on_integer_only_infeasibility() {
    let solver = Z3Solver::new();
    let (x, a, b) = (int("x"), int("a"), int("b"));
    let mut session = solver.new_interpolating_session();
    let handles = vec![
        session.push(Formula::eq(&var(&x), &var(&a).scaled(&rational(2)))),
        session.push(Formula::eq(
            &var(&x),
            &var(&b).scaled(&rational(2)).plus(&constant(1)),
        )),
    ];
    assert!(session.is_unsat().unwrap());
    assert!(matches!(
        session.sequence_interpolants(&handles),
        Err(PolicyError::SolverUndefined(..))
    ));
}

#[test]
fn optimization_over_disjunctions() {
    let solver = Z3Solver::new();
    let x = int("x");
    let y = int("y");
    let mut session = solver.new_session();
    session.add_constraint(Formula::le(&var(&y), &var(&x)));
    session.add_constraint(Formula::or(vec![
        Formula::le(&var(&x), &constant(3)),
        Formula::and(vec![
            Formula::ge(&var(&x), &constant(5)),
            Formula::le(&var(&x), &constant(7)),
        ]),
    ]));
    let objective = session.maximize(&var(&y));
    assert_eq!(session.check(), OptimizationStatus::Opt);
    let epsilon = ratio(1, 1000);
    assert_eq!(session.upper(objective, &epsilon), Some(rational(7)));
    let model = session.model().unwrap();
    assert_eq!(model.value(&y), Some(&rational(7)));

    session.push();
    session.add_constraint(Formula::ge(&var(&y), &constant(8)));
    assert_eq!(session.check(), OptimizationStatus::Unsat);
    session.pop();

    let mut session = solver.new_session();
    session.add_constraint(Formula::le(&var(&y), &var(&x)));
    let unbounded = session.maximize(&var(&x).negated());
    assert_eq!(session.check(), OptimizationStatus::Opt);
    assert_eq!(session.upper(unbounded, &epsilon), None);
}

#[test]
fn strict_suprema_are_read_within_epsilon() {
    let solver = Z3Solver::new();
    let r = Variable::new("r", Sort::Rational);
    let mut session = solver.new_session();
    session.add_constraint(Formula::lt(&var(&r), &constant(2)));
    let objective = session.maximize(&var(&r));
    assert_eq!(session.check(), OptimizationStatus::Opt);
    assert_eq!(
        session.upper(objective, &ratio(1, 100)),
        Some(ratio(199, 100))
    );
}

#[test]
fn integer_objectives_have_integral_optima() {
    let solver = Z3Solver::new();
    let x = int("x");
    let y = int("y");
    let mut session = solver.new_session();
    // 2x + 2y <= 5 has the rational optimum 5/2.
    session.add_constraint(Formula::atom(
        var(&x)
            .plus(&var(&y))
            .scaled(&rational(2))
            .minus(&constant(5)),
        Relation::LessOrEqual,
    ));
    let objective = session.maximize(&var(&x).plus(&var(&y)));
    assert_eq!(session.check(), OptimizationStatus::Opt);
    let bound: Option<Rational> = session.upper(objective, &ratio(1, 1000));
    assert_eq!(bound, Some(rational(2)));
}

#[test]
fn sequence_interpolants_explain_infeasibility() {
    let solver = Z3Solver::new();
    let x = int("x");
    let y = int("y");
    let first = Formula::eq(&var(&x), &constant(0));
    let second = Formula::eq(&var(&y), &var(&x).plus(&constant(1)));
    let third = Formula::le(&var(&y), &constant(0));
    let mut session = solver.new_interpolating_session();
    let handles = vec![
        session.push(first.clone()),
        session.push(second.clone()),
        session.push(third.clone()),
    ];
    assert!(session.is_unsat().unwrap());
    let interpolants = session.sequence_interpolants(&handles).unwrap();
    assert_eq!(interpolants.len(), 2);
    let (i1, i2) = (interpolants[0].clone(), interpolants[1].clone());
    // first => i1
    assert!(solver
        .is_unsat(&Formula::and(vec![first, Formula::not(i1.clone())]))
        .unwrap());
    // i1 /\ second => i2
    assert!(solver
        .is_unsat(&Formula::and(vec![i1, second, Formula::not(i2.clone())]))
        .unwrap());
    // i2 /\ third is unsatisfiable
    assert!(solver.is_unsat(&Formula::and(vec![i2, third])).unwrap());
}

#[test]
fn feasible_sequences_have_a_model() {
    let solver = Z3Solver::new();
    let x = int("x");
    let mut session = solver.new_interpolating_session();
    session.push(Formula::ge(&var(&x), &constant(1)));
    session.push(Formula::le(&var(&x), &constant(1)));
    assert!(!session.is_unsat().unwrap());
    let model = session.model().unwrap();
    assert_eq!(model.value(&x), Some(&rational(1)));
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use lpi::formula::{Formula, FormulaTrait, LinearExpr, Model, Relation, Sort, Variable};
use lpi::linearization::FormulaLinearizationManager;
use lpi::smt_solver::SmtSolver;
use lpi::template::{Template, TemplateKind};
use lpi::utils::{rational, ratio};
use lpi::z3_solver::Z3Solver;

fn int(name: &str) -> LinearExpr {
    LinearExpr::variable(Variable::new(name, Sort::INTEGER))
}

fn real(name: &str) -> LinearExpr {
    LinearExpr::variable(Variable::new(name, Sort::Rational))
}

fn constant(value: i64) -> LinearExpr {
    LinearExpr::constant(rational(value))
}

#[test]
fn integer_atoms_are_tightened() {
    // 2x < 6 over the integers is x <= 2
    let two_x = int("x").scaled(&rational(2));
    assert_eq!(
        Formula::lt(&two_x, &constant(6)),
        Formula::le(&int("x"), &constant(2))
    );
    // 2x <= 5 is x <= 2 as well
    assert_eq!(
        Formula::le(&two_x, &constant(5)),
        Formula::le(&int("x"), &constant(2))
    );
    // 2x = 3 has no integral solution
    assert!(Formula::eq(&two_x, &constant(3)).is_false());
}

#[test]
fn rational_atoms_keep_strictness() {
    let two_x = real("x").scaled(&rational(2));
    let atom = Formula::lt(&two_x, &constant(6));
    assert_eq!(atom, Formula::lt(&real("x"), &constant(3)));
    assert_ne!(atom, Formula::le(&real("x"), &constant(3)));
}

#[test]
fn equalities_have_a_canonical_orientation() {
    assert_eq!(
        Formula::eq(&int("x"), &int("y")),
        Formula::eq(&int("y"), &int("x"))
    );
}

#[test]
fn constant_atoms_are_evaluated() {
    assert!(Formula::le(&constant(3), &constant(5)).is_true());
    assert!(Formula::gt(&constant(3), &constant(5)).is_false());
}

#[test]
fn boolean_structure_is_flattened() {
    let a = Formula::le(&int("x"), &constant(2));
    let b = Formula::le(&int("y"), &constant(1));
    let nested = Formula::and(vec![
        a.clone(),
        Formula::and(vec![b.clone(), Formula::truth()]),
        a.clone(),
    ]);
    assert_eq!(nested, Formula::and(vec![a.clone(), b.clone()]));
    assert_eq!(nested.conjuncts().len(), 2);
    assert!(Formula::and(vec![a.clone(), Formula::falsity()]).is_false());
    assert!(Formula::or(vec![b, Formula::truth()]).is_true());
    assert_eq!(Formula::not(Formula::not(a.clone())), a);
}

#[test]
fn evaluation_under_a_model() {
    let x = Variable::new("x", Sort::INTEGER);
    let mut model = Model::default();
    model.set_value(x, rational(4));
    let formula = Formula::or(vec![
        Formula::le(&int("x"), &constant(0)),
        Formula::ge(&int("x"), &constant(3)),
    ]);
    assert_eq!(formula.evaluate(&model), Some(true));
    assert_eq!(Formula::le(&int("y"), &constant(0)).evaluate(&model), None);
}

#[test]
fn substitution_of_instantiated_variables() {
    let x = Variable::new("x", Sort::INTEGER);
    let formula = Formula::le(&LinearExpr::variable(x.instantiated(3)), &constant(2));
    let uninstantiated = formula.uninstantiate();
    assert_eq!(uninstantiated, Formula::le(&int("x"), &constant(2)));
    assert!(formula.variables().contains(&x.instantiated(3)));
}

#[test]
fn templates_are_primitive_directions() {
    let x = int("x");
    let y = int("y");
    let scaled = Template::new(&x.scaled(&rational(2)).minus(&y.scaled(&rational(2))));
    let primitive = Template::new(&x.minus(&y));
    assert_eq!(scaled, primitive);
    let difference = match primitive {
        Some(template) => template,
        None => panic!("x - y has variables"),
    };
    assert_eq!(difference.kind(), TemplateKind::Difference);
    assert_eq!(difference.negated().kind(), TemplateKind::Difference);
    assert_eq!(
        Template::new(&x.plus(&y).negated()).map(|t| t.kind()),
        Some(TemplateKind::NegatedSum)
    );
    assert!(Template::new(&constant(7)).is_none());
    let half = Template::new(&x.scaled(&ratio(1, 2)));
    assert_eq!(half, Template::new(&x));
}

#[test]
fn sums_decompose_into_unit_templates() {
    let x = Variable::new("x", Sort::INTEGER);
    let y = Variable::new("y", Sort::INTEGER);
    let template = match Template::new(&int("x").minus(&int("y").scaled(&rational(3)))) {
        Some(template) => template,
        None => panic!("x - 3y has variables"),
    };
    let parts = template.decompose().unwrap();
    assert_eq!(parts.len(), 2);
    assert!(parts.contains(&(Template::variable(&x), rational(1))));
    assert!(parts.contains(&(Template::variable(&y).negated(), rational(3))));
    assert!(Template::variable(&x).decompose().is_none());
}

#[test]
fn bounds_that_overflow_the_declared_type_do_not_fit() {
    let byte = Variable::new("b", Sort::from_type_name("u8").unwrap());
    let template = Template::variable(&byte);
    assert_eq!(template.maximal_value(), Some(rational(255)));
    assert!(template.fits_bound(&rational(255)));
    assert!(!template.fits_bound(&rational(256)));
    assert!(template.is_unsigned());
    assert!(Template::variable(&Variable::new("x", Sort::INTEGER))
        .maximal_value()
        .is_none());
}

#[test]
fn linearization_pushes_negations_to_atoms() {
    let manager = FormulaLinearizationManager::new();
    let formula = Formula::not(Formula::and(vec![
        Formula::le(&int("x"), &constant(0)),
        Formula::le(&int("y"), &constant(0)),
    ]));
    let expected = Formula::or(vec![
        Formula::gt(&int("x"), &constant(0)),
        Formula::gt(&int("y"), &constant(0)),
    ]);
    let linearized = manager.linearize(&formula);
    assert_eq!(linearized, expected);
    assert_eq!(manager.linearize(&linearized), linearized);
}

#[test]
fn linearization_splits_disequalities() {
    let manager = FormulaLinearizationManager::new();
    let linearized = manager.linearize(&Formula::ne(&int("x"), &int("y")));
    match linearized.as_ref() {
        Formula::Or(operands) => {
            assert_eq!(operands.len(), 2);
            for operand in operands.iter() {
                match operand.as_ref() {
                    Formula::Atom(atom) => assert_eq!(atom.relation, Relation::LessOrEqual),
                    _ => panic!("expected an atom, found {}", operand),
                }
            }
        }
        _ => panic!("expected a disjunction, found {}", linearized),
    }
}

#[test]
fn enforced_choice_keeps_the_branch_of_the_model() {
    let manager = FormulaLinearizationManager::new();
    let formula = Formula::or(vec![
        Formula::le(&int("x"), &constant(0)),
        Formula::ge(&int("x"), &constant(10)),
    ]);
    let annotated = manager.annotate_disjunctions(&manager.linearize(&formula));
    let query = Formula::and(vec![annotated.clone(), Formula::ge(&int("x"), &constant(5))]);
    let model = Z3Solver::new().model(&query).unwrap().unwrap();
    assert_eq!(
        manager.enforce_choice(&annotated, &model),
        Formula::ge(&int("x"), &constant(10))
    );
}

#[test]
fn enforced_choice_drops_the_start_constraints() {
    let manager = FormulaLinearizationManager::new();
    let start = Formula::le(&int("x"), &constant(0));
    let guarded = FormulaLinearizationManager::guard_start_constraints(start);
    let path = Formula::eq(&int("y"), &int("x").plus(&constant(1)));
    let annotated = manager.annotate_disjunctions(&Formula::and(vec![guarded, path.clone()]));
    let query = Formula::and(vec![
        annotated.clone(),
        Formula::boolean(FormulaLinearizationManager::initial_condition_variable()),
    ]);
    let model = Z3Solver::new().model(&query).unwrap().unwrap();
    assert_eq!(manager.enforce_choice(&annotated, &model), path);
}

#[test]
fn disequality_yields_one_policy_per_direction() {
    let manager = FormulaLinearizationManager::new();
    let solver = Z3Solver::new();
    let formula = Formula::ne(&int("x"), &int("y"));
    let annotated = manager.annotate_disjunctions(&manager.linearize(&formula));
    let mut policies = Vec::new();
    for direction in [
        Formula::lt(&int("x"), &int("y")),
        Formula::gt(&int("x"), &int("y")),
    ] {
        let query = Formula::and(vec![annotated.clone(), direction]);
        let model = solver.model(&query).unwrap().unwrap();
        let policy = manager.enforce_choice(&annotated, &model);
        assert!(!policy
            .variables()
            .iter()
            .any(FormulaLinearizationManager::is_choice_variable));
        assert!(!solver.is_unsat(&policy).unwrap());
        policies.push(policy);
    }
    assert_ne!(policies[0], policies[1]);
    assert!(solver
        .is_unsat(&Formula::and(policies.clone()))
        .unwrap());
}

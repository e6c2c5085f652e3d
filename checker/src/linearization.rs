// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::formula::{
    Formula, FormulaTrait, LinearExpr, Model, Relation, Sort, Substitution, Variable,
};
use crate::utils;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Prefix of the integer variables that record which disjunct the optimizer took.
pub const CHOICE_VARIABLE_PREFIX: &str = "__POLICY_CHOICE_";

/// The boolean that switches the start constraints of a segment on.
pub const INITIAL_CONDITION_VARIABLE: &str = "__USE_INITIAL_CONDITION";

/// Rewrites formulas into a form whose disjunctive branches are convex, marks every
/// disjunction with a choice variable and collapses annotated formulas to the branch a
/// model selects. Memo tables live as long as the manager.
#[derive(Debug, Default)]
pub struct FormulaLinearizationManager {
    linearized: RefCell<HashMap<(usize, bool), (Rc<Formula>, Rc<Formula>)>>,
    next_choice: Cell<usize>,
}

impl FormulaLinearizationManager {
    pub fn new() -> FormulaLinearizationManager {
        FormulaLinearizationManager::default()
    }

    pub fn initial_condition_variable() -> Variable {
        Variable::new(INITIAL_CONDITION_VARIABLE, Sort::Boolean)
    }

    /// not(use-initial-condition) or start. The disjunction is never annotated.
    pub fn guard_start_constraints(start: Rc<Formula>) -> Rc<Formula> {
        let flag = Formula::boolean(FormulaLinearizationManager::initial_condition_variable());
        Formula::or(vec![Formula::not(flag), start])
    }

    pub fn is_choice_variable(variable: &Variable) -> bool {
        variable.name.starts_with(CHOICE_VARIABLE_PREFIX)
    }

    /// Pushes negations down to atoms and booleans, rewriting the negation of a comparison
    /// into the comparison in the other direction, and a != b into a > b or a < b.
    pub fn linearize(&self, formula: &Rc<Formula>) -> Rc<Formula> {
        self.linearize_with_polarity(formula, true)
    }

    fn linearize_with_polarity(&self, formula: &Rc<Formula>, positive: bool) -> Rc<Formula> {
        let key = (Rc::as_ptr(formula) as usize, positive);
        if let Some((_, result)) = self.linearized.borrow().get(&key) {
            return result.clone();
        }
        let result = match formula.as_ref() {
            Formula::True | Formula::False => Formula::from_bool(formula.is_true() == positive),
            Formula::Boolean(..) => {
                if positive {
                    formula.clone()
                } else {
                    Formula::not(formula.clone())
                }
            }
            Formula::Atom(atom) => {
                if positive {
                    formula.clone()
                } else {
                    match atom.relation {
                        Relation::LessOrEqual => {
                            Formula::atom(atom.expr.negated(), Relation::LessThan)
                        }
                        Relation::LessThan => {
                            Formula::atom(atom.expr.negated(), Relation::LessOrEqual)
                        }
                        Relation::Equal => Formula::or(vec![
                            Formula::atom(atom.expr.negated(), Relation::LessThan),
                            Formula::atom(atom.expr.clone(), Relation::LessThan),
                        ]),
                    }
                }
            }
            Formula::Not(operand) => self.linearize_with_polarity(operand, !positive),
            Formula::And(operands) => {
                let operands = operands
                    .iter()
                    .map(|o| self.linearize_with_polarity(o, positive))
                    .collect();
                if positive {
                    Formula::and(operands)
                } else {
                    Formula::or(operands)
                }
            }
            Formula::Or(operands) => {
                let operands = operands
                    .iter()
                    .map(|o| self.linearize_with_polarity(o, positive))
                    .collect();
                if positive {
                    Formula::or(operands)
                } else {
                    Formula::and(operands)
                }
            }
        };
        self.linearized
            .borrow_mut()
            .insert(key, (formula.clone(), result.clone()));
        result
    }

    /// Conjoins every disjunct of every disjunction with choice = i for a fresh integer
    /// choice variable, except for the guard of the start constraints.
    pub fn annotate_disjunctions(&self, formula: &Rc<Formula>) -> Rc<Formula> {
        match formula.as_ref() {
            Formula::And(operands) => Formula::and(
                operands
                    .iter()
                    .map(|o| self.annotate_disjunctions(o))
                    .collect(),
            ),
            Formula::Not(operand) => Formula::not(self.annotate_disjunctions(operand)),
            Formula::Or(operands) if is_start_guard(operands) => formula.clone(),
            Formula::Or(operands) => {
                let choice = self.fresh_choice_variable();
                Formula::or(
                    operands
                        .iter()
                        .enumerate()
                        .map(|(i, o)| {
                            let selected = Formula::eq(
                                &LinearExpr::variable(choice.clone()),
                                &LinearExpr::constant(utils::rational(i as i64)),
                            );
                            Formula::and(vec![self.annotate_disjunctions(o), selected])
                        })
                        .collect(),
                )
            }
            _ => formula.clone(),
        }
    }

    fn fresh_choice_variable(&self) -> Variable {
        let index = self.next_choice.get();
        self.next_choice.set(index + 1);
        Variable::new(&format!("{}{}", CHOICE_VARIABLE_PREFIX, index), Sort::INTEGER)
    }

    /// Replaces the initial condition flag by false and every choice variable by its value in
    /// the model, which leaves only the disjuncts the model took.
    pub fn enforce_choice(&self, annotated: &Rc<Formula>, model: &Model) -> Rc<Formula> {
        let mut substitution = Substitution::default();
        substitution
            .booleans
            .insert(FormulaLinearizationManager::initial_condition_variable(), false);
        for variable in annotated.variables() {
            if FormulaLinearizationManager::is_choice_variable(&variable) {
                if let Some(value) = model.value(&variable) {
                    substitution
                        .values
                        .insert(variable, LinearExpr::constant(value.clone()));
                }
            }
        }
        annotated.substitute(&substitution).simplify()
    }
}

fn is_start_guard(operands: &[Rc<Formula>]) -> bool {
    operands.iter().any(|o| match o.as_ref() {
        Formula::Not(inner) => matches!(
            inner.as_ref(),
            Formula::Boolean(v) if &*v.name == INITIAL_CONDITION_VARIABLE
        ),
        _ => false,
    })
}

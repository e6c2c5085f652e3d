// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Sequence interpolants by projection. The interpolant after the k-th formula is the negation of
// the projection of the remaining formulas onto the variables they share with the first k.
// Projection splits a formula into conjunctive branches and eliminates variables from each
// branch by Fourier-Motzkin elimination.

use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Atom, Formula, FormulaTrait, LinearExpr, Relation, Variable};
use crate::k_limits;

use log_derive::*;
use mirai_annotations::*;
use num_traits::{Signed, Zero};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

/// Whether the exploration of branches should go on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Search {
    Continue,
    GiveUp,
}

/// A conjunction of atoms and boolean literals.
#[derive(Clone, Debug, Default)]
struct Branch {
    atoms: Vec<Atom>,
    booleans: Vec<(Variable, bool)>,
}

impl Branch {
    fn boolean(&self, variable: &Variable) -> Option<bool> {
        self.booleans
            .iter()
            .find(|(v, _)| v == variable)
            .map(|(_, b)| *b)
    }
}

/// Enumerates the conjunctive branches of a formula.
struct Explorer<'a> {
    explored: usize,
    visit: &'a mut dyn FnMut(&Branch) -> Search,
}

impl<'a> Explorer<'a> {
    /// Conjunctions are taken apart first. Disjunctions are deferred until nothing else is
    /// pending, so that contradictory boolean literals cut a branch before it is split.
    fn expand(&mut self, mut pending: Vec<(Rc<Formula>, bool)>, mut branch: Branch) -> Search {
        let mut deferred = Vec::new();
        loop {
            let (formula, positive) = match pending.pop() {
                Some(item) => item,
                None => match deferred.pop() {
                    Some(item) => return self.split(item, deferred, branch),
                    None => break,
                },
            };
            match formula.as_ref() {
                Formula::True => {
                    if !positive {
                        return Search::Continue;
                    }
                }
                Formula::False => {
                    if positive {
                        return Search::Continue;
                    }
                }
                Formula::Boolean(variable) => match branch.boolean(variable) {
                    Some(value) if value != positive => return Search::Continue,
                    Some(_) => {}
                    None => branch.booleans.push((variable.clone(), positive)),
                },
                Formula::Atom(atom) => {
                    if positive {
                        if atom.expr.is_constant() {
                            if !atom.holds_for(atom.expr.constant_part()) {
                                return Search::Continue;
                            }
                        } else {
                            branch.atoms.push(atom.clone());
                        }
                    } else {
                        pending.push((negate_atom(atom), true));
                    }
                }
                Formula::Not(operand) => pending.push((operand.clone(), !positive)),
                Formula::And(operands) if positive => {
                    pending.extend(operands.iter().map(|o| (o.clone(), true)));
                }
                Formula::Or(operands) if !positive => {
                    pending.extend(operands.iter().map(|o| (o.clone(), false)));
                }
                Formula::And(..) | Formula::Or(..) => deferred.push((formula.clone(), positive)),
            }
        }
        self.explored += 1;
        if self.explored > k_limits::MAX_DISJUNCT_BRANCHES {
            return Search::GiveUp;
        }
        (self.visit)(&branch)
    }

    /// Explores each operand of a disjunction (or of a negated conjunction) in turn.
    fn split(
        &mut self,
        (formula, positive): (Rc<Formula>, bool),
        rest: Vec<(Rc<Formula>, bool)>,
        branch: Branch,
    ) -> Search {
        let operands = match formula.as_ref() {
            Formula::And(operands) | Formula::Or(operands) => operands,
            _ => assume_unreachable!("only disjunctions are deferred"),
        };
        for operand in operands.iter() {
            let mut next = rest.clone();
            next.push((operand.clone(), positive));
            if self.expand(next, branch.clone()) == Search::GiveUp {
                return Search::GiveUp;
            }
        }
        Search::Continue
    }
}

/// The negation of an atom, as a formula over normalized atoms.
pub fn negate_atom(atom: &Atom) -> Rc<Formula> {
    match atom.relation {
        Relation::LessOrEqual => Formula::atom(atom.expr.negated(), Relation::LessThan),
        Relation::LessThan => Formula::atom(atom.expr.negated(), Relation::LessOrEqual),
        Relation::Equal => Formula::or(vec![
            Formula::atom(atom.expr.clone(), Relation::LessThan),
            Formula::atom(atom.expr.negated(), Relation::LessThan),
        ]),
    }
}

/// The disjunction of the rational projections of the branches of the formula onto the
/// variables to keep. Branches that turn out to be infeasible while eliminating are dropped.
#[logfn_inputs(TRACE)]
pub fn project(formula: &Rc<Formula>, keep: &BTreeSet<Variable>) -> PolicyResult<Rc<Formula>> {
    let mut disjuncts = Vec::new();
    let mut failure = None;
    let mut visit = |branch: &Branch| {
        let mut constraints = branch.atoms.clone();
        let eliminated = branch
            .atoms
            .iter()
            .flat_map(|a| a.expr.variables().cloned())
            .filter(|v| !keep.contains(v))
            .collect::<BTreeSet<_>>();
        for variable in eliminated.iter() {
            match eliminate(constraints, variable) {
                Ok(Some(remaining)) => constraints = remaining,
                Ok(None) => return Search::Continue,
                Err(e) => {
                    failure = Some(e);
                    return Search::GiveUp;
                }
            }
        }
        let mut conjuncts = constraints
            .into_iter()
            .map(|a| Formula::atom(a.expr, a.relation))
            .collect::<Vec<_>>();
        for (variable, value) in branch.booleans.iter() {
            if keep.contains(variable) {
                let literal = Formula::boolean(variable.clone());
                conjuncts.push(if *value { literal } else { Formula::not(literal) });
            }
        }
        disjuncts.push(Formula::and(conjuncts));
        Search::Continue
    };
    let mut explorer = Explorer {
        explored: 0,
        visit: &mut visit,
    };
    let search = explorer.expand(vec![(formula.clone(), true)], Branch::default());
    if let Some(error) = failure {
        return Err(error);
    }
    if search == Search::GiveUp {
        return Err(PolicyError::SolverUndefined(
            "projecting a formula with too many branches".to_string(),
        ));
    }
    Ok(Formula::or(disjuncts))
}

/// Candidate sequence interpolants for the formulas: the k-th candidate is the negated
/// projection of formulas[k..] onto the variables shared with formulas[..k]. Over the
/// rationals the candidates are interpolants. Over the integers the prefix may fail to imply
/// its candidate, so callers must validate them.
pub fn sequence_candidates(formulas: &[Rc<Formula>]) -> PolicyResult<Vec<Rc<Formula>>> {
    let mut candidates = Vec::with_capacity(formulas.len().saturating_sub(1));
    for k in 1..formulas.len() {
        let prefix_variables = formulas[..k]
            .iter()
            .flat_map(|f| f.variables())
            .collect::<BTreeSet<_>>();
        let suffix = Formula::and(formulas[k..].to_vec());
        let shared = suffix
            .variables()
            .into_iter()
            .filter(|v| prefix_variables.contains(v))
            .collect::<BTreeSet<_>>();
        candidates.push(Formula::not(project(&suffix, &shared)?));
    }
    Ok(candidates)
}

/// Eliminates the variable from the conjunction of the constraints. Returns None if the
/// constraints turn out to be infeasible.
pub fn eliminate(constraints: Vec<Atom>, variable: &Variable) -> PolicyResult<Option<Vec<Atom>>> {
    let equality = constraints
        .iter()
        .position(|a| a.relation == Relation::Equal && !a.expr.coefficient(variable).is_zero());
    let combined = match equality {
        Some(position) => {
            let mut constraints = constraints;
            let equality = constraints.remove(position);
            let coefficient = equality.expr.coefficient(variable);
            let value = equality
                .expr
                .minus(&LinearExpr::term(variable.clone(), coefficient.clone()))
                .scaled(&-coefficient.recip());
            let substitution = HashMap::from([(variable.clone(), value)]);
            constraints
                .into_iter()
                .map(|a| Atom {
                    expr: a.expr.substitute(&substitution),
                    relation: a.relation,
                })
                .collect::<Vec<_>>()
        }
        None => {
            let mut result = Vec::new();
            let mut lower = Vec::new();
            let mut upper = Vec::new();
            for atom in constraints {
                let coefficient = atom.expr.coefficient(variable);
                if coefficient.is_zero() {
                    result.push(atom);
                } else {
                    // Scale so that the variable has coefficient +1 or -1.
                    let scaled = Atom {
                        expr: atom.expr.scaled(&coefficient.abs().recip()),
                        relation: atom.relation,
                    };
                    if coefficient.is_positive() {
                        upper.push(scaled);
                    } else {
                        lower.push(scaled);
                    }
                }
            }
            if lower.len() * upper.len() + result.len() > k_limits::MAX_PROJECTION_CONSTRAINTS {
                return Err(PolicyError::SolverUndefined(
                    "eliminating a variable from too many constraints".to_string(),
                ));
            }
            for u in upper.iter() {
                for l in lower.iter() {
                    let relation = if u.relation == Relation::LessThan
                        || l.relation == Relation::LessThan
                    {
                        Relation::LessThan
                    } else {
                        Relation::LessOrEqual
                    };
                    result.push(Atom {
                        expr: u.expr.plus(&l.expr),
                        relation,
                    });
                }
            }
            result
        }
    };
    let mut remaining = BTreeSet::new();
    for atom in combined {
        if atom.expr.is_constant() {
            if !atom.holds_for(atom.expr.constant_part()) {
                return Ok(None);
            }
        } else {
            remaining.insert(atom);
        }
    }
    Ok(Some(remaining.into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Sort;
    use crate::utils::rational;

    fn x() -> LinearExpr {
        LinearExpr::variable(Variable::new("x", Sort::Rational))
    }

    fn y() -> LinearExpr {
        LinearExpr::variable(Variable::new("y", Sort::Rational))
    }

    fn le(expr: LinearExpr) -> Atom {
        Atom {
            expr,
            relation: Relation::LessOrEqual,
        }
    }

    #[test]
    fn eliminating_between_bounds_combines_them() {
        // x - y <= 0 and 3 - x <= 0 give 3 - y <= 0.
        let constraints = vec![
            le(x().minus(&y())),
            le(LinearExpr::constant(rational(3)).minus(&x())),
        ];
        let remaining = eliminate(constraints, &Variable::new("x", Sort::Rational))
            .unwrap()
            .unwrap();
        assert_eq!(
            remaining,
            vec![le(LinearExpr::constant(rational(3)).minus(&y()))]
        );
    }

    #[test]
    fn eliminating_from_contradictory_bounds_is_infeasible() {
        let constraints = vec![
            le(x().minus(&LinearExpr::constant(rational(1)))),
            le(LinearExpr::constant(rational(2)).minus(&x())),
        ];
        let result = eliminate(constraints, &Variable::new("x", Sort::Rational)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn projection_keeps_every_disjunct() {
        let formula = Formula::or(vec![
            Formula::and(vec![
                Formula::eq(&x(), &y()),
                Formula::le(&y(), &LinearExpr::constant(rational(1))),
            ]),
            Formula::le(&x(), &LinearExpr::constant(rational(-5))),
        ]);
        let keep = BTreeSet::from([Variable::new("x", Sort::Rational)]);
        let projection = project(&formula, &keep).unwrap();
        assert!(projection
            .variables()
            .iter()
            .all(|v| v.name.as_ref() == "x"));
        assert!(matches!(projection.as_ref(), Formula::Or(operands) if operands.len() == 2));
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Formula, FormulaTrait, LinearExpr, Sort, Variable};
use crate::location::{Location, LocationId};
use crate::options::ValueDeterminationStrategy;
use crate::policy_bound::PolicyBound;
use crate::policy_state::{AbstractedId, StateArena};
use crate::smt_solver::{OptimizationSolver, OptimizationStatus};
use crate::template::Template;
use crate::utils::{Rational, ShutdownNotifier};

use log_derive::logfn_inputs;
use rpds::RedBlackTreeMap;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// Prefix of the variables that stand for the bound of a template at a location.
pub const ABSTRACT_VALUE_PREFIX: &str = "__abstract_value";

/// The variable that stands for the value of the template at the location in the system
/// solved by value determination.
pub fn abstract_value(location: LocationId, template: &Template) -> Variable {
    Variable::new(
        &format!("{}[{}]({})", ABSTRACT_VALUE_PREFIX, location, template),
        Sort::Rational,
    )
}

/// Recomputes the bounds of the templates that a merge updated, as the solution of the
/// global system of the policies they depend on.
pub struct ValueDeterminationManager<'a> {
    optimizer: &'a dyn OptimizationSolver,
    epsilon: Rational,
    notifier: ShutdownNotifier,
}

impl Debug for ValueDeterminationManager<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "ValueDeterminationManager".fmt(f)
    }
}

impl<'a> ValueDeterminationManager<'a> {
    pub fn new(
        optimizer: &'a dyn OptimizationSolver,
        epsilon: Rational,
        notifier: ShutdownNotifier,
    ) -> ValueDeterminationManager<'a> {
        ValueDeterminationManager {
            optimizer,
            epsilon,
            notifier,
        }
    }

    /// Returns the abstraction of the merged state with the updated templates set to their
    /// values in the system. Templates whose value is unbounded are removed.
    /// The latest map gives the current state at every location other than the one of the
    /// merged state.
    #[logfn_inputs(TRACE)]
    pub fn determine(
        &self,
        arena: &StateArena,
        latest: &HashMap<Location, AbstractedId>,
        merged: AbstractedId,
        updated: &BTreeSet<Template>,
        strategy: ValueDeterminationStrategy,
    ) -> PolicyResult<RedBlackTreeMap<Template, PolicyBound>> {
        if strategy == ValueDeterminationStrategy::SharedWithFallback {
            if let Some(result) = self.solve(arena, latest, merged, updated, true)? {
                return Ok(result);
            }
            warn!(
                "value determination with shared namespaces is unsatisfiable at {}, retrying with unique namespaces",
                arena.abstracted(merged).location
            );
        }
        self.solve(arena, latest, merged, updated, false)?
            .ok_or_else(|| {
                PolicyError::ContractViolation(format!(
                    "the value determination system at {} is unsatisfiable",
                    arena.abstracted(merged).location
                ))
            })
    }

    /// None if the system is unsatisfiable.
    fn solve(
        &self,
        arena: &StateArena,
        latest: &HashMap<Location, AbstractedId>,
        merged: AbstractedId,
        updated: &BTreeSet<Template>,
        share_namespaces: bool,
    ) -> PolicyResult<Option<RedBlackTreeMap<Template, PolicyBound>>> {
        let system = build_system(arena, latest, merged, updated, share_namespaces);
        let state = arena.abstracted(merged);
        debug!(
            "value determination at {} for {} templates, {} constraints",
            state.location,
            updated.len(),
            system.len()
        );
        let mut session = self.optimizer.new_session();
        for constraint in system {
            trace!("value determination constraint {}", constraint);
            session.add_constraint(constraint);
        }
        let mut abstraction = state.abstraction.clone();
        for template in updated.iter() {
            check_for_shutdown!(self.notifier);
            let bound = match state.bound(template) {
                Some(bound) => bound,
                None => continue,
            };
            let value = LinearExpr::variable(abstract_value(state.location_id, template));
            session.push();
            session.add_constraint(Formula::ge(
                &value,
                &LinearExpr::constant(bound.bound.clone()),
            ));
            let objective = session.maximize(&value);
            let status = session.check();
            let upper = session.upper(objective, &self.epsilon);
            session.pop();
            match status {
                OptimizationStatus::Opt => {}
                OptimizationStatus::Unsat => return Ok(None),
                OptimizationStatus::Undef => {
                    return Err(PolicyError::SolverUndefined(format!(
                        "determining the value of {} at {}",
                        template, state.location
                    )))
                }
            }
            let upper = upper.map(|v| {
                if template.linear_expression().is_integral() {
                    v.floor()
                } else {
                    v
                }
            });
            match upper {
                Some(value) if template.fits_bound(&value) => {
                    debug!("{} <= {} at {}", template, value, state.location);
                    abstraction.insert_mut(template.clone(), bound.with_bound(value));
                }
                _ => {
                    debug!(
                        "value determination leaves {} unbounded at {}",
                        template, state.location
                    );
                    abstraction.remove_mut(template);
                }
            }
        }
        Ok(Some(abstraction))
    }
}

/// Follows the dependencies of the updated templates of the merged state backwards and
/// collects, for every visited (location, template) pair, the equality between its abstract
/// value and the template at the end of its policy, the policy itself and an upper bound on
/// the start of the policy by the abstract values of the predecessor. Closed bounds become
/// plain upper bounds on the abstract value.
fn build_system(
    arena: &StateArena,
    latest: &HashMap<Location, AbstractedId>,
    merged: AbstractedId,
    updated: &BTreeSet<Template>,
    share_namespaces: bool,
) -> Vec<Rc<Formula>> {
    let merged_location = &arena.abstracted(merged).location;
    let mut constraints = Vec::new();
    let mut visited = HashSet::new();
    let mut namespaces: HashMap<(AbstractedId, Rc<Formula>), String> = HashMap::new();
    let mut worklist = updated
        .iter()
        .map(|t| (merged, t.clone()))
        .collect::<Vec<_>>();
    while let Some((id, template)) = worklist.pop() {
        let state = arena.abstracted(id);
        if !visited.insert((state.location_id, template.clone())) {
            continue;
        }
        let bound = match state.bound(&template) {
            Some(bound) => bound,
            None => continue,
        };
        let value = LinearExpr::variable(abstract_value(state.location_id, &template));
        if bound.is_closed() {
            constraints.push(Formula::le(
                &value,
                &LinearExpr::constant(bound.bound.clone()),
            ));
            continue;
        }
        let prefix = if share_namespaces {
            let next = namespaces.len();
            match namespaces.entry(bound.policy_identity()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let prefix = format!("__vd_shared{}::", next);
                    constraints.push(prefixed_formula(&bound.formula.formula, &prefix));
                    entry.insert(prefix).clone()
                }
            }
        } else {
            let prefix = format!("__vd{}::", visited.len());
            constraints.push(prefixed_formula(&bound.formula.formula, &prefix));
            prefix
        };
        let end = prefixed_expression(&template.instantiate(&bound.formula.ssa), &prefix);
        constraints.push(Formula::eq(&value, &end));

        let predecessor = arena.abstracted(bound.predecessor);
        let next = if predecessor.location == *merged_location {
            merged
        } else {
            latest
                .get(&predecessor.location)
                .copied()
                .unwrap_or(bound.predecessor)
        };
        for dependency in bound.dependencies.iter() {
            let start = prefixed_expression(&dependency.instantiate(&predecessor.ssa), &prefix);
            let incoming = LinearExpr::variable(abstract_value(predecessor.location_id, dependency));
            constraints.push(Formula::le(&start, &incoming));
            worklist.push((next, dependency.clone()));
        }
    }
    constraints
}

fn prefixed_formula(formula: &Rc<Formula>, prefix: &str) -> Rc<Formula> {
    formula.rename_free_variables(&|v| v.with_prefix(prefix))
}

fn prefixed_expression(expression: &LinearExpr, prefix: &str) -> LinearExpr {
    expression.map_variables(&|v| v.with_prefix(prefix))
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::Cfa;
use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Formula, FormulaTrait, Model};
use crate::location::Location;
use crate::precision::TemplatePrecision;
use crate::smt_solver::InterpolatingSolver;
use crate::template::Template;
use crate::utils::ShutdownNotifier;

use std::collections::BTreeSet;
use std::rc::Rc;

/// The path formula between two consecutive abstraction points of a counterexample.
#[derive(Clone, Debug)]
pub struct Segment {
    /// The location of the abstracted state the segment starts from.
    pub location: Location,
    pub formula: Rc<Formula>,
}

/// The chain of segments from the root of the search to a reachable target state.
#[derive(Clone, Debug)]
pub struct Counterexample {
    pub target: Location,
    /// The constraints of the state the first segment starts from.
    pub root_constraints: Rc<Formula>,
    pub segments: Vec<Segment>,
    /// False if the chain does not start at the program entry or goes through a call summary,
    /// in which case a feasible chain is not a witness for an actual violation.
    pub exact: bool,
    /// The model the reachability check found for the target state.
    pub model: Option<Model>,
}

#[derive(Clone, Debug)]
pub enum RefinementResult {
    /// The chain is satisfiable, with a model of the whole chain.
    Feasible(Option<Model>),
    /// New templates were added to the precision.
    Refined,
    /// The chain is spurious but nothing was learned from it.
    NoProgress,
}

/// Explains spurious counterexamples with sequence interpolants and tracks the directions
/// the interpolants talk about as templates at the abstraction points of the chain.
pub struct PolicyInterpolationRefiner<'a> {
    cfa: &'a Cfa,
    solver: &'a dyn InterpolatingSolver,
    notifier: ShutdownNotifier,
}

impl<'a> PolicyInterpolationRefiner<'a> {
    pub fn new(
        cfa: &'a Cfa,
        solver: &'a dyn InterpolatingSolver,
        notifier: ShutdownNotifier,
    ) -> PolicyInterpolationRefiner<'a> {
        PolicyInterpolationRefiner {
            cfa,
            solver,
            notifier,
        }
    }

    pub fn refine(
        &self,
        counterexample: &Counterexample,
        precision: &mut TemplatePrecision,
    ) -> PolicyResult<RefinementResult> {
        let mut session = self.solver.new_interpolating_session();
        let mut handles = Vec::with_capacity(counterexample.segments.len());
        for (i, segment) in counterexample.segments.iter().enumerate() {
            let formula = if i == 0 {
                Formula::and(vec![
                    counterexample.root_constraints.clone(),
                    segment.formula.clone(),
                ])
            } else {
                segment.formula.clone()
            };
            handles.push(session.push(formula));
        }
        if !session.is_unsat()? {
            info!(
                "counterexample to {} with {} segments is feasible",
                counterexample.target,
                handles.len()
            );
            return Ok(RefinementResult::Feasible(session.model()));
        }
        let interpolants = match session.sequence_interpolants(&handles) {
            Ok(interpolants) => interpolants,
            Err(PolicyError::SolverUndefined(reason)) => {
                debug!(
                    "no interpolants for the path to {}: {}",
                    counterexample.target, reason
                );
                return Ok(RefinementResult::NoProgress);
            }
            Err(e) => return Err(e),
        };
        let mut changed = false;
        // The interpolant after the segments up to j holds where segment j + 1 starts.
        for (interpolant, segment) in interpolants
            .iter()
            .zip(counterexample.segments.iter().skip(1))
        {
            check_for_shutdown!(self.notifier);
            debug!("interpolant at {}: {}", segment.location, interpolant);
            let templates = self.templates_of(interpolant);
            changed |= precision.add_templates(self.cfa, &segment.location, templates);
        }
        if changed {
            Ok(RefinementResult::Refined)
        } else {
            Ok(RefinementResult::NoProgress)
        }
    }

    /// The program variables of the interpolant in both directions, along with the linear
    /// parts of its atoms and their negations.
    fn templates_of(&self, interpolant: &Rc<Formula>) -> BTreeSet<Template> {
        let is_program_variable = |name: &str| self.cfa.variable(name).is_some();
        let mut result = BTreeSet::new();
        for variable in interpolant.variables() {
            if variable.sort.is_numeric() && is_program_variable(&variable.name) {
                let template = Template::variable(&variable);
                result.insert(template.negated());
                result.insert(template);
            }
        }
        for atom in interpolant.uninstantiate().atoms() {
            if let Formula::Atom(atom) = atom.as_ref() {
                if !atom.expr.variables().all(|v| is_program_variable(&v.name)) {
                    continue;
                }
                if let Some(template) = Template::new(&atom.expr) {
                    result.insert(template.negated());
                    result.insert(template);
                }
            }
        }
        result
    }
}

/// Raises the template generation level when interpolation makes no progress.
#[derive(Debug, Default)]
pub struct UnguidedTemplateRefiner {}

impl UnguidedTemplateRefiner {
    pub fn new() -> UnguidedTemplateRefiner {
        UnguidedTemplateRefiner {}
    }

    /// Returns false if the precision is already at the highest level.
    pub fn refine(&self, precision: &mut TemplatePrecision) -> bool {
        match precision.level().next() {
            Some(level) => {
                info!("raising the template level to {:?}", level);
                precision.raise_level(level)
            }
            None => false,
        }
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::{Cfa, CfaEdge};
use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Formula, FormulaTrait, LinearExpr, Model};
use crate::formula_cache::FormulaCache;
use crate::linearization::FormulaLinearizationManager;
use crate::location::Location;
use crate::options::{AbstractionLocations, Interprocedural, PolicyOptions};
use crate::path_formula::{PathFormula, PathFormulaManager, SsaMap};
use crate::policy_bound::PolicyBound;
use crate::policy_state::{
    AbstractedId, IntermediateId, PolicyAbstractedState, PolicyIntermediateState, PolicyState,
    StateArena,
};
use crate::precision::TemplatePrecision;
use crate::refiner::{Counterexample, Segment};
use crate::smt_solver::{OptimizationSession, OptimizationSolver, OptimizationStatus, SmtSolver};
use crate::summaries::{BlockSummary, PolicyReducer, PolicySummaryManager, ReducedState};
use crate::template::Template;
use crate::utils::{self, Rational, ShutdownNotifier};
use crate::value_determination::ValueDeterminationManager;

use log_derive::logfn_inputs;
use mirai_annotations::*;
use petgraph::graph::EdgeIndex;
use rpds::RedBlackTreeMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// The outcome of trying to bound a template by summing the bounds of its parts.
enum Decomposition {
    Bounded(PolicyBound),
    Unbounded,
    NotApplicable,
}

/// Implements the operations the reachability driver needs: transfer, strengthening,
/// precision adjustment (pruning, abstraction, join with the previous state at the same
/// location and value determination), merge and the coverage check.
/// All states live in the arena of the manager, so a manager is used for one reachability run.
pub struct PolicyIterationManager<'a> {
    cfa: &'a Cfa,
    options: &'a PolicyOptions,
    precision: &'a TemplatePrecision,
    solver: &'a dyn SmtSolver,
    optimizer: &'a dyn OptimizationSolver,
    path_formulas: PathFormulaManager<'a>,
    value_determination: ValueDeterminationManager<'a>,
    arena: StateArena,
    formula_cache: FormulaCache,
    linearization: FormulaLinearizationManager,
    /// The number of times the bound of a template at a location has been updated by a join.
    widening_counters: HashMap<(Location, Template), usize>,
    /// The most recent abstracted state at each location. New abstractions are joined with it.
    latest: HashMap<Location, AbstractedId>,
    /// Intermediate states whose path goes through a summary of a call.
    summarized: HashSet<IntermediateId>,
    violation_model: Option<Model>,
    notifier: ShutdownNotifier,
}

impl Debug for PolicyIterationManager<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "PolicyIterationManager".fmt(f)
    }
}

impl<'a> PolicyIterationManager<'a> {
    pub fn new(
        cfa: &'a Cfa,
        options: &'a PolicyOptions,
        precision: &'a TemplatePrecision,
        solver: &'a dyn SmtSolver,
        optimizer: &'a dyn OptimizationSolver,
        notifier: ShutdownNotifier,
    ) -> PolicyIterationManager<'a> {
        PolicyIterationManager {
            cfa,
            options,
            precision,
            solver,
            optimizer,
            path_formulas: PathFormulaManager::new(cfa),
            value_determination: ValueDeterminationManager::new(
                optimizer,
                options.epsilon.clone(),
                notifier.clone(),
            ),
            arena: StateArena::new(),
            formula_cache: FormulaCache::new(),
            linearization: FormulaLinearizationManager::new(),
            widening_counters: HashMap::new(),
            latest: HashMap::new(),
            summarized: HashSet::new(),
            violation_model: None,
            notifier,
        }
    }

    pub fn arena(&self) -> &StateArena {
        &self.arena
    }

    pub fn cfa(&self) -> &'a Cfa {
        self.cfa
    }

    /// The model of the last target state found to be reachable.
    pub fn violation_model(&self) -> Option<&Model> {
        self.violation_model.as_ref()
    }

    /// The current abstracted state at every location where one was computed.
    pub fn latest_states(&self) -> Vec<&PolicyAbstractedState> {
        let mut result = self
            .latest
            .values()
            .map(|id| self.arena.abstracted(*id))
            .collect::<Vec<_>>();
        result.sort_by(|a, b| a.location.cmp(&b.location));
        result
    }

    pub fn latest_state(&self, location: &Location) -> Option<AbstractedId> {
        self.latest.get(location).copied()
    }

    /// The state without any bounds at the location.
    pub fn initial_state(&mut self, location: Location) -> PolicyState {
        self.root_state(location, &[])
    }

    /// An abstracted state at the location whose bounds are facts. Starts a fresh SSA map.
    pub fn root_state(&mut self, location: Location, bounds: &[(Template, Rational)]) -> PolicyState {
        let ssa = SsaMap::new();
        let id = self.arena.next_abstracted_id();
        let abstraction = bounds
            .iter()
            .map(|(t, b)| (t.clone(), PolicyBound::closed(t, b.clone(), &ssa, id)))
            .collect::<RedBlackTreeMap<_, _>>();
        let extra_invariant = self.node_invariant(&location, &ssa);
        let state = PolicyAbstractedState {
            location_id: location.id(),
            location: location.clone(),
            abstraction,
            ssa,
            generator: None,
            sibling: None,
            extra_invariant,
        };
        let id = self.arena.add_abstracted(state);
        self.latest.insert(location, id);
        PolicyState::Abstracted(id)
    }

    fn node_invariant(&self, location: &Location, ssa: &SsaMap) -> Rc<Formula> {
        match self.cfa.invariant(location.node) {
            Some(invariant) => ssa.instantiate_formula(invariant),
            None => Formula::truth(),
        }
    }

    /// The intermediate state at the target of the edge. An abstracted state is first turned
    /// into the empty path at its location. None if the edge cannot be taken: a return that
    /// does not match the innermost call, or a path formula that is trivially false.
    #[logfn_inputs(TRACE)]
    pub fn successor(
        &mut self,
        state: PolicyState,
        edge: EdgeIndex,
    ) -> PolicyResult<Option<PolicyState>> {
        let (location, path_formula, backpointer, extra_invariant) = match state {
            PolicyState::Abstracted(id) => {
                let state = self.arena.abstracted(id);
                (
                    state.location.clone(),
                    PathFormula::empty(state.ssa.clone()),
                    id,
                    Formula::truth(),
                )
            }
            PolicyState::Intermediate(id) => {
                let state = self.arena.intermediate(id);
                (
                    state.location.clone(),
                    state.path_formula.clone(),
                    state.backpointer,
                    state.extra_invariant.clone(),
                )
            }
        };
        let target = self.cfa.edge_target(edge);
        let cfa_edge = self.cfa.edge(edge);
        let target_location = match cfa_edge {
            CfaEdge::Call(..) => location.entered(target),
            CfaEdge::Return(index) => {
                let call_node = self
                    .cfa
                    .call_sites
                    .get(*index)
                    .map(|cs| cs.call_node)
                    .ok_or_else(|| {
                        PolicyError::InvalidProgram(format!("unknown call site {}", index))
                    })?;
                if location.innermost_call() != Some(call_node) {
                    return Ok(None);
                }
                match location.returned(target) {
                    Some(location) => location,
                    None => return Ok(None),
                }
            }
            _ => location.moved_to(target),
        };
        let path_formula = self.path_formulas.make_and(&path_formula, cfa_edge)?;
        if path_formula.formula.is_false() {
            return Ok(None);
        }
        let id = self.arena.add_intermediate(PolicyIntermediateState::new(
            target_location,
            path_formula,
            backpointer,
            extra_invariant,
        ));
        Ok(Some(PolicyState::Intermediate(id)))
    }

    /// Conjoins an externally supplied invariant, instantiated at the SSA map of the state.
    #[logfn_inputs(TRACE)]
    pub fn strengthen(&mut self, state: PolicyState, invariant: &Rc<Formula>) -> PolicyState {
        match state {
            PolicyState::Abstracted(id) => {
                let mut strengthened = self.arena.abstracted(id).clone();
                let invariant = strengthened.ssa.instantiate_formula(invariant);
                strengthened.extra_invariant =
                    Formula::and(vec![strengthened.extra_invariant.clone(), invariant]);
                PolicyState::Abstracted(self.arena.add_abstracted(strengthened))
            }
            PolicyState::Intermediate(id) => {
                let state = self.arena.intermediate(id);
                let invariant = state.path_formula.ssa.instantiate_formula(invariant);
                let strengthened = PolicyIntermediateState::new(
                    state.location.clone(),
                    state.path_formula.clone(),
                    state.backpointer,
                    Formula::and(vec![state.extra_invariant.clone(), invariant]),
                );
                let summarized = self.summarized.contains(&id);
                let id = self.arena.add_intermediate(strengthened);
                if summarized {
                    self.summarized.insert(id);
                }
                PolicyState::Intermediate(id)
            }
        }
    }

    /// True if the states at the location are abstracted.
    pub fn should_abstract(&self, location: &Location) -> bool {
        let node = location.node;
        if self.options.interprocedural != Interprocedural::Inline
            && (self.cfa.is_function_entry(node)
                || self.cfa.is_function_exit(node)
                || self.cfa.is_call_or_return_node(node))
        {
            return true;
        }
        match self.options.abstraction_locations {
            AbstractionLocations::All => true,
            AbstractionLocations::LoopHeads => self.cfa.is_loop_head(node),
            AbstractionLocations::Merges => self.cfa.incoming_edge_count(node) > 1,
        }
    }

    /// Prunes unreachable states at abstraction points and target locations, and replaces
    /// intermediate states at abstraction points by the join of their abstraction with the
    /// previous abstracted state at the same location. None means the state is unreachable.
    #[logfn_inputs(TRACE)]
    pub fn precision_adjustment(&mut self, state: PolicyState) -> PolicyResult<Option<PolicyState>> {
        let id = match state {
            PolicyState::Abstracted(..) => return Ok(Some(state)),
            PolicyState::Intermediate(id) => id,
        };
        let location = self.arena.intermediate(id).location.clone();
        let is_target = self.cfa.is_error(location.node);
        if !is_target && !self.should_abstract(&location) {
            return Ok(Some(state));
        }
        if !self.is_reachable(id, is_target)? {
            debug!("{} is unreachable", location);
            return Ok(None);
        }
        if is_target {
            return Ok(Some(state));
        }
        let abstracted = self.perform_abstraction(id)?;
        let result = match self.latest.get(&location).copied() {
            Some(sibling) => self.join(abstracted, sibling)?,
            None => abstracted,
        };
        self.latest.insert(location, result);
        Ok(Some(PolicyState::Abstracted(result)))
    }

    /// Checks the start constraints of the backpointer, the path formula and the invariants
    /// for satisfiability. For target states a model is kept for reporting.
    fn is_reachable(&mut self, id: IntermediateId, capture_model: bool) -> PolicyResult<bool> {
        let state = self.arena.intermediate(id);
        let backpointer = self.arena.abstracted(state.backpointer);
        let formula = Formula::and(vec![
            backpointer.constraints(),
            state.path_formula.formula.clone(),
            state.extra_invariant.clone(),
        ]);
        trace!("reachability of {}: {}", state.location, formula);
        if capture_model {
            match self.solver.model(&formula)? {
                Some(model) => {
                    self.violation_model = Some(model);
                    Ok(true)
                }
                None => Ok(false),
            }
        } else {
            Ok(!self.solver.is_unsat(&formula)?)
        }
    }

    /// Bounds every template of the precision at the location of the state by maximizing it
    /// over the path formula and the start constraints of the backpointer.
    fn perform_abstraction(&mut self, id: IntermediateId) -> PolicyResult<AbstractedId> {
        let state = self.arena.intermediate(id).clone();
        let backpointer = self.arena.abstracted(state.backpointer).clone();
        let sibling = self
            .latest
            .get(&state.location)
            .map(|s| self.arena.abstracted(*s).clone());
        let ssa = state.path_formula.ssa.clone();
        let path_conjuncts = Formula::and(vec![
            state.path_formula.formula.clone(),
            state.extra_invariant.clone(),
        ])
        .conjuncts();
        let start_conjuncts = backpointer.constraints().conjuncts();
        let start_pointers = start_conjuncts
            .iter()
            .map(|c| Rc::as_ptr(c) as usize)
            .collect::<HashSet<_>>();
        let pool = path_conjuncts
            .into_iter()
            .chain(start_conjuncts)
            .collect::<Vec<_>>();

        let optimizer = self.optimizer;
        let mut session = optimizer.new_session();
        let mut abstraction = RedBlackTreeMap::new();
        let mut unbounded = HashSet::new();
        let templates = self.precision.templates(self.cfa, &state.location);
        for template in templates.iter() {
            check_for_shutdown!(self.notifier);
            if self.options.use_decomposition {
                match self.decompose(template, &abstraction, &unbounded, &pool, &ssa) {
                    Decomposition::Bounded(bound) => {
                        trace!("{} <= {} by decomposition", template, bound);
                        abstraction.insert_mut(template.clone(), bound);
                        continue;
                    }
                    Decomposition::Unbounded => {
                        unbounded.insert(template.clone());
                        continue;
                    }
                    Decomposition::NotApplicable => {}
                }
            }
            let hint = if self.options.use_bound_hints {
                sibling.as_ref().and_then(|s| s.bound(template))
            } else {
                None
            };
            session.push();
            let result = self.optimize_template(
                session.as_mut(),
                template,
                &state,
                &backpointer,
                &pool,
                &start_pointers,
                hint,
            );
            session.pop();
            match result? {
                Some(bound) => {
                    abstraction.insert_mut(template.clone(), bound);
                }
                None => {
                    unbounded.insert(template.clone());
                }
            }
        }
        let extra_invariant = self.node_invariant(&state.location, &ssa);
        let abstracted = PolicyAbstractedState {
            location_id: state.location.id(),
            location: state.location.clone(),
            abstraction,
            ssa,
            generator: Some(id),
            sibling: None,
            extra_invariant,
        };
        debug!("abstraction {}", abstracted);
        Ok(self.arena.add_abstracted(abstracted))
    }

    /// Maximizes the template in a pushed scope of the session. None if it is unbounded.
    #[allow(clippy::too_many_arguments)]
    fn optimize_template(
        &self,
        session: &mut dyn OptimizationSession,
        template: &Template,
        state: &PolicyIntermediateState,
        backpointer: &PolicyAbstractedState,
        pool: &[Rc<Formula>],
        start_pointers: &HashSet<usize>,
        hint: Option<&PolicyBound>,
    ) -> PolicyResult<Option<PolicyBound>> {
        let objective = template.instantiate(&state.path_formula.ssa);
        let seed = objective.variables().cloned().collect::<BTreeSet<_>>();
        let (start, path): (Vec<_>, Vec<_>) = self
            .formula_cache
            .relevant_conjuncts(pool, &seed)
            .into_iter()
            .partition(|c| start_pointers.contains(&(Rc::as_ptr(c) as usize)));
        let mut conjuncts = path;
        conjuncts.push(FormulaLinearizationManager::guard_start_constraints(
            Formula::and(start),
        ));
        let formula = Formula::and(conjuncts);
        let annotated = self
            .linearization
            .annotate_disjunctions(&self.linearization.linearize(&formula));
        trace!("maximizing {} subject to {}", objective, annotated);

        session.add_constraint(annotated.clone());
        session.add_constraint(Formula::boolean(
            FormulaLinearizationManager::initial_condition_variable(),
        ));
        if let Some(hint) = hint {
            // Paths that stay below the previous bound minus epsilon cannot change the join.
            session.add_constraint(Formula::ge(
                &objective,
                &LinearExpr::constant(&hint.bound - &self.options.epsilon),
            ));
        }
        let handle = session.maximize(&objective);
        match session.check() {
            OptimizationStatus::Opt => {}
            OptimizationStatus::Unsat => {
                return match hint {
                    // The new paths do not exceed the previous bound.
                    Some(hint) => Ok(Some(hint.clone())),
                    None => Err(PolicyError::ContractViolation(format!(
                        "maximizing {} at {} over a reachable state is unsatisfiable",
                        template, state.location
                    ))),
                };
            }
            OptimizationStatus::Undef => {
                return Err(PolicyError::SolverUndefined(format!(
                    "maximizing {} at {}",
                    template, state.location
                )))
            }
        }
        let bound = match session.upper(handle, &self.options.epsilon) {
            Some(bound) => bound,
            None => return Ok(None),
        };
        if !template.fits_bound(&bound) {
            debug!(
                "{} <= {} overflows at {}, treating it as unbounded",
                template, bound, state.location
            );
            return Ok(None);
        }
        let model = session.model().ok_or_else(|| {
            PolicyError::ContractViolation(format!(
                "no model for the optimum of {} at {}",
                template, state.location
            ))
        })?;
        let policy = self.linearization.enforce_choice(&annotated, &model);
        let dependencies = if self.options.check_bound_dependencies
            && self.solver.is_unsat(&Formula::and(vec![
                policy.clone(),
                Formula::gt(&objective, &LinearExpr::constant(bound.clone())),
            ]))? {
            BTreeSet::new()
        } else {
            backpointer.templates().cloned().collect()
        };
        let formula = PathFormula {
            formula: policy,
            ssa: state.path_formula.ssa.clone(),
            length: state.path_formula.length,
        };
        Ok(Some(PolicyBound::new(
            bound,
            formula,
            state.backpointer,
            dependencies,
        )))
    }

    /// Sums the bounds of the single variable parts of the template if the constraints
    /// relevant to the parts are pairwise disjoint.
    fn decompose(
        &self,
        template: &Template,
        abstraction: &RedBlackTreeMap<Template, PolicyBound>,
        unbounded: &HashSet<Template>,
        pool: &[Rc<Formula>],
        ssa: &SsaMap,
    ) -> Decomposition {
        let parts = match template.decompose() {
            Some(parts) => parts,
            None => return Decomposition::NotApplicable,
        };
        let mut support = HashSet::new();
        for (part, _) in parts.iter() {
            let seed = part
                .instantiate(ssa)
                .variables()
                .cloned()
                .collect::<BTreeSet<_>>();
            for conjunct in self.formula_cache.relevant_conjuncts(pool, &seed) {
                if !support.insert(Rc::as_ptr(&conjunct) as usize) {
                    return Decomposition::NotApplicable;
                }
            }
        }
        if parts.iter().any(|(part, _)| unbounded.contains(part)) {
            return Decomposition::Unbounded;
        }
        let mut bounds = Vec::with_capacity(parts.len());
        for (part, multiplier) in parts.iter() {
            match abstraction.get(part) {
                Some(bound) => bounds.push((bound, multiplier)),
                None => return Decomposition::NotApplicable,
            }
        }
        let (first, _) = bounds[0];
        if bounds.iter().any(|(b, _)| {
            b.predecessor != first.predecessor || b.formula.ssa != first.formula.ssa
        }) {
            return Decomposition::NotApplicable;
        }
        let mut sum = utils::rational(0);
        let mut policies = Vec::with_capacity(bounds.len());
        let mut dependencies = BTreeSet::new();
        for (bound, multiplier) in bounds.iter() {
            sum += *multiplier * &bound.bound;
            policies.push(bound.formula.formula.clone());
            dependencies.extend(bound.dependencies.iter().cloned());
        }
        if !template.fits_bound(&sum) {
            return Decomposition::Unbounded;
        }
        let formula = PathFormula {
            formula: Formula::and(policies),
            ssa: first.formula.ssa.clone(),
            length: first.formula.length,
        };
        Decomposition::Bounded(PolicyBound::new(
            sum,
            formula,
            first.predecessor,
            dependencies,
        ))
    }

    /// Joins a new abstracted state with the previous one at the same location. A template
    /// that is unbounded on either side is dropped, otherwise the larger bound is kept.
    /// Templates whose bound grew are updated unless they have been updated as often as the
    /// widening threshold allows, in which case they are dropped. Returns the old state if
    /// nothing changed, and runs value determination if some template was updated.
    fn join(&mut self, new: AbstractedId, old: AbstractedId) -> PolicyResult<AbstractedId> {
        let new_state = self.arena.abstracted(new).clone();
        let old_state = self.arena.abstracted(old).clone();
        precondition!(new_state.location == old_state.location);
        let location = new_state.location.clone();
        let mut abstraction = RedBlackTreeMap::new();
        let mut updated = BTreeSet::new();
        let mut dropped = false;
        for (template, old_bound) in old_state.abstraction.iter() {
            let new_bound = match new_state.bound(template) {
                Some(bound) => bound,
                None => {
                    dropped = true;
                    continue;
                }
            };
            if new_bound.bound <= old_bound.bound {
                abstraction.insert_mut(template.clone(), old_bound.clone());
                continue;
            }
            let counter = self
                .widening_counters
                .entry((location.clone(), template.clone()))
                .or_insert(0);
            if *counter >= self.options.widening_threshold {
                warn!("widening {} to unbounded at {}", template, location);
                dropped = true;
                continue;
            }
            *counter += 1;
            updated.insert(template.clone());
            abstraction.insert_mut(template.clone(), new_bound.clone());
        }
        if updated.is_empty() && !dropped {
            return Ok(old);
        }
        debug!(
            "join at {} updates {} templates",
            location,
            updated.len()
        );
        let joined = self.arena.add_abstracted(PolicyAbstractedState {
            location: location.clone(),
            location_id: new_state.location_id,
            abstraction,
            ssa: new_state.ssa.clone(),
            generator: new_state.generator,
            sibling: Some(old),
            extra_invariant: new_state.extra_invariant.clone(),
        });
        if updated.is_empty() {
            return Ok(joined);
        }
        let abstraction = self.value_determination.determine(
            &self.arena,
            &self.latest,
            joined,
            &updated,
            self.options.value_determination,
        )?;
        let determined = PolicyAbstractedState {
            abstraction,
            ..self.arena.abstracted(joined).clone()
        };
        debug!("value determination result {}", determined);
        Ok(self.arena.add_abstracted(determined))
    }

    /// Merges the state into a reached state. Intermediate states with the same backpointer
    /// become the union of their paths, abstracted states are joined. Otherwise the reached
    /// state is returned unchanged.
    #[logfn_inputs(TRACE)]
    pub fn merge(&mut self, state: PolicyState, reached: PolicyState) -> PolicyResult<PolicyState> {
        if state == reached {
            return Ok(reached);
        }
        match (state, reached) {
            (PolicyState::Intermediate(a), PolicyState::Intermediate(b)) => {
                let first = self.arena.intermediate(a);
                let second = self.arena.intermediate(b);
                if first.location != second.location
                    || first.backpointer != second.backpointer
                    || first.merged_into().is_some()
                    || second.merged_into().is_some()
                {
                    return Ok(reached);
                }
                let path_formula = self.path_formulas.make_or(
                    &first.path_formula.conjoined(first.extra_invariant.clone()),
                    &second.path_formula.conjoined(second.extra_invariant.clone()),
                );
                let merged = PolicyIntermediateState::new(
                    first.location.clone(),
                    path_formula,
                    first.backpointer,
                    Formula::truth(),
                );
                let summarized = self.summarized.contains(&a) || self.summarized.contains(&b);
                let merged = self.arena.add_intermediate(merged);
                self.arena.intermediate(a).set_merged_into(merged);
                self.arena.intermediate(b).set_merged_into(merged);
                if summarized {
                    self.summarized.insert(merged);
                }
                Ok(PolicyState::Intermediate(merged))
            }
            (PolicyState::Abstracted(a), PolicyState::Abstracted(b)) => {
                let location = self.arena.abstracted(a).location.clone();
                if location != self.arena.abstracted(b).location {
                    return Ok(reached);
                }
                if self.is_less_or_equal(reached, state) {
                    return Ok(state);
                }
                let joined = self.join(a, b)?;
                self.latest.insert(location, joined);
                Ok(PolicyState::Abstracted(joined))
            }
            _ => Ok(reached),
        }
    }

    /// Abstracted states are ordered pointwise: every template bounded by the second state
    /// has a bound in the first that is not larger. An intermediate state is covered by the
    /// states it was merged into.
    pub fn is_less_or_equal(&self, state: PolicyState, other: PolicyState) -> bool {
        match (state, other) {
            (PolicyState::Abstracted(a), PolicyState::Abstracted(b)) => {
                let (first, second) = (self.arena.abstracted(a), self.arena.abstracted(b));
                first.location == second.location
                    && second.abstraction.iter().all(|(template, bound)| {
                        first
                            .bound(template)
                            .map_or(false, |b| b.bound <= bound.bound)
                    })
            }
            (PolicyState::Intermediate(a), PolicyState::Intermediate(b)) => {
                self.arena.is_merged_into(a, b)
            }
            _ => false,
        }
    }

    /// The chain of path formulas from the root of the search to the target state.
    pub fn counterexample(&self, target: IntermediateId) -> Counterexample {
        let mut segments = Vec::new();
        let mut exact = true;
        let mut current = target;
        let root = loop {
            let state = self.arena.intermediate(current);
            if self.summarized.contains(&current) {
                exact = false;
            }
            let backpointer = self.arena.abstracted(state.backpointer);
            segments.push(Segment {
                location: backpointer.location.clone(),
                formula: Formula::and(vec![
                    state.path_formula.formula.clone(),
                    state.extra_invariant.clone(),
                ]),
            });
            match backpointer.generator {
                Some(generator) => current = generator,
                None => break backpointer,
            }
        };
        segments.reverse();
        let program_entry = Location::new(self.cfa.main_function().entry);
        Counterexample {
            target: self.arena.intermediate(target).location.clone(),
            root_constraints: root.constraints(),
            segments,
            exact: exact && root.location == program_entry,
            model: self.violation_model.clone(),
        }
    }

    /// Reduces the abstracted state at the entry of a callee to the templates the callee can see.
    pub fn reduce(&self, entry: AbstractedId, callee: &str) -> ReducedState {
        PolicyReducer::new(self.cfa).reduce(self.arena.abstracted(entry), callee)
    }

    /// The intermediate state at the return node of the call site whose path from the
    /// abstracted state at the call node applies the summary of the callee.
    /// The abstracted state at the return node is generated by this state, so it is spliced
    /// onto the call state: templates the callee leaves alone keep policies that depend on
    /// the bounds at the call node, and value determination follows them through the call.
    pub fn apply_summary(
        &mut self,
        call_state: AbstractedId,
        call_site: usize,
        summary: &BlockSummary,
    ) -> PolicyResult<Option<PolicyState>> {
        let caller = self.arena.abstracted(call_state);
        let site = self.cfa.call_sites.get(call_site).ok_or_else(|| {
            PolicyError::InvalidProgram(format!("unknown call site {}", call_site))
        })?;
        let location = caller.location.moved_to(site.return_node);
        let path_formula =
            PolicySummaryManager::new(self.cfa).apply_summary(&caller.ssa, call_site, summary)?;
        if path_formula.formula.is_false() {
            return Ok(None);
        }
        let id = self.arena.add_intermediate(PolicyIntermediateState::new(
            location,
            path_formula,
            call_state,
            Formula::truth(),
        ));
        self.summarized.insert(id);
        Ok(Some(PolicyState::Intermediate(id)))
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::{Cfa, CfaEdge};
use crate::errors::{PolicyError, PolicyResult};
use crate::k_limits;
use crate::location::Location;
use crate::options::{Interprocedural, PolicyOptions};
use crate::policy_iteration::PolicyIterationManager;
use crate::policy_state::{AbstractedId, PolicyState};
use crate::precision::TemplatePrecision;
use crate::refiner::Counterexample;
use crate::smt_solver::{OptimizationSolver, SmtSolver};
use crate::summaries::{BlockSummary, BlockSummaryCache, ReducedState};
use crate::utils::ShutdownNotifier;

use mirai_annotations::*;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Formatter, Result};

/// The outcome of exploring the state space once.
#[derive(Debug)]
pub enum ReachabilityResult {
    /// A fixed point was reached without reaching a target state.
    Safe,
    /// A target state is reachable under the current abstraction.
    Violation(Counterexample),
    /// The reached set grew beyond its limit.
    Exhausted,
}

/// What became of a call handled by a block summary.
enum CallOutcome {
    Returned(Option<PolicyState>),
    Violation(Counterexample),
    Exhausted,
}

/// States waiting to be expanded, in reverse post order of their nodes and then in the order
/// they were added.
#[derive(Default)]
struct Waitlist {
    states: BTreeSet<(usize, usize, PolicyState)>,
    keys: HashMap<PolicyState, (usize, usize)>,
    next: usize,
}

impl Waitlist {
    fn add(&mut self, state: PolicyState, order: usize) {
        if self.keys.contains_key(&state) {
            return;
        }
        let key = (order, self.next);
        self.next += 1;
        self.states.insert((key.0, key.1, state));
        self.keys.insert(state, key);
    }

    fn remove(&mut self, state: PolicyState) {
        if let Some((order, sequence)) = self.keys.remove(&state) {
            self.states.remove(&(order, sequence, state));
        }
    }

    fn pop(&mut self) -> Option<PolicyState> {
        let first = self.states.iter().next().copied()?;
        self.states.remove(&first);
        self.keys.remove(&first.2);
        Some(first.2)
    }
}

/// Explores the states of a policy iteration manager with a worklist algorithm until a fixed
/// point or a reachable target state. Calls are either followed into the callee, or, in the
/// modular modes, replaced by the summary of a separate analysis of the callee.
pub struct ReachabilityAnalysis<'a> {
    cfa: &'a Cfa,
    options: &'a PolicyOptions,
    precision: &'a TemplatePrecision,
    solver: &'a dyn SmtSolver,
    optimizer: &'a dyn OptimizationSolver,
    cache: BlockSummaryCache,
    notifier: ShutdownNotifier,
}

impl<'a> Debug for ReachabilityAnalysis<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "ReachabilityAnalysis".fmt(f)
    }
}

impl<'a> ReachabilityAnalysis<'a> {
    /// Fails for programs with recursive functions.
    pub fn new(
        cfa: &'a Cfa,
        options: &'a PolicyOptions,
        precision: &'a TemplatePrecision,
        solver: &'a dyn SmtSolver,
        optimizer: &'a dyn OptimizationSolver,
        notifier: ShutdownNotifier,
    ) -> PolicyResult<ReachabilityAnalysis<'a>> {
        if let Some(function) = cfa.functions.keys().find(|f| cfa.is_recursive(f)) {
            return Err(PolicyError::Unsupported(format!(
                "recursive function {}",
                function
            )));
        }
        Ok(ReachabilityAnalysis {
            cfa,
            options,
            precision,
            solver,
            optimizer,
            cache: BlockSummaryCache::new(),
            notifier,
        })
    }

    /// A manager that shares the solvers and the precision of the analysis.
    pub fn new_manager(&self) -> PolicyIterationManager<'a> {
        PolicyIterationManager::new(
            self.cfa,
            self.options,
            self.precision,
            self.solver,
            self.optimizer,
            self.notifier.clone(),
        )
    }

    pub fn summary_cache(&self) -> &BlockSummaryCache {
        &self.cache
    }

    /// Runs the analysis of the main function from its entry.
    pub fn run_program(
        &mut self,
        manager: &mut PolicyIterationManager<'a>,
    ) -> PolicyResult<ReachabilityResult> {
        let entry = Location::new(self.cfa.main_function().entry);
        let initial = manager.initial_state(entry);
        self.run(manager, initial)
    }

    /// Explores the states reachable from the initial state.
    pub fn run(
        &mut self,
        manager: &mut PolicyIterationManager<'a>,
        initial: PolicyState,
    ) -> PolicyResult<ReachabilityResult> {
        let cfa = self.cfa;
        let mut waitlist = Waitlist::default();
        let mut reached: HashMap<Location, Vec<PolicyState>> = HashMap::new();
        let mut reached_count = 1;
        let initial_location = manager.arena().location(initial).clone();
        waitlist.add(initial, cfa.reverse_post_order(initial_location.node));
        reached.insert(initial_location, vec![initial]);

        while let Some(state) = waitlist.pop() {
            check_for_shutdown!(self.notifier);
            if reached_count > k_limits::MAX_REACHED_STATES {
                warn!(
                    "giving up after reaching more than {} states",
                    k_limits::MAX_REACHED_STATES
                );
                return Ok(ReachabilityResult::Exhausted);
            }
            let location = manager.arena().location(state).clone();
            trace!("expanding {} at {}", state, location);
            for edge in cfa.outgoing_edges(location.node) {
                let successor = match cfa.edge(edge) {
                    CfaEdge::Summary(..) if self.options.interprocedural == Interprocedural::Inline => {
                        continue
                    }
                    CfaEdge::Call(..) | CfaEdge::Return(..)
                        if self.options.interprocedural != Interprocedural::Inline =>
                    {
                        continue
                    }
                    CfaEdge::Summary(call_site) => {
                        let call_state = match state {
                            PolicyState::Abstracted(id) => id,
                            PolicyState::Intermediate(..) => {
                                return Err(PolicyError::ContractViolation(format!(
                                    "the state at call node {} is not abstracted",
                                    location
                                )))
                            }
                        };
                        match self.analyze_call(manager, call_state, *call_site)? {
                            CallOutcome::Returned(successor) => successor,
                            CallOutcome::Violation(counterexample) => {
                                return Ok(ReachabilityResult::Violation(counterexample))
                            }
                            CallOutcome::Exhausted => return Ok(ReachabilityResult::Exhausted),
                        }
                    }
                    _ => manager.successor(state, edge)?,
                };
                let successor = match successor {
                    Some(successor) => successor,
                    None => continue,
                };
                let target = cfa.edge_target(edge);
                let successor = match cfa.invariant(target) {
                    Some(invariant) => manager.strengthen(successor, invariant),
                    None => successor,
                };
                let successor = match manager.precision_adjustment(successor)? {
                    Some(successor) => successor,
                    None => continue,
                };
                if cfa.is_error(target) {
                    if let PolicyState::Intermediate(id) = successor {
                        info!("reached target {}", cfa.label(target));
                        return Ok(ReachabilityResult::Violation(manager.counterexample(id)));
                    }
                }
                let successor_location = manager.arena().location(successor).clone();
                let order = cfa.reverse_post_order(successor_location.node);
                let states = reached.entry(successor_location).or_default();
                for reached_state in states.iter_mut() {
                    let merged = manager.merge(successor, *reached_state)?;
                    if merged != *reached_state {
                        waitlist.remove(*reached_state);
                        waitlist.add(merged, order);
                        *reached_state = merged;
                    }
                }
                dedup(states);
                if states
                    .iter()
                    .any(|r| manager.is_less_or_equal(successor, *r))
                {
                    continue;
                }
                states.push(successor);
                reached_count += 1;
                waitlist.add(successor, order);
            }
        }
        Ok(ReachabilityResult::Safe)
    }

    /// Handles the summary edge of a call by analysing the callee from the reduced state at
    /// its entry, or from top if every callee is summarized once, and applying the summary.
    fn analyze_call(
        &mut self,
        manager: &mut PolicyIterationManager<'a>,
        call_state: AbstractedId,
        call_site: usize,
    ) -> PolicyResult<CallOutcome> {
        let cfa = self.cfa;
        let site = cfa.call_sites.get(call_site).ok_or_else(|| {
            PolicyError::InvalidProgram(format!("unknown call site {}", call_site))
        })?;
        let callee = cfa.function(&site.callee).ok_or_else(|| {
            PolicyError::InvalidProgram(format!("unknown function {}", site.callee))
        })?;
        let key = match self.options.interprocedural {
            Interprocedural::Summaries => ReducedState::top(callee.name.clone()),
            _ => {
                let call_edge = self
                    .cfa
                    .outgoing_edges(site.call_node)
                    .into_iter()
                    .find(|e| matches!(cfa.edge(*e), CfaEdge::Call(i) if *i == call_site))
                    .ok_or_else(|| {
                        PolicyError::InvalidProgram(format!(
                            "call site {} has no call edge",
                            call_site
                        ))
                    })?;
                let entry = match manager.successor(PolicyState::Abstracted(call_state), call_edge)? {
                    Some(entry) => entry,
                    None => return Ok(CallOutcome::Returned(None)),
                };
                match manager.precision_adjustment(entry)? {
                    Some(PolicyState::Abstracted(entry)) => manager.reduce(entry, &callee.name),
                    Some(PolicyState::Intermediate(..)) => {
                        return Err(PolicyError::ContractViolation(format!(
                            "the entry of {} is not abstracted",
                            callee.name
                        )))
                    }
                    None => return Ok(CallOutcome::Returned(None)),
                }
            }
        };
        let summary = match self.cache.get(&key) {
            Some(summary) => summary,
            None => {
                debug!(
                    "analysing {} from {} entry bounds",
                    callee.name,
                    key.bounds.len()
                );
                let mut block = self.new_manager();
                let root = block.root_state(Location::new(callee.entry), &key.bounds);
                match self.run(&mut block, root)? {
                    ReachabilityResult::Safe => {}
                    ReachabilityResult::Violation(counterexample) => {
                        verify!(!counterexample.exact);
                        return Ok(CallOutcome::Violation(counterexample));
                    }
                    ReachabilityResult::Exhausted => return Ok(CallOutcome::Exhausted),
                }
                let exit = block
                    .latest_state(&Location::new(callee.exit))
                    .map(|id| block.arena().abstracted(id));
                let summary = BlockSummary::new(cfa, callee, exit);
                self.cache.insert(key, summary.clone());
                summary
            }
        };
        Ok(CallOutcome::Returned(manager.apply_summary(
            call_state, call_site, &summary,
        )?))
    }
}

/// Removes duplicates that merging several reached states into the same state leaves behind.
fn dedup(states: &mut Vec<PolicyState>) {
    let mut seen = BTreeSet::new();
    states.retain(|s| seen.insert(*s));
}

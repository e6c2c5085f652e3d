// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::{Cfa, FunctionInfo};
use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Formula, LinearExpr, Variable};
use crate::path_formula::{PathFormula, SsaMap, INITIAL_INDEX};
use crate::policy_state::PolicyAbstractedState;
use crate::template::Template;
use crate::utils::Rational;

use log_derive::logfn_inputs;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The part of the abstracted state at the entry of a callee that the callee can observe.
/// Used as the key of the block summary cache.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ReducedState {
    pub callee: Rc<str>,
    pub bounds: Vec<(Template, Rational)>,
}

impl ReducedState {
    /// The state without bounds, used when every callee is analysed once.
    pub fn top(callee: Rc<str>) -> ReducedState {
        ReducedState {
            callee,
            bounds: vec![],
        }
    }
}

/// The bounds that hold at the exit of a callee for every entry state that satisfies the
/// reduced state the callee was analysed from.
#[derive(Clone, Debug)]
pub struct BlockSummary {
    pub callee: Rc<str>,
    /// None if the exit of the callee is unreachable.
    pub exit_bounds: Option<Vec<(Template, Rational)>>,
}

impl BlockSummary {
    /// Keeps the exit bounds over variables that the caller can observe: globals, the return
    /// variable and the formal parameters.
    pub fn new(cfa: &Cfa, callee: &FunctionInfo, exit: Option<&PolicyAbstractedState>) -> BlockSummary {
        let observable = callee
            .parameters
            .iter()
            .chain(callee.return_variable.iter())
            .map(|v| v.name.clone())
            .collect::<BTreeSet<_>>();
        let exit_bounds = exit.map(|state| {
            state
                .bounds()
                .into_iter()
                .filter(|(template, _)| {
                    template
                        .variables()
                        .all(|v| cfa.is_global(&v.name) || observable.contains(&v.name))
                })
                .collect()
        });
        BlockSummary {
            callee: callee.name.clone(),
            exit_bounds,
        }
    }
}

/// Projects abstracted states onto the scope of a callee and renames the exit bounds of a
/// callee into the scope of a caller.
pub struct PolicyReducer<'a> {
    cfa: &'a Cfa,
}

impl<'a> Debug for PolicyReducer<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "PolicyReducer".fmt(f)
    }
}

impl<'a> PolicyReducer<'a> {
    pub fn new(cfa: &'a Cfa) -> PolicyReducer<'a> {
        PolicyReducer { cfa }
    }

    /// Drops the templates of the entry state that mention variables outside the footprint of
    /// the callee, and the upper bound t <= b of every pair t <= b, -t <= -b, which only
    /// records that the entry happened to fix the value of t.
    #[logfn_inputs(TRACE)]
    pub fn reduce(&self, entry: &PolicyAbstractedState, callee: &str) -> ReducedState {
        let footprint = self.cfa.footprint(callee);
        let in_scope = |template: &Template| {
            template
                .variables()
                .all(|v| footprint.map_or(false, |f| f.contains(&v.name)))
        };
        let bounds = entry
            .bounds()
            .into_iter()
            .filter(|(template, _)| in_scope(template))
            .collect::<Vec<_>>();
        let reduced = bounds
            .iter()
            .filter(|(template, bound)| {
                let fixed = template.is_upper_bound()
                    && bounds
                        .iter()
                        .any(|(other, b)| *other == template.negated() && *b == -bound.clone());
                !fixed
            })
            .cloned()
            .collect::<Vec<_>>();
        debug!(
            "reduced {} bounds at the entry of {} to {}",
            entry.abstraction.size(),
            callee,
            reduced.len()
        );
        ReducedState {
            callee: Rc::from(callee),
            bounds: reduced,
        }
    }

    /// Renames the exit bounds of the summary into the scope of a caller with the given SSA
    /// map. Globals written by the callee get fresh indices, read-only globals keep the
    /// index of the caller, and every other variable is moved into the namespace, where it
    /// has the initial index. Returns the renamed constraints and the SSA map after the call.
    ///
    /// The exit bounds are constants. The block was analysed from a root state whose reduced
    /// entry bounds are closed, so its value determination already solved the policies of the
    /// callee for exactly that entry, and a different entry is a different cache key.
    pub fn expand(
        &self,
        caller_ssa: &SsaMap,
        summary: &BlockSummary,
        namespace: &str,
    ) -> (Rc<Formula>, SsaMap) {
        let mut ssa = caller_ssa.clone();
        for global in self.cfa.written_globals(&summary.callee) {
            ssa = ssa.bumped(&global.name).0;
        }
        let exit_bounds = match &summary.exit_bounds {
            Some(bounds) => bounds,
            None => return (Formula::falsity(), ssa),
        };
        let rename = |v: &Variable| {
            if self.cfa.is_global(&v.name) {
                ssa.instantiate(v)
            } else {
                v.uninstantiated()
                    .with_prefix(namespace)
                    .instantiated(INITIAL_INDEX)
            }
        };
        let constraints = exit_bounds
            .iter()
            .map(|(template, bound)| {
                Formula::le(
                    &template.linear_expression().map_variables(&rename),
                    &LinearExpr::constant(bound.clone()),
                )
            })
            .collect::<Vec<_>>();
        (Formula::and(constraints), ssa)
    }
}

static NEXT_NAMESPACE: AtomicUsize = AtomicUsize::new(0);

/// Applies block summaries at call sites.
pub struct PolicySummaryManager<'a> {
    cfa: &'a Cfa,
    reducer: PolicyReducer<'a>,
}

impl<'a> PolicySummaryManager<'a> {
    pub fn new(cfa: &'a Cfa) -> PolicySummaryManager<'a> {
        PolicySummaryManager {
            cfa,
            reducer: PolicyReducer::new(cfa),
        }
    }

    /// The path formula of a call that takes the caller from the given SSA map to the return
    /// node: the expanded exit bounds of the callee, the binding of the parameters that the
    /// callee does not write to the arguments, and the assignment of the return value to
    /// the result variable.
    pub fn apply_summary(
        &self,
        caller_ssa: &SsaMap,
        call_site: usize,
        summary: &BlockSummary,
    ) -> PolicyResult<PathFormula> {
        let site = self.cfa.call_sites.get(call_site).ok_or_else(|| {
            PolicyError::InvalidProgram(format!("unknown call site {}", call_site))
        })?;
        let callee = self.cfa.function(&site.callee).ok_or_else(|| {
            PolicyError::InvalidProgram(format!("unknown function {}", site.callee))
        })?;
        let namespace = format!(
            "__summary{}::",
            NEXT_NAMESPACE.fetch_add(1, Ordering::SeqCst)
        );
        let (exit, mut ssa) = self.reducer.expand(caller_ssa, summary, &namespace);
        let namespaced = |v: &Variable| {
            LinearExpr::variable(
                v.uninstantiated()
                    .with_prefix(&namespace)
                    .instantiated(INITIAL_INDEX),
            )
        };
        let mut conjuncts = vec![exit];
        let written = self
            .cfa
            .footprint(&callee.name)
            .map(|f| f.written.clone())
            .unwrap_or_default();
        for (parameter, argument) in callee.parameters.iter().zip(site.arguments.iter()) {
            if written.contains(&parameter.name) {
                continue;
            }
            conjuncts.push(Formula::eq(
                &namespaced(parameter),
                &caller_ssa.instantiate_expression(argument),
            ));
        }
        if let (Some(result), Some(return_variable)) = (&site.result, &callee.return_variable) {
            let (next, index) = ssa.bumped(&result.name);
            ssa = next;
            conjuncts.push(Formula::eq(
                &LinearExpr::variable(result.instantiated(index)),
                &namespaced(return_variable),
            ));
        }
        let formula = Formula::and(conjuncts);
        trace!("summary of {} at call site {}: {}", callee.name, call_site, formula);
        Ok(PathFormula {
            formula,
            ssa,
            length: 1,
        })
    }
}

/// Block summaries by the reduced entry state they were computed from.
#[derive(Default)]
pub struct BlockSummaryCache {
    summaries: HashMap<ReducedState, BlockSummary>,
    hits: usize,
}

impl Debug for BlockSummaryCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "BlockSummaryCache".fmt(f)
    }
}

impl BlockSummaryCache {
    pub fn new() -> BlockSummaryCache {
        BlockSummaryCache::default()
    }

    pub fn get(&mut self, key: &ReducedState) -> Option<BlockSummary> {
        let result = self.summaries.get(key).cloned();
        if result.is_some() {
            self.hits += 1;
        }
        result
    }

    pub fn insert(&mut self, key: ReducedState, summary: BlockSummary) {
        self.summaries.insert(key, summary);
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::Cfa;
use crate::errors::PolicyResult;
use crate::formula::{Formula, Model};
use crate::options::PolicyOptions;
use crate::policy_iteration::PolicyIterationManager;
use crate::precision::TemplatePrecision;
use crate::reachability::{ReachabilityAnalysis, ReachabilityResult};
use crate::refiner::{
    Counterexample, PolicyInterpolationRefiner, RefinementResult, UnguidedTemplateRefiner,
};
use crate::smt_solver::{InterpolatingSolver, OptimizationSolver, SmtSolver};
use crate::utils::{self, ShutdownNotifier};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No target location is reachable. The invariants of the report prove it.
    Safe,
    /// A target location is reachable along a feasible path from the program entry.
    Unsafe,
    /// The refinements ran out, or the analysis was interrupted.
    Unknown,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Safe => f.write_str("SAFE"),
            Verdict::Unsafe => f.write_str("UNSAFE"),
            Verdict::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// template <= bound, with the template given by the coefficients of its variables.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct InvariantBound {
    pub coefficients: BTreeMap<String, String>,
    pub bound: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnalysisReport {
    pub verdict: Verdict,
    /// The number of reachability runs.
    pub rounds: usize,
    /// The bounds at the abstraction points of the last run, keyed by location.
    pub invariants: BTreeMap<String, Vec<InvariantBound>>,
    /// Values of the variables along a path to the target, for unsafe programs.
    pub model: Option<BTreeMap<String, String>>,
    /// Why the verdict is unknown.
    pub reason: Option<String>,
    /// The number of templates added by interpolation.
    pub refined_templates: usize,
}

impl AnalysisReport {
    /// The bounds at the location with the given label, as (coefficients, bound) pairs.
    pub fn invariants_at(&self, label: &str) -> &[InvariantBound] {
        self.invariants
            .get(label)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// The CEGAR loop: explores the program with the current precision, and if a target is
/// reachable, either confirms the counterexample or refines the precision and starts over.
pub struct PolicyAnalysis<'a, S> {
    cfa: &'a Cfa,
    options: &'a PolicyOptions,
    solver: &'a S,
    notifier: ShutdownNotifier,
}

impl<'a, S> PolicyAnalysis<'a, S>
where
    S: SmtSolver + OptimizationSolver + InterpolatingSolver,
{
    pub fn new(cfa: &'a Cfa, options: &'a PolicyOptions, solver: &'a S) -> PolicyAnalysis<'a, S> {
        let notifier = match options.timeout {
            Some(seconds) => ShutdownNotifier::with_timeout(Duration::from_secs(seconds)),
            None => ShutdownNotifier::new(),
        };
        PolicyAnalysis {
            cfa,
            options,
            solver,
            notifier,
        }
    }

    /// A notifier that can be used to interrupt the analysis from another thread.
    pub fn notifier(&self) -> ShutdownNotifier {
        self.notifier.clone()
    }

    /// Interruptions end the analysis with an unknown verdict rather than an error.
    pub fn run(&self) -> PolicyResult<AnalysisReport> {
        let mut precision = TemplatePrecision::new(self.options.template_level);
        let mut report = AnalysisReport {
            verdict: Verdict::Unknown,
            rounds: 0,
            invariants: BTreeMap::new(),
            model: None,
            reason: None,
            refined_templates: 0,
        };
        match self.refinement_loop(&mut precision, &mut report) {
            Ok(()) => {}
            Err(e) if e.is_interrupted() => {
                warn!("{}", e);
                report.verdict = Verdict::Unknown;
                report.reason = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }
        report.refined_templates = precision.refinement_size();
        info!("verdict {} after {} rounds", report.verdict, report.rounds);
        Ok(report)
    }

    fn refinement_loop(
        &self,
        precision: &mut TemplatePrecision,
        report: &mut AnalysisReport,
    ) -> PolicyResult<()> {
        let unguided = UnguidedTemplateRefiner::new();
        loop {
            report.rounds += 1;
            info!(
                "round {} with template level {:?}",
                report.rounds,
                precision.level()
            );
            let counterexample = {
                let mut reachability = ReachabilityAnalysis::new(
                    self.cfa,
                    self.options,
                    precision,
                    self.solver,
                    self.solver,
                    self.notifier.clone(),
                )?;
                let mut manager = reachability.new_manager();
                let result = reachability.run_program(&mut manager)?;
                report.invariants = self.invariants(&manager);
                match result {
                    ReachabilityResult::Safe => {
                        report.verdict = Verdict::Safe;
                        return Ok(());
                    }
                    ReachabilityResult::Exhausted => {
                        report.reason = Some("the reached set is too large".to_string());
                        return Ok(());
                    }
                    ReachabilityResult::Violation(counterexample) => counterexample,
                }
            };
            report.invariants.clear();
            if report.rounds > self.options.max_refinements {
                report.reason = Some(format!(
                    "no proof after {} refinements",
                    self.options.max_refinements
                ));
                return Ok(());
            }
            let result = if self.options.use_interpolation {
                PolicyInterpolationRefiner::new(self.cfa, self.solver, self.notifier.clone())
                    .refine(&counterexample, precision)?
            } else {
                self.check_feasibility(&counterexample)?
            };
            match result {
                RefinementResult::Feasible(model) if counterexample.exact => {
                    report.verdict = Verdict::Unsafe;
                    report.model = model
                        .or_else(|| counterexample.model.clone())
                        .map(|m| describe_model(&m));
                    return Ok(());
                }
                RefinementResult::Refined => {}
                _ => {
                    if !unguided.refine(precision) {
                        report.reason = Some(format!(
                            "spurious counterexample to {} at the highest template level",
                            counterexample.target.describe(self.cfa)
                        ));
                        return Ok(());
                    }
                }
            }
        }
    }

    fn check_feasibility(&self, counterexample: &Counterexample) -> PolicyResult<RefinementResult> {
        let mut conjuncts = vec![counterexample.root_constraints.clone()];
        conjuncts.extend(counterexample.segments.iter().map(|s| s.formula.clone()));
        match self.solver.model(&Formula::and(conjuncts))? {
            Some(model) => Ok(RefinementResult::Feasible(Some(model))),
            None => Ok(RefinementResult::NoProgress),
        }
    }

    fn invariants(&self, manager: &PolicyIterationManager<'_>) -> BTreeMap<String, Vec<InvariantBound>> {
        let mut result = BTreeMap::new();
        for state in manager.latest_states() {
            let bounds = state
                .bounds()
                .into_iter()
                .map(|(template, bound)| InvariantBound {
                    coefficients: template.coefficient_strings(),
                    bound: utils::format_rational(&bound),
                })
                .collect::<Vec<_>>();
            result.insert(state.location.describe(self.cfa), bounds);
        }
        result
    }
}

/// The values of the program variables in the model, keyed by their instantiated names.
fn describe_model(model: &Model) -> BTreeMap<String, String> {
    model
        .values()
        .filter(|(v, _)| !v.name.starts_with("__"))
        .map(|(v, value)| (v.to_string(), utils::format_rational(value)))
        .chain(
            model
                .booleans()
                .filter(|(v, _)| !v.name.starts_with("__"))
                .map(|(v, value)| (v.to_string(), value.to_string())),
        )
        .collect()
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::{PolicyError, PolicyResult};
use crate::k_limits;
use crate::utils::{self, Rational};

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use mirai_annotations::*;
use num_traits::Signed;

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command {
    Command::new("lpi")
        .no_binary_name(true)
        .version("v0.1.0")
        .about("Computes linear invariants by policy iteration.")
        .arg(Arg::new("abstraction_locations")
            .long("abstraction_locations")
            .value_parser(["all", "loop_heads", "merges"])
            .default_value("loop_heads")
            .help("Where abstraction is performed.")
            .long_help("With `loop_heads` only loop heads are abstracted, which guarantees that widening eventually stabilizes.\nWith `merges` every node with more than one incoming edge is abstracted.\nWith `all` every node is abstracted."))
        .arg(Arg::new("widening_threshold")
            .long("widening_threshold")
            .value_parser(clap::value_parser!(usize))
            .help("Number of bound updates of a template at a location before it is widened to unbounded."))
        .arg(Arg::new("epsilon")
            .long("epsilon")
            .help("Relaxation used for bound hints and for reading optimal values, e.g. 1/1000."))
        .arg(Arg::new("no_bound_dependencies")
            .long("no_bound_dependencies")
            .action(ArgAction::SetTrue)
            .help("Do not check whether bounds are independent of the start of their segment."))
        .arg(Arg::new("no_decomposition")
            .long("no_decomposition")
            .action(ArgAction::SetTrue)
            .help("Always abstract sum templates with the solver."))
        .arg(Arg::new("no_bound_hints")
            .long("no_bound_hints")
            .action(ArgAction::SetTrue)
            .help("Do not use the bounds of sibling states as lower bounds for objectives."))
        .arg(Arg::new("value_determination")
            .long("value_determination")
            .value_parser(["precise", "shared"])
            .default_value("precise")
            .help("Namespace strategy of value determination.")
            .long_help("With `precise` every visited policy gets a fresh namespace.\nWith `shared` policies are shared by identity and an unsatisfiable system is retried precisely."))
        .arg(Arg::new("templates")
            .long("templates")
            .value_parser(["unary", "octagon", "assumptions"])
            .default_value("octagon")
            .help("Which templates are generated from live variables."))
        .arg(Arg::new("interprocedural")
            .long("interprocedural")
            .value_parser(["inline", "bam", "summaries"])
            .default_value("inline")
            .help("How function calls are analyzed."))
        .arg(Arg::new("no_interpolation")
            .long("no_interpolation")
            .action(ArgAction::SetTrue)
            .help("Refine only by widening the set of generated templates."))
        .arg(Arg::new("max_refinements")
            .long("max_refinements")
            .value_parser(clap::value_parser!(usize))
            .help("Gives up after this many refinement rounds."))
        .arg(Arg::new("timeout")
            .long("timeout")
            .value_parser(clap::value_parser!(u64))
            .help("The maximum number of seconds the analysis may take."))
        .arg(Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print the analysis report as JSON."))
        .arg(Arg::new("inputs")
            .num_args(0..)
            .action(ArgAction::Append)
            .help("Program descriptions to analyze."))
}

/// Where the policy iteration manager abstracts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AbstractionLocations {
    All,
    #[default]
    LoopHeads,
    Merges,
}

/// How value determination names the variables of the policies it visits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ValueDeterminationStrategy {
    /// A fresh namespace per visited policy.
    #[default]
    Precise,
    /// Policies with the same identity share a namespace. An unsatisfiable system is retried
    /// with the precise strategy.
    SharedWithFallback,
}

/// The templates generated from the live variables at a node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum TemplateLevel {
    /// x and -x for every live numeric variable x.
    Unary,
    /// Unary templates plus ±x±y for every pair of live numeric variables.
    #[default]
    Octagon,
    /// Octagon templates plus the linear parts of the conditions of assume edges.
    Assumptions,
}

impl TemplateLevel {
    /// The next level of the unguided refinement schedule.
    pub fn next(self) -> Option<TemplateLevel> {
        match self {
            TemplateLevel::Unary => Some(TemplateLevel::Octagon),
            TemplateLevel::Octagon => Some(TemplateLevel::Assumptions),
            TemplateLevel::Assumptions => None,
        }
    }
}

/// How function calls are handled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Interprocedural {
    /// Callees are analyzed in the context of every call, with the call stack in the location.
    #[default]
    Inline,
    /// Block abstraction memoization: reduce at the call, analyze the block, expand at the return.
    Bam,
    /// Every callee is analyzed once and its summary is applied at each call site.
    Summaries,
}

/// Represents options passed to the analysis.
#[derive(Clone, Debug)]
pub struct PolicyOptions {
    pub abstraction_locations: AbstractionLocations,
    pub widening_threshold: usize,
    pub epsilon: Rational,
    pub check_bound_dependencies: bool,
    pub use_decomposition: bool,
    pub use_bound_hints: bool,
    pub value_determination: ValueDeterminationStrategy,
    pub template_level: TemplateLevel,
    pub interprocedural: Interprocedural,
    pub use_interpolation: bool,
    pub max_refinements: usize,
    pub timeout: Option<u64>,
    pub json_output: bool,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        PolicyOptions {
            abstraction_locations: AbstractionLocations::default(),
            widening_threshold: k_limits::WIDENING_THRESHOLD,
            epsilon: utils::ratio(k_limits::EPSILON.0, k_limits::EPSILON.1),
            check_bound_dependencies: true,
            use_decomposition: true,
            use_bound_hints: true,
            value_determination: ValueDeterminationStrategy::default(),
            template_level: TemplateLevel::default(),
            interprocedural: Interprocedural::default(),
            use_interpolation: true,
            max_refinements: k_limits::MAX_REFINEMENT_ROUNDS,
            timeout: None,
            json_output: false,
        }
    }
}

impl PolicyOptions {
    /// Parse options from an argument string. The argument string will be split using unix
    /// shell escaping rules. Returns the positional arguments.
    pub fn parse_from_str(&mut self, s: &str) -> PolicyResult<Vec<String>> {
        let args = shellwords::split(s).map_err(|e| {
            PolicyError::Options(format!("Cannot parse argument string: {:?}", e))
        })?;
        self.parse(&args)
    }

    /// Parses options from a list of strings. Returns the positional arguments.
    /// Help and version requests are reported as errors carrying the rendered text.
    pub fn parse(&mut self, args: &[String]) -> PolicyResult<Vec<String>> {
        let matches = make_options_parser()
            .try_get_matches_from(args.iter())
            .map_err(|e| match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    PolicyError::Options(e.render().to_string())
                }
                _ => PolicyError::Options(e.to_string()),
            })?;
        self.apply(&matches)?;
        Ok(matches
            .get_many::<String>("inputs")
            .map(|inputs| inputs.cloned().collect())
            .unwrap_or_default())
    }

    fn apply(&mut self, matches: &ArgMatches) -> PolicyResult<()> {
        if let Some(value) = matches.get_one::<String>("abstraction_locations") {
            self.abstraction_locations = match value.as_str() {
                "all" => AbstractionLocations::All,
                "loop_heads" => AbstractionLocations::LoopHeads,
                "merges" => AbstractionLocations::Merges,
                _ => assume_unreachable!(),
            };
        }
        if let Some(threshold) = matches.get_one::<usize>("widening_threshold") {
            if *threshold == 0 {
                return Err(PolicyError::Options(
                    "--widening_threshold expects a positive integer".to_string(),
                ));
            }
            self.widening_threshold = *threshold;
        }
        if let Some(epsilon) = matches.get_one::<String>("epsilon") {
            self.epsilon = match utils::parse_rational(epsilon) {
                Some(e) if e.is_positive() => e,
                _ => {
                    return Err(PolicyError::Options(
                        "--epsilon expects a positive rational such as 1/1000".to_string(),
                    ))
                }
            };
        }
        if matches.get_flag("no_bound_dependencies") {
            self.check_bound_dependencies = false;
        }
        if matches.get_flag("no_decomposition") {
            self.use_decomposition = false;
        }
        if matches.get_flag("no_bound_hints") {
            self.use_bound_hints = false;
        }
        if let Some(value) = matches.get_one::<String>("value_determination") {
            self.value_determination = match value.as_str() {
                "precise" => ValueDeterminationStrategy::Precise,
                "shared" => ValueDeterminationStrategy::SharedWithFallback,
                _ => assume_unreachable!(),
            };
        }
        if let Some(value) = matches.get_one::<String>("templates") {
            self.template_level = match value.as_str() {
                "unary" => TemplateLevel::Unary,
                "octagon" => TemplateLevel::Octagon,
                "assumptions" => TemplateLevel::Assumptions,
                _ => assume_unreachable!(),
            };
        }
        if let Some(value) = matches.get_one::<String>("interprocedural") {
            self.interprocedural = match value.as_str() {
                "inline" => Interprocedural::Inline,
                "bam" => Interprocedural::Bam,
                "summaries" => Interprocedural::Summaries,
                _ => assume_unreachable!(),
            };
        }
        if matches.get_flag("no_interpolation") {
            self.use_interpolation = false;
        }
        if let Some(max) = matches.get_one::<usize>("max_refinements") {
            self.max_refinements = *max;
        }
        if let Some(timeout) = matches.get_one::<u64>("timeout") {
            self.timeout = Some(*timeout);
        }
        if matches.get_flag("json") {
            self.json_output = true;
        }
        Ok(())
    }
}

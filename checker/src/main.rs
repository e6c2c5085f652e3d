// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

extern crate env_logger;

use itertools::Itertools;
use lpi::analysis::{AnalysisReport, PolicyAnalysis};
use lpi::cfa::Cfa;
use lpi::errors::PolicyError;
use lpi::z3_solver::Z3Solver;
use lpi::options::PolicyOptions;
use std::env;
use std::path::Path;
use std::process;

fn main() {
    // Initialize loggers.
    if env::var("LPI_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("LPI_LOG")
            .write_style("LPI_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let command_line_arguments = env::args().skip(1).collect::<Vec<_>>();
    let mut options = PolicyOptions::default();
    let inputs = match options.parse(&command_line_arguments) {
        Ok(inputs) => inputs,
        Err(PolicyError::Options(message)) => {
            eprintln!("{}", message);
            process::exit(2);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };
    if inputs.is_empty() {
        eprintln!("usage: lpi [options] <program.json>...");
        process::exit(2);
    }

    let mut exit_code = 0;
    for input in inputs.iter() {
        match analyze(Path::new(input), &options) {
            Ok(report) => {
                if options.json_output {
                    match serde_json::to_string_pretty(&report) {
                        Ok(json) => println!("{}", json),
                        Err(e) => {
                            eprintln!("{}: {}", input, e);
                            exit_code = 1;
                        }
                    }
                } else {
                    print_report(input, &report);
                }
            }
            Err(e) => {
                eprintln!("{}: {}", input, e);
                exit_code = 1;
            }
        }
    }
    process::exit(exit_code);
}

fn analyze(path: &Path, options: &PolicyOptions) -> Result<AnalysisReport, PolicyError> {
    let cfa = Cfa::load(path)?;
    let solver = Z3Solver::new();
    PolicyAnalysis::new(&cfa, options, &solver).run()
}

fn print_report(input: &str, report: &AnalysisReport) {
    println!("{}: {} ({} rounds)", input, report.verdict, report.rounds);
    if let Some(reason) = &report.reason {
        println!("  {}", reason);
    }
    for (location, bounds) in report.invariants.iter() {
        if bounds.is_empty() {
            continue;
        }
        println!("  {}:", location);
        for bound in bounds.iter() {
            let template = bound
                .coefficients
                .iter()
                .map(|(variable, coefficient)| match coefficient.as_str() {
                    "1" => variable.clone(),
                    "-1" => format!("-{}", variable),
                    _ => format!("{}*{}", coefficient, variable),
                })
                .join(" + ");
            println!("    {} <= {}", template, bound.bound);
        }
    }
    if let Some(model) = &report.model {
        println!("  counterexample:");
        for (variable, value) in model.iter() {
            println!("    {} = {}", variable, value);
        }
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use lpi::analysis::{InvariantBound, PolicyAnalysis, Verdict};
use lpi::cfa::{Cfa, ProgramDescription};
use lpi::options::PolicyOptions;
use lpi::z3_solver::Z3Solver;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// A program along with the options to analyze it with and the expected outcome.
#[derive(Deserialize)]
struct TestCase {
    #[serde(default)]
    options: String,
    expect: Expectation,
    program: ProgramDescription,
}

#[derive(Deserialize)]
struct Expectation {
    verdict: Verdict,
    /// Bounds that must be among the invariants reported at each location.
    #[serde(default)]
    invariants: BTreeMap<String, Vec<InvariantBound>>,
    /// Locations at which the given templates must not be bounded.
    #[serde(default)]
    unbounded: BTreeMap<String, Vec<BTreeMap<String, String>>>,
}

// Run the tests in the tests/run-pass directory.
#[test]
fn run_pass() {
    let mut run_pass_path = PathBuf::from_str("tests/run-pass").unwrap();
    if !run_pass_path.exists() {
        run_pass_path = PathBuf::from_str("checker/tests/run-pass").unwrap();
    }
    assert_eq!(run_directory(run_pass_path), 0);
}

// Iterates through the JSON files in the directory at the given path and runs each as a
// separate test case. Returns the number of failed cases.
fn run_directory(directory_path: PathBuf) -> usize {
    let mut case_count = 0;
    let mut failures = 0;
    for entry in WalkDir::new(directory_path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file()
            || entry.path().extension().and_then(|e| e.to_str()) != Some("json")
        {
            continue;
        }
        case_count += 1;
        failures += run_case(entry.path());
    }
    assert!(case_count > 0, "no test cases found");
    failures
}

// Runs the single test case found in the file and reports any mismatch with its expectation.
fn run_case(path: &Path) -> usize {
    let file_name = path.display().to_string();
    let text = read_to_string(path).unwrap();
    let case: TestCase = match serde_json::from_str(&text) {
        Ok(case) => case,
        Err(e) => {
            println!("{}: cannot parse test case: {}", file_name, e);
            return 1;
        }
    };
    let mut options = PolicyOptions::default();
    options.parse_from_str(&case.options).unwrap();
    let cfa = match Cfa::from_description(&case.program) {
        Ok(cfa) => cfa,
        Err(e) => {
            println!("{}: {}", file_name, e);
            return 1;
        }
    };
    let solver = Z3Solver::new();
    let report = match PolicyAnalysis::new(&cfa, &options, &solver).run() {
        Ok(report) => report,
        Err(e) => {
            println!("{}: analysis failed: {}", file_name, e);
            return 1;
        }
    };
    let mut failures = 0;
    if report.verdict != case.expect.verdict {
        println!(
            "{}: expected {} but got {} ({:?})",
            file_name, case.expect.verdict, report.verdict, report.reason
        );
        failures += 1;
    }
    for (location, expected) in case.expect.invariants.iter() {
        let actual = report.invariants_at(location);
        for bound in expected.iter() {
            if !actual.contains(bound) {
                println!(
                    "{}: missing {:?} <= {} at {}, found {:?}",
                    file_name, bound.coefficients, bound.bound, location, actual
                );
                failures += 1;
            }
        }
    }
    for (location, templates) in case.expect.unbounded.iter() {
        let actual = report.invariants_at(location);
        for template in templates.iter() {
            if actual.iter().any(|b| b.coefficients == *template) {
                println!(
                    "{}: {:?} should be unbounded at {}",
                    file_name, template, location
                );
                failures += 1;
            }
        }
    }
    failures
}

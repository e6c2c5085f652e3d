// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//
// Policy iteration computes linear invariants of programs given as control flow automata.
// Bounds on linear templates are found by maximizing them over the paths between abstraction
// points, joined pointwise, and pushed down to their least fixed point by value determination.
// Templates that are missing are found by a refinement loop driven by sequence interpolants.

#[macro_use]
extern crate log;

/// If shutdown has been requested, or the deadline of the notifier has passed, return
/// Err(PolicyError::Interrupted) from the current function.
macro_rules! check_for_shutdown {
    ($notifier:expr) => {
        if $notifier.should_shutdown() {
            return Err(crate::errors::PolicyError::Interrupted);
        }
    };
}

pub mod analysis;
pub mod cfa;
pub mod errors;
pub mod formula;
pub mod formula_cache;
pub mod interpolation;
pub mod k_limits;
pub mod linearization;
pub mod location;
pub mod options;
pub mod path_formula;
pub mod policy_bound;
pub mod policy_iteration;
pub mod policy_state;
pub mod precision;
pub mod reachability;
pub mod refiner;
pub mod smt_solver;
pub mod summaries;
pub mod template;
pub mod utils;
pub mod value_determination;
pub mod z3_solver;

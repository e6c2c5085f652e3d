// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use thiserror::Error;

/// The ways in which an operation of the policy iteration engine can fail.
/// Infeasible paths are not failures: they are reported as bottom (no successor).
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The solver could not decide a query. The algorithm has no fallback for this.
    #[error("solver returned an undefined result while {0}")]
    SolverUndefined(String),

    /// An internal invariant of the engine does not hold, for example a query that must be
    /// satisfiable by construction came back unsatisfiable.
    #[error("internal invariant violated: {0}")]
    ContractViolation(String),

    /// A cooperative cancellation request was observed.
    #[error("the analysis was interrupted")]
    Interrupted,

    /// The program uses a construct that the engine refuses to approximate.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// The program description could not be turned into a control flow automaton.
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// The command line or an option string was not understood.
    #[error("invalid options: {0}")]
    Options(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PolicyError {
    /// True if the error was caused by a cancellation request rather than a real failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, PolicyError::Interrupted)
    }
}

pub type PolicyResult<T> = Result<T, PolicyError>;

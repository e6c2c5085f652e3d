// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::PolicyResult;
use crate::formula::{Formula, LinearExpr, Model};
use crate::utils::Rational;

use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// The result of using the solver to solve an expression.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SmtResult {
    /// There is an assignment of values to the free variables for which the expression is true.
    Satisfiable,
    /// There is a proof that no assignment of values to the free variables can make the expression true.
    Unsatisfiable,
    /// The solver gave up on the expression.
    Undefined,
}

/// The satisfiability functionality that a solver must expose in order for the engine to use it.
pub trait SmtSolver {
    /// Try to find an assignment of values to the free variables of the formula that makes it true.
    fn solve(&self, formula: &Rc<Formula>) -> SmtResult;

    /// Returns a satisfying assignment if there is one. Undefined results are errors.
    fn model(&self, formula: &Rc<Formula>) -> PolicyResult<Option<Model>>;

    /// Establish if the given formula cannot be satisfied. Undefined results are errors.
    fn is_unsat(&self, formula: &Rc<Formula>) -> PolicyResult<bool>;
}

/// The outcome of checking an optimization session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptimizationStatus {
    /// The constraints are satisfiable and every objective has an optimal value or is unbounded.
    Opt,
    Unsat,
    Undef,
}

/// Identifies an objective of an optimization session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ObjectiveHandle(pub usize);

/// Creates optimization sessions.
pub trait OptimizationSolver {
    fn new_session(&self) -> Box<dyn OptimizationSession + '_>;
}

/// An incremental optimization context. Constraints and objectives added after a push are
/// removed by the matching pop. The session is closed when it is dropped.
pub trait OptimizationSession {
    fn push(&mut self);

    fn pop(&mut self);

    fn add_constraint(&mut self, constraint: Rc<Formula>);

    /// Registers an objective to maximize at the next check.
    fn maximize(&mut self, objective: &LinearExpr) -> ObjectiveHandle;

    fn check(&mut self) -> OptimizationStatus;

    /// The optimal value of the objective found by the last check, within epsilon.
    /// None if the objective is unbounded.
    fn upper(&self, objective: ObjectiveHandle, epsilon: &Rational) -> Option<Rational>;

    /// The model that attains the optimum of the last check.
    fn model(&self) -> Option<Model>;
}

/// Identifies a formula pushed into an interpolating session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct InterpolationHandle(pub usize);

/// Creates interpolating sessions.
pub trait InterpolatingSolver {
    fn new_interpolating_session(&self) -> Box<dyn InterpolatingSession + '_>;
}

/// A sequence of formulas whose conjunction is checked for satisfiability and, if it has
/// none, explained by interpolants.
pub trait InterpolatingSession {
    fn push(&mut self, formula: Rc<Formula>) -> InterpolationHandle;

    fn is_unsat(&mut self) -> PolicyResult<bool>;

    /// The model of the conjunction, after is_unsat returned false.
    fn model(&self) -> Option<Model>;

    /// For the handles h_1..h_n of an unsatisfiable sequence, n-1 formulas I_1..I_{n-1}
    /// with A_1 => I_1, I_k /\ A_{k+1} => I_{k+1}, I_{n-1} /\ A_n unsatisfiable, where every
    /// I_k only mentions variables shared by A_1..A_k and A_{k+1}..A_n.
    fn sequence_interpolants(
        &mut self,
        handles: &[InterpolationHandle],
    ) -> PolicyResult<Vec<Rc<Formula>>>;
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Somewhat arbitrary constants used to limit things in the policy iteration engine that may
// take too long or use too much memory.

/// The number of times the bound of a (location, template) pair may be updated by a join
/// before the template is widened to unbounded at that location.
pub const WIDENING_THRESHOLD: usize = 4;

/// The default epsilon used to relax objective lower bounds and to read upper bounds.
/// Stored as numerator and denominator so that it can be turned into an exact rational.
pub const EPSILON: (i64, i64) = (1, 1_000);

/// Gives up on the CEGAR loop after this many refinements.
pub const MAX_REFINEMENT_ROUNDS: usize = 10;

/// Prevents a single reachability run from growing the reached set without bound.
pub const MAX_REACHED_STATES: usize = 100_000;

/// Projection explores disjunctions branch by branch. Past this many branches an
/// interpolation query is reported as undefined rather than answered.
pub const MAX_DISJUNCT_BRANCHES: usize = 1 << 16;

/// Fourier-Motzkin elimination can square the number of constraints per variable.
/// Projections that grow beyond this size are reported as undefined.
pub const MAX_PROJECTION_CONSTRAINTS: usize = 2_000;

/// Z3 gives up on a single query after this many milliseconds and reports it as undefined.
pub const Z3_TIMEOUT_MILLISECONDS: u32 = 10_000;

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::{PolicyError, PolicyResult};

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use std::fmt::{Debug, Formatter, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// All bounds and coefficients are exact rationals.
pub type Rational = BigRational;

/// Returns the rational with the given integer value.
pub fn rational(value: i64) -> Rational {
    Rational::from_integer(BigInt::from(value))
}

/// Returns numerator / denominator as a rational. The denominator must not be zero.
pub fn ratio(numerator: i64, denominator: i64) -> Rational {
    Rational::new(BigInt::from(numerator), BigInt::from(denominator))
}

/// Parses "3", "-7" or "1/1000" into a rational.
pub fn parse_rational(text: &str) -> Option<Rational> {
    let text = text.trim();
    match text.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator = numerator.trim().parse::<BigInt>().ok()?;
            let denominator = denominator.trim().parse::<BigInt>().ok()?;
            if denominator.is_zero() {
                None
            } else {
                Some(Rational::new(numerator, denominator))
            }
        }
        None => text.parse::<BigInt>().ok().map(Rational::from_integer),
    }
}

/// Formats integral rationals without a denominator.
pub fn format_rational(value: &Rational) -> String {
    if value.is_integer() {
        value.numer().to_string()
    } else {
        format!("{}/{}", value.numer(), value.denom())
    }
}

/// The least common multiple of the denominators of the given rationals.
pub fn denominator_lcm<'a>(values: impl Iterator<Item = &'a Rational>) -> BigInt {
    values.fold(BigInt::one(), |acc, v| acc.lcm(v.denom()))
}

/// The greatest common divisor of the absolute values of the given integers, or zero.
pub fn integer_gcd<'a>(values: impl Iterator<Item = &'a BigInt>) -> BigInt {
    values.fold(BigInt::zero(), |acc, v| acc.gcd(&v.abs()))
}

/// Cooperative cancellation. A notifier is cheap to clone; all clones observe the same request.
/// An optional deadline turns into a cancellation request once it has passed.
#[derive(Clone, Default)]
pub struct ShutdownNotifier {
    requested: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Debug for ShutdownNotifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "ShutdownNotifier".fmt(f)
    }
}

impl ShutdownNotifier {
    pub fn new() -> ShutdownNotifier {
        ShutdownNotifier::default()
    }

    /// A notifier that requests shutdown once the given amount of time has elapsed.
    pub fn with_timeout(timeout: Duration) -> ShutdownNotifier {
        ShutdownNotifier {
            requested: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        if self.requested.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.requested.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Returns Err(PolicyError::Interrupted) if shutdown has been requested.
    pub fn check(&self) -> PolicyResult<()> {
        if self.should_shutdown() {
            Err(PolicyError::Interrupted)
        } else {
            Ok(())
        }
    }
}

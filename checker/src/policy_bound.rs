// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::formula::{Formula, LinearExpr};
use crate::path_formula::{PathFormula, SsaMap};
use crate::policy_state::AbstractedId;
use crate::template::Template;
use crate::utils::{self, Rational};

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result};
use std::rc::Rc;

/// A bound on a template along with the policy that justifies it.
#[derive(Clone, Debug)]
pub struct PolicyBound {
    pub bound: Rational,
    /// The policy: the conjunction of constraints selected by the optimizer, instantiated
    /// from the SSA map of the predecessor to the SSA map of the path formula.
    pub formula: PathFormula,
    /// The abstracted state at the start of the policy.
    pub predecessor: AbstractedId,
    /// The templates of the predecessor that the bound depends on. Empty if the policy
    /// implies the bound on its own.
    pub dependencies: Rc<BTreeSet<Template>>,
}

impl PolicyBound {
    pub fn new(
        bound: Rational,
        formula: PathFormula,
        predecessor: AbstractedId,
        dependencies: BTreeSet<Template>,
    ) -> PolicyBound {
        PolicyBound {
            bound,
            formula,
            predecessor,
            dependencies: Rc::new(dependencies),
        }
    }

    /// A bound that is a fact on its own: template@ssa <= bound.
    pub fn closed(
        template: &Template,
        bound: Rational,
        ssa: &SsaMap,
        predecessor: AbstractedId,
    ) -> PolicyBound {
        let value = template.instantiate(ssa);
        let formula = Formula::le(&value, &LinearExpr::constant(bound.clone()));
        PolicyBound {
            bound,
            formula: PathFormula::empty(ssa.clone()).conjoined(formula),
            predecessor,
            dependencies: Rc::new(BTreeSet::new()),
        }
    }

    /// The same policy with another bound.
    pub fn with_bound(&self, bound: Rational) -> PolicyBound {
        PolicyBound {
            bound,
            formula: self.formula.clone(),
            predecessor: self.predecessor,
            dependencies: self.dependencies.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Identifies the policy for sharing namespaces in value determination. Policies are equal
    /// if they start at the same state and select the same constraints.
    pub fn policy_identity(&self) -> (AbstractedId, Rc<Formula>) {
        (self.predecessor, self.formula.formula.clone())
    }
}

impl Display for PolicyBound {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{} (from {}, {} dependencies)",
            utils::format_rational(&self.bound),
            self.predecessor,
            self.dependencies.len()
        )
    }
}

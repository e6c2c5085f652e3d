// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::formula::{Formula, LinearExpr};
use crate::location::{Location, LocationId};
use crate::path_formula::{PathFormula, SsaMap};
use crate::policy_bound::PolicyBound;
use crate::template::Template;
use crate::utils::Rational;

use itertools::Itertools;
use mirai_annotations::*;
use rpds::RedBlackTreeMap;
use std::cell::Cell;
use std::fmt::{Display, Formatter, Result};
use std::rc::Rc;

/// A handle of an abstracted state in the state arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AbstractedId(usize);

impl Display for AbstractedId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "A{}", self.0)
    }
}

/// A handle of an intermediate state in the state arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct IntermediateId(usize);

impl Display for IntermediateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "I{}", self.0)
    }
}

/// An element of the policy iteration lattice, as a handle into the arena of the manager
/// that created it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum PolicyState {
    Abstracted(AbstractedId),
    Intermediate(IntermediateId),
}

impl PolicyState {
    pub fn is_abstracted(&self) -> bool {
        matches!(self, PolicyState::Abstracted(..))
    }
}

impl Display for PolicyState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            PolicyState::Abstracted(id) => id.fmt(f),
            PolicyState::Intermediate(id) => id.fmt(f),
        }
    }
}

/// A map from templates to bounds at a location. Templates without a bound are unbounded.
#[derive(Clone, Debug)]
pub struct PolicyAbstractedState {
    pub location: Location,
    pub location_id: LocationId,
    pub abstraction: RedBlackTreeMap<Template, PolicyBound>,
    /// The SSA map at which the bounds of the abstraction hold.
    pub ssa: SsaMap,
    /// The intermediate state whose path formula produced this state. None for initial states.
    pub generator: Option<IntermediateId>,
    /// The previous state at the same location, whose bounds this one is joined with.
    pub sibling: Option<AbstractedId>,
    /// An externally supplied invariant, instantiated at ssa.
    pub extra_invariant: Rc<Formula>,
}

impl PolicyAbstractedState {
    pub fn bound(&self, template: &Template) -> Option<&PolicyBound> {
        self.abstraction.get(template)
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.abstraction.keys()
    }

    /// The bounds of the abstraction as constraints over the variables instantiated at ssa.
    pub fn constraints(&self) -> Rc<Formula> {
        let mut conjuncts = self
            .abstraction
            .iter()
            .map(|(template, bound)| {
                Formula::le(
                    &template.instantiate(&self.ssa),
                    &LinearExpr::constant(bound.bound.clone()),
                )
            })
            .collect::<Vec<_>>();
        conjuncts.push(self.extra_invariant.clone());
        Formula::and(conjuncts)
    }

    /// The bounds, for reporting.
    pub fn bounds(&self) -> Vec<(Template, Rational)> {
        self.abstraction
            .iter()
            .map(|(t, b)| (t.clone(), b.bound.clone()))
            .collect()
    }
}

impl Display for PolicyAbstractedState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{}: {{{}}}",
            self.location,
            self.abstraction
                .iter()
                .map(|(t, b)| format!("{} <= {}", t, b))
                .join(", ")
        )
    }
}

/// A symbolic path from the abstracted state it points back to.
#[derive(Clone, Debug)]
pub struct PolicyIntermediateState {
    pub location: Location,
    pub path_formula: PathFormula,
    pub backpointer: AbstractedId,
    /// An externally supplied invariant, instantiated at the SSA map of the path formula.
    pub extra_invariant: Rc<Formula>,
    merged_into: Cell<Option<IntermediateId>>,
}

impl PolicyIntermediateState {
    pub fn new(
        location: Location,
        path_formula: PathFormula,
        backpointer: AbstractedId,
        extra_invariant: Rc<Formula>,
    ) -> PolicyIntermediateState {
        PolicyIntermediateState {
            location,
            path_formula,
            backpointer,
            extra_invariant,
            merged_into: Cell::new(None),
        }
    }

    pub fn merged_into(&self) -> Option<IntermediateId> {
        self.merged_into.get()
    }

    /// Records that the state has been joined into another one. Happens at most once.
    pub fn set_merged_into(&self, other: IntermediateId) {
        checked_precondition!(self.merged_into.get().is_none());
        self.merged_into.set(Some(other));
    }
}

/// Owns all states created by one manager. Handles are indices that stay valid for the
/// lifetime of the arena, so backpointer chains are cheap to follow and cannot be cyclic:
/// a state can only refer to states that were allocated before it.
#[derive(Debug, Default)]
pub struct StateArena {
    abstracted: Vec<PolicyAbstractedState>,
    intermediate: Vec<PolicyIntermediateState>,
}

impl StateArena {
    pub fn new() -> StateArena {
        StateArena::default()
    }

    /// The id the next abstracted state will get.
    pub fn next_abstracted_id(&self) -> AbstractedId {
        AbstractedId(self.abstracted.len())
    }

    pub fn add_abstracted(&mut self, state: PolicyAbstractedState) -> AbstractedId {
        precondition!(state.sibling.map_or(true, |s| s.0 < self.abstracted.len()));
        self.abstracted.push(state);
        AbstractedId(self.abstracted.len() - 1)
    }

    pub fn add_intermediate(&mut self, state: PolicyIntermediateState) -> IntermediateId {
        precondition!(state.backpointer.0 < self.abstracted.len());
        self.intermediate.push(state);
        IntermediateId(self.intermediate.len() - 1)
    }

    pub fn abstracted(&self, id: AbstractedId) -> &PolicyAbstractedState {
        &self.abstracted[id.0]
    }

    pub fn intermediate(&self, id: IntermediateId) -> &PolicyIntermediateState {
        &self.intermediate[id.0]
    }

    pub fn location(&self, state: PolicyState) -> &Location {
        match state {
            PolicyState::Abstracted(id) => &self.abstracted(id).location,
            PolicyState::Intermediate(id) => &self.intermediate(id).location,
        }
    }

    /// True if the intermediate state is other or was merged, possibly transitively, into other.
    pub fn is_merged_into(&self, state: IntermediateId, other: IntermediateId) -> bool {
        let mut current = state;
        loop {
            if current == other {
                return true;
            }
            match self.intermediate(current).merged_into() {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    pub fn abstracted_count(&self) -> usize {
        self.abstracted.len()
    }

    pub fn intermediate_count(&self) -> usize {
        self.intermediate.len()
    }
}

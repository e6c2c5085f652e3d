// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::{Cfa, CfaEdge};
use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Formula, FormulaTrait, LinearExpr, Variable};

use itertools::Itertools;
use rpds::HashTrieMap;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter, Result};
use std::rc::Rc;

/// The SSA index of a variable that has not been assigned on the path.
pub const INITIAL_INDEX: u32 = 1;

/// A persistent map from variable names to their current SSA index.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct SsaMap {
    indices: HashTrieMap<Rc<str>, u32>,
}

impl Debug for SsaMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_map()
            .entries(self.indices.iter().sorted_by(|a, b| a.0.cmp(b.0)))
            .finish()
    }
}

impl SsaMap {
    pub fn new() -> SsaMap {
        SsaMap::default()
    }

    pub fn index(&self, name: &str) -> u32 {
        self.indices.get(name).copied().unwrap_or(INITIAL_INDEX)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn with_index(&self, name: Rc<str>, index: u32) -> SsaMap {
        SsaMap {
            indices: self.indices.insert(name, index),
        }
    }

    /// Returns the map with a fresh index for the variable, along with that index.
    pub fn bumped(&self, name: &Rc<str>) -> (SsaMap, u32) {
        let index = self.index(name) + 1;
        (self.with_index(name.clone(), index), index)
    }

    pub fn names(&self) -> impl Iterator<Item = &Rc<str>> {
        self.indices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &u32)> {
        self.indices.iter()
    }

    /// The pointwise maximum of two maps.
    pub fn merge(&self, other: &SsaMap) -> SsaMap {
        let mut result = self.indices.clone();
        for (name, index) in other.indices.iter() {
            if *index > self.index(name) {
                result.insert_mut(name.clone(), *index);
            }
        }
        SsaMap { indices: result }
    }

    pub fn instantiate(&self, variable: &Variable) -> Variable {
        variable.instantiated(self.index(&variable.name))
    }

    pub fn instantiate_expression(&self, expression: &LinearExpr) -> LinearExpr {
        expression.map_variables(&|v| self.instantiate(v))
    }

    /// Instantiates every variable of an uninstantiated formula with its current index.
    pub fn instantiate_formula(&self, formula: &Rc<Formula>) -> Rc<Formula> {
        formula.rename_free_variables(&|v| self.instantiate(v))
    }
}

/// A formula describing a set of paths, along with the SSA map at the end of those paths.
#[derive(Clone, Debug)]
pub struct PathFormula {
    pub formula: Rc<Formula>,
    pub ssa: SsaMap,
    /// The number of edges of the longest path.
    pub length: usize,
}

impl PathFormula {
    /// The empty path with the given SSA map.
    pub fn empty(ssa: SsaMap) -> PathFormula {
        PathFormula {
            formula: Formula::truth(),
            ssa,
            length: 0,
        }
    }

    /// The path formula with an additional constraint, which must already be instantiated.
    pub fn conjoined(&self, constraint: Rc<Formula>) -> PathFormula {
        PathFormula {
            formula: Formula::and(vec![self.formula.clone(), constraint]),
            ssa: self.ssa.clone(),
            length: self.length,
        }
    }
}

/// Builds path formulas by conjoining the semantics of edges.
pub struct PathFormulaManager<'a> {
    cfa: &'a Cfa,
}

impl<'a> PathFormulaManager<'a> {
    pub fn new(cfa: &'a Cfa) -> PathFormulaManager<'a> {
        PathFormulaManager { cfa }
    }

    pub fn empty(&self) -> PathFormula {
        PathFormula::empty(SsaMap::new())
    }

    /// The path formula extended with the edge.
    pub fn make_and(&self, path_formula: &PathFormula, edge: &CfaEdge) -> PolicyResult<PathFormula> {
        let ssa = &path_formula.ssa;
        let (constraint, ssa) = match edge {
            CfaEdge::Blank => (Formula::truth(), ssa.clone()),
            CfaEdge::Assume(condition) => (ssa.instantiate_formula(condition), ssa.clone()),
            CfaEdge::Assign { target, value } => {
                let value = ssa.instantiate_expression(value);
                let (ssa, index) = ssa.bumped(&target.name);
                let target = LinearExpr::variable(target.instantiated(index));
                (Formula::eq(&target, &value), ssa)
            }
            CfaEdge::Havoc(target) => (Formula::truth(), ssa.bumped(&target.name).0),
            CfaEdge::Call(index) => self.call(ssa, *index)?,
            CfaEdge::Return(index) => self.return_from(ssa, *index)?,
            CfaEdge::Summary(index) => self.havoc_call(ssa, *index)?,
        };
        Ok(PathFormula {
            formula: Formula::and(vec![path_formula.formula.clone(), constraint]),
            ssa,
            length: path_formula.length + 1,
        })
    }

    /// The union of two sets of paths. Variables with a lower index on one side are equated
    /// with the higher index on that side so that both sides end in the same SSA map.
    pub fn make_or(&self, first: &PathFormula, second: &PathFormula) -> PathFormula {
        let ssa = first.ssa.merge(&second.ssa);
        let first_formula = self.unify(first, &ssa);
        let second_formula = self.unify(second, &ssa);
        PathFormula {
            formula: Formula::or(vec![first_formula, second_formula]),
            ssa,
            length: first.length.max(second.length),
        }
    }

    fn unify(&self, path_formula: &PathFormula, target: &SsaMap) -> Rc<Formula> {
        let mut conjuncts = vec![path_formula.formula.clone()];
        for (name, index) in target.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            let own = path_formula.ssa.index(name);
            if own < *index {
                if let Some(variable) = self.cfa.variable(name) {
                    let high = LinearExpr::variable(variable.instantiated(*index));
                    let low = LinearExpr::variable(variable.instantiated(own));
                    conjuncts.push(Formula::eq(&high, &low));
                }
            }
        }
        Formula::and(conjuncts)
    }

    /// Binds the formal parameters of the callee to the arguments and gives the locals of the
    /// callee fresh indices.
    fn call(&self, ssa: &SsaMap, index: usize) -> PolicyResult<(Rc<Formula>, SsaMap)> {
        let call_site = self.call_site(index)?;
        let callee = self.cfa.function(&call_site.callee).ok_or_else(|| {
            PolicyError::InvalidProgram(format!("unknown function {}", call_site.callee))
        })?;
        let arguments = call_site
            .arguments
            .iter()
            .map(|a| ssa.instantiate_expression(a))
            .collect::<Vec<_>>();
        let mut result = ssa.clone();
        let mut conjuncts = Vec::with_capacity(arguments.len());
        for (parameter, argument) in callee.parameters.iter().zip(arguments) {
            let (next, index) = result.bumped(&parameter.name);
            result = next;
            let parameter = LinearExpr::variable(parameter.instantiated(index));
            conjuncts.push(Formula::eq(&parameter, &argument));
        }
        for local in callee.locals.iter().chain(callee.return_variable.iter()) {
            result = result.bumped(&local.name).0;
        }
        Ok((Formula::and(conjuncts), result))
    }

    fn return_from(&self, ssa: &SsaMap, index: usize) -> PolicyResult<(Rc<Formula>, SsaMap)> {
        let call_site = self.call_site(index)?;
        let return_variable = self
            .cfa
            .function(&call_site.callee)
            .and_then(|f| f.return_variable.as_ref());
        match (&call_site.result, return_variable) {
            (Some(result), Some(return_variable)) => {
                let value = LinearExpr::variable(ssa.instantiate(return_variable));
                let (ssa, index) = ssa.bumped(&result.name);
                let result = LinearExpr::variable(result.instantiated(index));
                Ok((Formula::eq(&result, &value), ssa))
            }
            _ => Ok((Formula::truth(), ssa.clone())),
        }
    }

    /// Over-approximates a call by giving the result and the globals written by the callee
    /// unknown values.
    fn havoc_call(&self, ssa: &SsaMap, index: usize) -> PolicyResult<(Rc<Formula>, SsaMap)> {
        let call_site = self.call_site(index)?;
        let mut result = ssa.clone();
        let written = self
            .cfa
            .written_globals(&call_site.callee)
            .into_iter()
            .chain(call_site.result.clone())
            .map(|v| v.name)
            .collect::<BTreeSet<_>>();
        for name in written.iter() {
            result = result.bumped(name).0;
        }
        Ok((Formula::truth(), result))
    }

    fn call_site(&self, index: usize) -> PolicyResult<&'a crate::cfa::CallSite> {
        self.cfa.call_sites.get(index).ok_or_else(|| {
            PolicyError::InvalidProgram(format!("unknown call site {}", index))
        })
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::formula::{Formula, FormulaTrait, Variable};

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

/// Memoizes the variables of formulas by formula identity. Formulas are immutable, so entries
/// are never invalidated. The cache keeps every formula it has seen alive, which keeps the
/// identities stable. It lives as long as the manager that owns it, i.e. one analysis run.
#[derive(Debug, Default)]
pub struct FormulaCache {
    variables: RefCell<HashMap<usize, (Rc<Formula>, Rc<BTreeSet<Variable>>)>>,
}

impl FormulaCache {
    pub fn new() -> FormulaCache {
        FormulaCache::default()
    }

    /// The (instantiated) variables of the formula.
    pub fn variables(&self, formula: &Rc<Formula>) -> Rc<BTreeSet<Variable>> {
        let key = Rc::as_ptr(formula) as usize;
        if let Some((_, variables)) = self.variables.borrow().get(&key) {
            return variables.clone();
        }
        let variables = Rc::new(formula.variables());
        self.variables
            .borrow_mut()
            .insert(key, (formula.clone(), variables.clone()));
        variables
    }

    /// The uninstantiated names of the variables of the formula.
    pub fn function_names(&self, formula: &Rc<Formula>) -> BTreeSet<Rc<str>> {
        self.variables(formula)
            .iter()
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.variables.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The conjuncts of the pool that are syntactically relevant to the seed variables:
    /// the least set closed under sharing an instantiated variable with the seed or with a
    /// conjunct already in the set. The order of the pool is preserved.
    pub fn relevant_conjuncts(
        &self,
        pool: &[Rc<Formula>],
        seed: &BTreeSet<Variable>,
    ) -> Vec<Rc<Formula>> {
        let mut relevant_variables = seed.clone();
        let mut included = vec![false; pool.len()];
        loop {
            let mut changed = false;
            for (i, conjunct) in pool.iter().enumerate() {
                if included[i] {
                    continue;
                }
                let variables = self.variables(conjunct);
                if variables.iter().any(|v| relevant_variables.contains(v)) {
                    included[i] = true;
                    relevant_variables.extend(variables.iter().cloned());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        pool.iter()
            .zip(included)
            .filter_map(|(c, i)| if i { Some(c.clone()) } else { None })
            .collect()
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::Cfa;
use crate::formula::{LinearExpr, Variable};
use crate::options::TemplateLevel;
use crate::path_formula::SsaMap;
use crate::utils::{self, Rational};

use itertools::Itertools;
use num_traits::{One, Signed, Zero};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result};

/// The shape of a template.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TemplateKind {
    /// x
    Upper,
    /// -x
    Lower,
    /// x + y
    Sum,
    /// -x - y
    NegatedSum,
    /// x - y
    Difference,
    /// Anything else.
    Complex,
}

/// A linear combination of program variables along which a bound is tracked.
/// The expression has no constant and primitive integral coefficients, so that
/// scaled versions of the same direction are the same template.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Template {
    expression: LinearExpr,
    kind: TemplateKind,
}

impl Template {
    /// Returns None for expressions without variables.
    pub fn new(expression: &LinearExpr) -> Option<Template> {
        let expression = expression.linear_part();
        if expression.is_constant() {
            return None;
        }
        let scale = Rational::from_integer(utils::denominator_lcm(
            expression.coefficients().map(|(_, c)| c),
        ));
        let expression = expression.scaled(&scale);
        let gcd = Rational::from_integer(utils::integer_gcd(
            expression.coefficients().map(|(_, c)| c.numer()),
        ));
        let expression = expression.scaled(&gcd.recip());
        let kind = Template::kind_of(&expression);
        Some(Template { expression, kind })
    }

    pub fn variable(variable: &Variable) -> Template {
        let expression = LinearExpr::variable(variable.uninstantiated());
        Template {
            expression,
            kind: TemplateKind::Upper,
        }
    }

    fn kind_of(expression: &LinearExpr) -> TemplateKind {
        let coefficients = expression
            .coefficients()
            .map(|(_, c)| c.clone())
            .collect::<Vec<_>>();
        let one = Rational::one();
        let minus_one = -Rational::one();
        match coefficients.as_slice() {
            [c] if *c == one => TemplateKind::Upper,
            [c] if *c == minus_one => TemplateKind::Lower,
            [a, b] if *a == one && *b == one => TemplateKind::Sum,
            [a, b] if *a == minus_one && *b == minus_one => TemplateKind::NegatedSum,
            [a, b] if *a == -b.clone() && a.abs().is_one() => TemplateKind::Difference,
            _ => TemplateKind::Complex,
        }
    }

    pub fn linear_expression(&self) -> &LinearExpr {
        &self.expression
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.expression.variables()
    }

    pub fn variable_count(&self) -> usize {
        self.expression.variable_count()
    }

    pub fn mentions(&self, name: &str) -> bool {
        self.expression.variables().any(|v| &*v.name == name)
    }

    /// True if every variable of the template has an unsigned type.
    pub fn is_unsigned(&self) -> bool {
        self.expression.variables().all(|v| v.sort.is_unsigned())
    }

    /// True if the template has the form x for a single variable.
    pub fn is_upper_bound(&self) -> bool {
        self.kind == TemplateKind::Upper
    }

    /// The template for the opposite direction.
    pub fn negated(&self) -> Template {
        let expression = self.expression.negated();
        let kind = Template::kind_of(&expression);
        Template { expression, kind }
    }

    /// The value of the template at the end of a path with the given SSA map.
    pub fn instantiate(&self, ssa: &SsaMap) -> LinearExpr {
        ssa.instantiate_expression(&self.expression)
    }

    /// The largest value the template can have given the declared types of its variables,
    /// if all of them are bounded machine integers.
    pub fn maximal_value(&self) -> Option<Rational> {
        let mut result = Rational::zero();
        for (variable, coefficient) in self.expression.coefficients() {
            let (low, high) = variable.sort.range()?;
            result += if coefficient.is_positive() {
                coefficient * high
            } else {
                coefficient * low
            };
        }
        Some(result)
    }

    /// False if the bound can only be attained by overflowing the declared types.
    pub fn fits_bound(&self, bound: &Rational) -> bool {
        match self.maximal_value() {
            Some(maximum) => *bound <= maximum,
            None => true,
        }
    }

    /// A sum of at least two variables as the single variable templates it is made of,
    /// each paired with its positive multiplier.
    pub fn decompose(&self) -> Option<Vec<(Template, Rational)>> {
        if self.variable_count() < 2 {
            return None;
        }
        Some(
            self.expression
                .coefficients()
                .map(|(variable, coefficient)| {
                    let unit = Template::variable(variable);
                    let unit = if coefficient.is_negative() {
                        unit.negated()
                    } else {
                        unit
                    };
                    (unit, coefficient.abs())
                })
                .collect(),
        )
    }

    /// The coefficients of the template keyed by variable name, for reports.
    pub fn coefficient_strings(&self) -> BTreeMap<String, String> {
        self.expression
            .coefficients()
            .map(|(v, c)| (v.name.to_string(), utils::format_rational(c)))
            .collect()
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.expression)
    }
}

/// The templates generated for a node from its live variables.
pub fn generate_templates(cfa: &Cfa, node: NodeIndex, level: TemplateLevel) -> BTreeSet<Template> {
    let live = cfa
        .live_variables(node)
        .iter()
        .filter(|v| v.sort.is_numeric())
        .collect::<Vec<_>>();
    let mut result = BTreeSet::new();
    for variable in live.iter() {
        let template = Template::variable(variable);
        result.insert(template.negated());
        result.insert(template);
    }
    if level >= TemplateLevel::Octagon {
        for (x, y) in live.iter().tuple_combinations() {
            let x = LinearExpr::variable((*x).clone());
            let y = LinearExpr::variable((*y).clone());
            for expression in [x.plus(&y), x.minus(&y), y.minus(&x), x.plus(&y).negated()] {
                result.extend(Template::new(&expression));
            }
        }
    }
    if level >= TemplateLevel::Assumptions {
        for expression in cfa.assumption_expressions(node) {
            if let Some(template) = Template::new(&expression) {
                result.insert(template.negated());
                result.insert(template);
            }
        }
    }
    result
}

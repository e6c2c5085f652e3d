// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::utils::{self, Rational};

use itertools::Itertools;
use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::{Display, Formatter, Result};
use std::rc::Rc;

/// The sort of a variable. Integers may be mathematical (no width) or bounded machine integers,
/// in which case the width is only used to detect bounds that overflow the declared type.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Sort {
    Boolean,
    Rational,
    Integer { width: Option<u16>, signed: bool },
}

impl Sort {
    /// A mathematical integer.
    pub const INTEGER: Sort = Sort::Integer {
        width: None,
        signed: true,
    };

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Sort::Boolean)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Sort::Integer { .. })
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Sort::Integer { signed: false, .. })
    }

    /// The smallest and largest values of a bounded integer sort.
    pub fn range(&self) -> Option<(Rational, Rational)> {
        match self {
            Sort::Integer {
                width: Some(width),
                signed,
            } => {
                let width = usize::from(*width);
                if *signed {
                    let half = BigInt::one() << (width - 1);
                    Some((
                        Rational::from_integer(-half.clone()),
                        Rational::from_integer(half - 1),
                    ))
                } else {
                    let full = BigInt::one() << width;
                    Some((Rational::zero(), Rational::from_integer(full - 1)))
                }
            }
            _ => None,
        }
    }

    /// Parses the type names used by program descriptions.
    pub fn from_type_name(name: &str) -> Option<Sort> {
        let bounded = |width: u16, signed: bool| Sort::Integer {
            width: Some(width),
            signed,
        };
        match name {
            "bool" => Some(Sort::Boolean),
            "rational" | "real" => Some(Sort::Rational),
            "int" => Some(Sort::INTEGER),
            "i8" => Some(bounded(8, true)),
            "i16" => Some(bounded(16, true)),
            "i32" => Some(bounded(32, true)),
            "i64" => Some(bounded(64, true)),
            "u8" => Some(bounded(8, false)),
            "u16" => Some(bounded(16, false)),
            "u32" => Some(bounded(32, false)),
            "u64" => Some(bounded(64, false)),
            _ => None,
        }
    }
}

/// A program variable, optionally instantiated with an SSA index.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Variable {
    pub name: Rc<str>,
    pub ssa_index: Option<u32>,
    pub sort: Sort,
}

impl Variable {
    pub fn new(name: &str, sort: Sort) -> Variable {
        Variable {
            name: Rc::from(name),
            ssa_index: None,
            sort,
        }
    }

    pub fn instantiated(&self, index: u32) -> Variable {
        Variable {
            name: self.name.clone(),
            ssa_index: Some(index),
            sort: self.sort,
        }
    }

    pub fn uninstantiated(&self) -> Variable {
        Variable {
            name: self.name.clone(),
            ssa_index: None,
            sort: self.sort,
        }
    }

    /// The same variable moved into the namespace given by prefix.
    pub fn with_prefix(&self, prefix: &str) -> Variable {
        Variable {
            name: Rc::from(format!("{}{}", prefix, self.name).as_str()),
            ssa_index: self.ssa_index,
            sort: self.sort,
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.ssa_index {
            Some(index) => write!(f, "{}@{}", self.name, index),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Σ coefficient * variable + constant, with exact rational coefficients.
/// Variables with a zero coefficient are never stored.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LinearExpr {
    coefficients: BTreeMap<Variable, Rational>,
    constant: Rational,
}

impl LinearExpr {
    pub fn zero() -> LinearExpr {
        LinearExpr::default()
    }

    pub fn constant(value: Rational) -> LinearExpr {
        LinearExpr {
            coefficients: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn variable(variable: Variable) -> LinearExpr {
        LinearExpr::term(variable, Rational::one())
    }

    pub fn term(variable: Variable, coefficient: Rational) -> LinearExpr {
        let mut result = LinearExpr::zero();
        result.add_term(variable, coefficient);
        result
    }

    fn add_term(&mut self, variable: Variable, coefficient: Rational) {
        if coefficient.is_zero() {
            return;
        }
        let remove = {
            let entry = self
                .coefficients
                .entry(variable.clone())
                .or_insert_with(Rational::zero);
            *entry += coefficient;
            entry.is_zero()
        };
        if remove {
            self.coefficients.remove(&variable);
        }
    }

    pub fn coefficient(&self, variable: &Variable) -> Rational {
        self.coefficients
            .get(variable)
            .cloned()
            .unwrap_or_else(Rational::zero)
    }

    pub fn coefficients(&self) -> impl Iterator<Item = (&Variable, &Rational)> {
        self.coefficients.iter()
    }

    pub fn constant_part(&self) -> &Rational {
        &self.constant
    }

    /// The expression without its constant.
    pub fn linear_part(&self) -> LinearExpr {
        LinearExpr {
            coefficients: self.coefficients.clone(),
            constant: Rational::zero(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.coefficients.keys()
    }

    pub fn variable_count(&self) -> usize {
        self.coefficients.len()
    }

    /// True if every variable of the expression has an integer sort.
    pub fn is_integral(&self) -> bool {
        self.coefficients.keys().all(|v| v.sort.is_integral())
    }

    pub fn plus(&self, other: &LinearExpr) -> LinearExpr {
        let mut result = self.clone();
        for (variable, coefficient) in other.coefficients.iter() {
            result.add_term(variable.clone(), coefficient.clone());
        }
        result.constant += &other.constant;
        result
    }

    pub fn minus(&self, other: &LinearExpr) -> LinearExpr {
        self.plus(&other.negated())
    }

    pub fn plus_constant(&self, value: &Rational) -> LinearExpr {
        let mut result = self.clone();
        result.constant += value;
        result
    }

    pub fn scaled(&self, factor: &Rational) -> LinearExpr {
        if factor.is_zero() {
            return LinearExpr::zero();
        }
        LinearExpr {
            coefficients: self
                .coefficients
                .iter()
                .map(|(v, c)| (v.clone(), c * factor))
                .collect(),
            constant: &self.constant * factor,
        }
    }

    pub fn negated(&self) -> LinearExpr {
        self.scaled(&-Rational::one())
    }

    /// Renames every variable. Coefficients of variables that end up with the same name are added.
    pub fn map_variables(&self, f: &dyn Fn(&Variable) -> Variable) -> LinearExpr {
        let mut result = LinearExpr::constant(self.constant.clone());
        for (variable, coefficient) in self.coefficients.iter() {
            result.add_term(f(variable), coefficient.clone());
        }
        result
    }

    /// Replaces variables by expressions.
    pub fn substitute(&self, values: &HashMap<Variable, LinearExpr>) -> LinearExpr {
        let mut result = LinearExpr::constant(self.constant.clone());
        for (variable, coefficient) in self.coefficients.iter() {
            match values.get(variable) {
                Some(value) => result = result.plus(&value.scaled(coefficient)),
                None => result.add_term(variable.clone(), coefficient.clone()),
            }
        }
        result
    }

    /// The value of the expression under the model, if the model assigns all of its variables.
    pub fn evaluate(&self, model: &Model) -> Option<Rational> {
        let mut result = self.constant.clone();
        for (variable, coefficient) in self.coefficients.iter() {
            result += coefficient * model.value(variable)?;
        }
        Some(result)
    }
}

impl Display for LinearExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let mut first = true;
        for (variable, coefficient) in self.coefficients.iter() {
            let magnitude = coefficient.abs();
            if first {
                if coefficient.is_negative() {
                    f.write_str("-")?;
                }
            } else if coefficient.is_negative() {
                f.write_str(" - ")?;
            } else {
                f.write_str(" + ")?;
            }
            if magnitude.is_one() {
                write!(f, "{}", variable)?;
            } else {
                write!(f, "{}*{}", utils::format_rational(&magnitude), variable)?;
            }
            first = false;
        }
        if first {
            f.write_str(&utils::format_rational(&self.constant))?;
        } else if self.constant.is_positive() {
            write!(f, " + {}", utils::format_rational(&self.constant))?;
        } else if self.constant.is_negative() {
            write!(f, " - {}", utils::format_rational(&-self.constant.clone()))?;
        }
        Ok(())
    }
}

/// The comparison of an atom's expression against zero.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Relation {
    LessOrEqual,
    LessThan,
    Equal,
}

/// expr <= 0, expr < 0 or expr = 0.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Atom {
    pub expr: LinearExpr,
    pub relation: Relation,
}

impl Atom {
    pub fn holds_for(&self, value: &Rational) -> bool {
        match self.relation {
            Relation::LessOrEqual => !value.is_positive(),
            Relation::LessThan => value.is_negative(),
            Relation::Equal => value.is_zero(),
        }
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let operator = match self.relation {
            Relation::LessOrEqual => "<=",
            Relation::LessThan => "<",
            Relation::Equal => "=",
        };
        let right = -self.expr.constant_part().clone();
        write!(
            f,
            "{} {} {}",
            self.expr.linear_part(),
            operator,
            utils::format_rational(&right)
        )
    }
}

/// Quantifier free formulas over linear arithmetic and boolean variables.
/// Formulas are shared via Rc and never mutated. Use the constructor functions, which
/// normalize atoms and flatten and simplify the boolean structure.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Formula {
    True,
    False,
    Boolean(Variable),
    Atom(Atom),
    Not(Rc<Formula>),
    And(Vec<Rc<Formula>>),
    Or(Vec<Rc<Formula>>),
}

/// Constructors
impl Formula {
    pub fn truth() -> Rc<Formula> {
        Rc::new(Formula::True)
    }

    pub fn falsity() -> Rc<Formula> {
        Rc::new(Formula::False)
    }

    pub fn from_bool(value: bool) -> Rc<Formula> {
        if value {
            Formula::truth()
        } else {
            Formula::falsity()
        }
    }

    pub fn boolean(variable: Variable) -> Rc<Formula> {
        Rc::new(Formula::Boolean(variable))
    }

    /// Builds expr <relation> 0. Constant atoms are evaluated. Atoms over integer variables
    /// are made integral, strict comparisons become non-strict ones and coefficients are
    /// divided by their gcd, tightening the constant. Equalities get a positive leading
    /// coefficient so that syntactically different but equal atoms coincide.
    pub fn atom(expr: LinearExpr, relation: Relation) -> Rc<Formula> {
        if expr.is_constant() {
            let atom = Atom {
                expr: LinearExpr::zero(),
                relation,
            };
            return Formula::from_bool(atom.holds_for(expr.constant_part()));
        }
        let (expr, relation) = if expr.is_integral() {
            let scale = Rational::from_integer(utils::denominator_lcm(
                expr.coefficients().map(|(_, c)| c).chain(Some(expr.constant_part())),
            ));
            let mut expr = expr.scaled(&scale);
            let mut relation = relation;
            if relation == Relation::LessThan {
                expr = expr.plus_constant(&Rational::one());
                relation = Relation::LessOrEqual;
            }
            let gcd = Rational::from_integer(utils::integer_gcd(
                expr.coefficients().map(|(_, c)| c.numer()),
            ));
            match relation {
                Relation::Equal => {
                    let constant = expr.constant_part() / &gcd;
                    if !constant.is_integer() {
                        return Formula::falsity();
                    }
                    let mut expr = expr.scaled(&gcd.recip());
                    if expr.coefficients().next().map_or(false, |(_, c)| c.is_negative()) {
                        expr = expr.negated();
                    }
                    (expr, relation)
                }
                _ => {
                    let constant = (expr.constant_part() / &gcd).ceil();
                    let tightened = expr
                        .linear_part()
                        .scaled(&gcd.recip())
                        .plus_constant(&constant);
                    (tightened, relation)
                }
            }
        } else {
            let leading = expr
                .coefficients()
                .next()
                .map(|(_, c)| c.abs())
                .unwrap_or_else(Rational::one);
            let mut expr = expr.scaled(&leading.recip());
            if relation == Relation::Equal
                && expr.coefficients().next().map_or(false, |(_, c)| c.is_negative())
            {
                expr = expr.negated();
            }
            (expr, relation)
        };
        Rc::new(Formula::Atom(Atom { expr, relation }))
    }

    /// left <= right
    pub fn le(left: &LinearExpr, right: &LinearExpr) -> Rc<Formula> {
        Formula::atom(left.minus(right), Relation::LessOrEqual)
    }

    /// left < right
    pub fn lt(left: &LinearExpr, right: &LinearExpr) -> Rc<Formula> {
        Formula::atom(left.minus(right), Relation::LessThan)
    }

    /// left >= right
    pub fn ge(left: &LinearExpr, right: &LinearExpr) -> Rc<Formula> {
        Formula::le(right, left)
    }

    /// left > right
    pub fn gt(left: &LinearExpr, right: &LinearExpr) -> Rc<Formula> {
        Formula::lt(right, left)
    }

    /// left = right
    pub fn eq(left: &LinearExpr, right: &LinearExpr) -> Rc<Formula> {
        Formula::atom(left.minus(right), Relation::Equal)
    }

    /// left != right
    pub fn ne(left: &LinearExpr, right: &LinearExpr) -> Rc<Formula> {
        Formula::not(Formula::eq(left, right))
    }

    pub fn not(operand: Rc<Formula>) -> Rc<Formula> {
        match operand.as_ref() {
            Formula::True => Formula::falsity(),
            Formula::False => Formula::truth(),
            Formula::Not(inner) => inner.clone(),
            _ => Rc::new(Formula::Not(operand)),
        }
    }

    pub fn and(operands: Vec<Rc<Formula>>) -> Rc<Formula> {
        let mut result = Vec::with_capacity(operands.len());
        let mut seen = HashSet::new();
        for operand in operands {
            let children = match operand.as_ref() {
                Formula::And(children) => children.clone(),
                _ => vec![operand],
            };
            for child in children {
                match child.as_ref() {
                    Formula::True => {}
                    Formula::False => return Formula::falsity(),
                    _ => {
                        if seen.insert(child.clone()) {
                            result.push(child);
                        }
                    }
                }
            }
        }
        match result.len() {
            0 => Formula::truth(),
            1 => result.remove(0),
            _ => Rc::new(Formula::And(result)),
        }
    }

    pub fn or(operands: Vec<Rc<Formula>>) -> Rc<Formula> {
        let mut result = Vec::with_capacity(operands.len());
        let mut seen = HashSet::new();
        for operand in operands {
            let children = match operand.as_ref() {
                Formula::Or(children) => children.clone(),
                _ => vec![operand],
            };
            for child in children {
                match child.as_ref() {
                    Formula::False => {}
                    Formula::True => return Formula::truth(),
                    _ => {
                        if seen.insert(child.clone()) {
                            result.push(child);
                        }
                    }
                }
            }
        }
        match result.len() {
            0 => Formula::falsity(),
            1 => result.remove(0),
            _ => Rc::new(Formula::Or(result)),
        }
    }

    pub fn implies(antecedent: Rc<Formula>, consequent: Rc<Formula>) -> Rc<Formula> {
        Formula::or(vec![Formula::not(antecedent), consequent])
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Formula::True => f.write_str("true"),
            Formula::False => f.write_str("false"),
            Formula::Boolean(variable) => write!(f, "{}", variable),
            Formula::Atom(atom) => write!(f, "{}", atom),
            Formula::Not(operand) => write!(f, "!({})", operand),
            Formula::And(operands) => write!(f, "({})", operands.iter().join(" && ")),
            Formula::Or(operands) => write!(f, "({})", operands.iter().join(" || ")),
        }
    }
}

/// A simultaneous replacement of numeric variables by expressions and of boolean variables
/// by constants.
#[derive(Clone, Debug, Default)]
pub struct Substitution {
    pub values: HashMap<Variable, LinearExpr>,
    pub booleans: HashMap<Variable, bool>,
}

/// Operations on shared formulas.
pub trait FormulaTrait {
    fn is_true(&self) -> bool;
    fn is_false(&self) -> bool;
    /// The top level conjuncts of the formula.
    fn conjuncts(&self) -> Vec<Rc<Formula>>;
    /// All atoms (as formulas) occurring in the formula.
    fn atoms(&self) -> Vec<Rc<Formula>>;
    /// All variables occurring in the formula, instantiated as they occur.
    fn variables(&self) -> BTreeSet<Variable>;
    /// The uninstantiated names of the variables of the formula.
    fn function_names(&self) -> BTreeSet<Rc<str>>;
    fn substitute(&self, substitution: &Substitution) -> Rc<Formula>;
    fn rename_free_variables(&self, rename: &dyn Fn(&Variable) -> Variable) -> Rc<Formula>;
    /// Removes SSA indices from all variables.
    fn uninstantiate(&self) -> Rc<Formula>;
    /// Rebuilds the formula with the simplifying constructors.
    fn simplify(&self) -> Rc<Formula>;
    /// The truth value of the formula under the model, if the model decides it.
    fn evaluate(&self, model: &Model) -> Option<bool>;
}

impl FormulaTrait for Rc<Formula> {
    fn is_true(&self) -> bool {
        matches!(self.as_ref(), Formula::True)
    }

    fn is_false(&self) -> bool {
        matches!(self.as_ref(), Formula::False)
    }

    fn conjuncts(&self) -> Vec<Rc<Formula>> {
        match self.as_ref() {
            Formula::True => vec![],
            Formula::And(operands) => operands.clone(),
            _ => vec![self.clone()],
        }
    }

    fn atoms(&self) -> Vec<Rc<Formula>> {
        fn collect(formula: &Rc<Formula>, result: &mut Vec<Rc<Formula>>) {
            match formula.as_ref() {
                Formula::Atom(..) => result.push(formula.clone()),
                Formula::Not(operand) => collect(operand, result),
                Formula::And(operands) | Formula::Or(operands) => {
                    operands.iter().for_each(|o| collect(o, result))
                }
                _ => {}
            }
        }
        let mut result = Vec::new();
        collect(self, &mut result);
        result.into_iter().unique().collect()
    }

    fn variables(&self) -> BTreeSet<Variable> {
        fn collect(formula: &Formula, result: &mut BTreeSet<Variable>) {
            match formula {
                Formula::Boolean(variable) => {
                    result.insert(variable.clone());
                }
                Formula::Atom(atom) => result.extend(atom.expr.variables().cloned()),
                Formula::Not(operand) => collect(operand, result),
                Formula::And(operands) | Formula::Or(operands) => {
                    operands.iter().for_each(|o| collect(o, result))
                }
                Formula::True | Formula::False => {}
            }
        }
        let mut result = BTreeSet::new();
        collect(self, &mut result);
        result
    }

    fn function_names(&self) -> BTreeSet<Rc<str>> {
        self.variables().into_iter().map(|v| v.name).collect()
    }

    fn substitute(&self, substitution: &Substitution) -> Rc<Formula> {
        match self.as_ref() {
            Formula::True | Formula::False => self.clone(),
            Formula::Boolean(variable) => match substitution.booleans.get(variable) {
                Some(value) => Formula::from_bool(*value),
                None => self.clone(),
            },
            Formula::Atom(atom) => {
                if atom
                    .expr
                    .variables()
                    .any(|v| substitution.values.contains_key(v))
                {
                    Formula::atom(atom.expr.substitute(&substitution.values), atom.relation)
                } else {
                    self.clone()
                }
            }
            Formula::Not(operand) => Formula::not(operand.substitute(substitution)),
            Formula::And(operands) => Formula::and(
                operands
                    .iter()
                    .map(|o| o.substitute(substitution))
                    .collect(),
            ),
            Formula::Or(operands) => Formula::or(
                operands
                    .iter()
                    .map(|o| o.substitute(substitution))
                    .collect(),
            ),
        }
    }

    fn rename_free_variables(&self, rename: &dyn Fn(&Variable) -> Variable) -> Rc<Formula> {
        match self.as_ref() {
            Formula::True | Formula::False => self.clone(),
            Formula::Boolean(variable) => Formula::boolean(rename(variable)),
            Formula::Atom(atom) => Formula::atom(atom.expr.map_variables(rename), atom.relation),
            Formula::Not(operand) => Formula::not(operand.rename_free_variables(rename)),
            Formula::And(operands) => Formula::and(
                operands
                    .iter()
                    .map(|o| o.rename_free_variables(rename))
                    .collect(),
            ),
            Formula::Or(operands) => Formula::or(
                operands
                    .iter()
                    .map(|o| o.rename_free_variables(rename))
                    .collect(),
            ),
        }
    }

    fn uninstantiate(&self) -> Rc<Formula> {
        self.rename_free_variables(&|v| v.uninstantiated())
    }

    fn simplify(&self) -> Rc<Formula> {
        match self.as_ref() {
            Formula::True | Formula::False | Formula::Boolean(..) => self.clone(),
            Formula::Atom(atom) => Formula::atom(atom.expr.clone(), atom.relation),
            Formula::Not(operand) => Formula::not(operand.simplify()),
            Formula::And(operands) => {
                Formula::and(operands.iter().map(|o| o.simplify()).collect())
            }
            Formula::Or(operands) => Formula::or(operands.iter().map(|o| o.simplify()).collect()),
        }
    }

    fn evaluate(&self, model: &Model) -> Option<bool> {
        match self.as_ref() {
            Formula::True => Some(true),
            Formula::False => Some(false),
            Formula::Boolean(variable) => model.boolean(variable),
            Formula::Atom(atom) => atom.expr.evaluate(model).map(|v| atom.holds_for(&v)),
            Formula::Not(operand) => operand.evaluate(model).map(|v| !v),
            Formula::And(operands) => {
                let mut result = Some(true);
                for operand in operands {
                    match operand.evaluate(model) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Formula::Or(operands) => {
                let mut result = Some(false);
                for operand in operands {
                    match operand.evaluate(model) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }
}

/// An assignment of values to variables, as produced by a solver.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Model {
    values: BTreeMap<Variable, Rational>,
    booleans: BTreeMap<Variable, bool>,
}

impl Model {
    pub fn set_value(&mut self, variable: Variable, value: Rational) {
        self.values.insert(variable, value);
    }

    pub fn set_boolean(&mut self, variable: Variable, value: bool) {
        self.booleans.insert(variable, value);
    }

    pub fn value(&self, variable: &Variable) -> Option<&Rational> {
        self.values.get(variable)
    }

    pub fn boolean(&self, variable: &Variable) -> Option<bool> {
        self.booleans.get(variable).copied()
    }

    pub fn values(&self) -> impl Iterator<Item = (&Variable, &Rational)> {
        self.values.iter()
    }

    pub fn booleans(&self) -> impl Iterator<Item = (&Variable, &bool)> {
        self.booleans.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.booleans.is_empty()
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let values = self
            .values
            .iter()
            .map(|(v, c)| format!("{} = {}", v, utils::format_rational(c)));
        let booleans = self.booleans.iter().map(|(v, b)| format!("{} = {}", v, b));
        write!(f, "{}", values.chain(booleans).join(", "))
    }
}

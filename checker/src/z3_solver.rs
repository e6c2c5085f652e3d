// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//

use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Atom, Formula, FormulaTrait, LinearExpr, Model, Relation, Sort, Variable};
use crate::interpolation;
use crate::k_limits;
use crate::smt_solver::{
    InterpolatingSession, InterpolatingSolver, InterpolationHandle, ObjectiveHandle,
    OptimizationSession, OptimizationSolver, OptimizationStatus, SmtResult, SmtSolver,
};
use crate::utils::{self, Rational};

use lazy_static::lazy_static;
use log_derive::*;
use num_traits::{One, Signed, Zero};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::fmt::{Debug, Formatter, Result};
use std::os::raw::c_uint;
use std::ptr;
use std::rc::Rc;
use std::sync::{Mutex, PoisonError};

lazy_static! {
    static ref Z3_MUTEX: Mutex<()> = Mutex::new(());
}

/// Decides, optimizes and reads models of formulas with Z3. Each solver owns a Z3 context.
/// Queries build a fresh Z3 solver or optimize object in that context.
pub struct Z3Solver {
    z3_context: z3_sys::Z3_context,
    bool_sort: z3_sys::Z3_sort,
    int_sort: z3_sys::Z3_sort,
    real_sort: z3_sys::Z3_sort,
}

impl Debug for Z3Solver {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "Z3Solver".fmt(f)
    }
}

impl Default for Z3Solver {
    #[logfn_inputs(TRACE)]
    fn default() -> Self {
        Z3Solver::new()
    }
}

impl Drop for Z3Solver {
    fn drop(&mut self) {
        let _guard = Z3_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        unsafe {
            z3_sys::Z3_del_context(self.z3_context);
        }
    }
}

fn c_string(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

/// True if the expression can be encoded over Z3 integers.
fn is_integral_expression(expression: &LinearExpr) -> bool {
    expression.is_integral()
        && expression.constant_part().is_integer()
        && expression.coefficients().all(|(_, c)| c.is_integer())
}

fn satisfiability(result: z3_sys::Z3_lbool) -> SmtResult {
    match result {
        z3_sys::Z3_L_TRUE => SmtResult::Satisfiable,
        z3_sys::Z3_L_FALSE => SmtResult::Unsatisfiable,
        _ => SmtResult::Undefined,
    }
}

impl Z3Solver {
    #[logfn_inputs(TRACE)]
    pub fn new() -> Z3Solver {
        Z3Solver::with_timeout(k_limits::Z3_TIMEOUT_MILLISECONDS)
    }

    /// A solver whose queries give up, with an undefined result, after the given time.
    #[logfn_inputs(TRACE)]
    pub fn with_timeout(milliseconds: u32) -> Z3Solver {
        let _guard = Z3_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        unsafe {
            let z3_sys_cfg = z3_sys::Z3_mk_config();
            let time_out = c_string("timeout");
            let ms = c_string(&milliseconds.to_string());
            z3_sys::Z3_set_param_value(z3_sys_cfg, time_out.as_ptr(), ms.as_ptr());
            let model = c_string("model");
            let enabled = c_string("true");
            z3_sys::Z3_set_param_value(z3_sys_cfg, model.as_ptr(), enabled.as_ptr());

            let z3_context = z3_sys::Z3_mk_context(z3_sys_cfg);
            z3_sys::Z3_del_config(z3_sys_cfg);
            // Errors are read back with Z3_get_error_code instead of aborting.
            z3_sys::Z3_set_error_handler(z3_context, None);

            Z3Solver {
                z3_context,
                bool_sort: z3_sys::Z3_mk_bool_sort(z3_context),
                int_sort: z3_sys::Z3_mk_int_sort(z3_context),
                real_sort: z3_sys::Z3_mk_real_sort(z3_context),
            }
        }
    }

    fn has_error(&self) -> bool {
        unsafe { z3_sys::Z3_get_error_code(self.z3_context) != z3_sys::ErrorCode::OK }
    }

    fn variable_ast(&self, variable: &Variable) -> z3_sys::Z3_ast {
        let sort = match variable.sort {
            Sort::Boolean => self.bool_sort,
            Sort::Rational => self.real_sort,
            Sort::Integer { .. } => self.int_sort,
        };
        let name = c_string(&variable.to_string());
        unsafe {
            let symbol = z3_sys::Z3_mk_string_symbol(self.z3_context, name.as_ptr());
            z3_sys::Z3_mk_const(self.z3_context, symbol, sort)
        }
    }

    fn numeral_ast(&self, value: &Rational, integral: bool) -> z3_sys::Z3_ast {
        let sort = if integral {
            self.int_sort
        } else {
            self.real_sort
        };
        let digits = c_string(&utils::format_rational(&value.abs()));
        unsafe {
            let magnitude = z3_sys::Z3_mk_numeral(self.z3_context, digits.as_ptr(), sort);
            if value.is_negative() {
                z3_sys::Z3_mk_unary_minus(self.z3_context, magnitude)
            } else {
                magnitude
            }
        }
    }

    /// The expression over Z3 integers if it is integral, over Z3 reals otherwise.
    fn expression_ast(&self, expression: &LinearExpr, integral: bool) -> z3_sys::Z3_ast {
        let mut terms = Vec::with_capacity(expression.variable_count() + 1);
        for (variable, coefficient) in expression.coefficients() {
            let mut term = self.variable_ast(variable);
            unsafe {
                if !integral && variable.sort.is_integral() {
                    term = z3_sys::Z3_mk_int2real(self.z3_context, term);
                }
                if !coefficient.is_one() {
                    let factors = [self.numeral_ast(coefficient, integral), term];
                    term = z3_sys::Z3_mk_mul(self.z3_context, 2, factors.as_ptr());
                }
            }
            terms.push(term);
        }
        if !expression.constant_part().is_zero() || terms.is_empty() {
            terms.push(self.numeral_ast(expression.constant_part(), integral));
        }
        if terms.len() == 1 {
            return terms[0];
        }
        unsafe { z3_sys::Z3_mk_add(self.z3_context, terms.len() as c_uint, terms.as_ptr()) }
    }

    fn atom_ast(&self, atom: &Atom) -> z3_sys::Z3_ast {
        let integral = is_integral_expression(&atom.expr);
        let left = self.expression_ast(&atom.expr, integral);
        let zero = self.numeral_ast(&Rational::zero(), integral);
        unsafe {
            match atom.relation {
                Relation::LessOrEqual => z3_sys::Z3_mk_le(self.z3_context, left, zero),
                Relation::LessThan => z3_sys::Z3_mk_lt(self.z3_context, left, zero),
                Relation::Equal => z3_sys::Z3_mk_eq(self.z3_context, left, zero),
            }
        }
    }

    fn formula_ast(&self, formula: &Rc<Formula>) -> z3_sys::Z3_ast {
        unsafe {
            match formula.as_ref() {
                Formula::True => z3_sys::Z3_mk_true(self.z3_context),
                Formula::False => z3_sys::Z3_mk_false(self.z3_context),
                Formula::Boolean(variable) => self.variable_ast(variable),
                Formula::Atom(atom) => self.atom_ast(atom),
                Formula::Not(operand) => {
                    z3_sys::Z3_mk_not(self.z3_context, self.formula_ast(operand))
                }
                Formula::And(operands) => {
                    let operands = operands
                        .iter()
                        .map(|o| self.formula_ast(o))
                        .collect::<Vec<_>>();
                    z3_sys::Z3_mk_and(
                        self.z3_context,
                        operands.len() as c_uint,
                        operands.as_ptr(),
                    )
                }
                Formula::Or(operands) => {
                    let operands = operands
                        .iter()
                        .map(|o| self.formula_ast(o))
                        .collect::<Vec<_>>();
                    z3_sys::Z3_mk_or(
                        self.z3_context,
                        operands.len() as c_uint,
                        operands.as_ptr(),
                    )
                }
            }
        }
    }

    fn numeral_value(&self, ast: z3_sys::Z3_ast) -> Option<Rational> {
        unsafe {
            if ast.is_null() || !z3_sys::Z3_is_numeral_ast(self.z3_context, ast) {
                return None;
            }
            let text = z3_sys::Z3_get_numeral_string(self.z3_context, ast);
            if text.is_null() {
                return None;
            }
            utils::parse_rational(&CStr::from_ptr(text).to_string_lossy())
        }
    }

    /// Reads the values of the variables from a Z3 model. Variables the model leaves
    /// unconstrained get the default value of their sort.
    fn read_model<'v>(
        &self,
        z3_model: z3_sys::Z3_model,
        variables: impl Iterator<Item = &'v Variable>,
    ) -> Model {
        let mut model = Model::default();
        for variable in variables {
            let mut value = ptr::null_mut();
            let evaluated = unsafe {
                z3_sys::Z3_model_eval(
                    self.z3_context,
                    z3_model,
                    self.variable_ast(variable),
                    true,
                    &mut value,
                )
            };
            if !evaluated {
                continue;
            }
            if variable.sort == Sort::Boolean {
                match unsafe { z3_sys::Z3_get_bool_value(self.z3_context, value) } {
                    z3_sys::Z3_L_TRUE => model.set_boolean(variable.clone(), true),
                    z3_sys::Z3_L_FALSE => model.set_boolean(variable.clone(), false),
                    _ => {}
                }
            } else if let Some(number) = self.numeral_value(value) {
                model.set_value(variable.clone(), number);
            }
        }
        model
    }

    /// Checks the formula with a fresh Z3 solver. The model is only read if asked for.
    fn check_formula(&self, formula: &Rc<Formula>, with_model: bool) -> (SmtResult, Option<Model>) {
        let _guard = Z3_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let context = self.z3_context;
        unsafe {
            let z3_solver = z3_sys::Z3_mk_solver(context);
            z3_sys::Z3_solver_inc_ref(context, z3_solver);
            z3_sys::Z3_solver_assert(context, z3_solver, self.formula_ast(formula));
            let mut result = satisfiability(z3_sys::Z3_solver_check(context, z3_solver));
            if self.has_error() {
                result = SmtResult::Undefined;
            }
            let mut model = None;
            if with_model && result == SmtResult::Satisfiable {
                let z3_model = z3_sys::Z3_solver_get_model(context, z3_solver);
                if !z3_model.is_null() {
                    z3_sys::Z3_model_inc_ref(context, z3_model);
                    model = Some(self.read_model(z3_model, formula.variables().iter()));
                    z3_sys::Z3_model_dec_ref(context, z3_model);
                }
            }
            z3_sys::Z3_solver_dec_ref(context, z3_solver);
            (result, model)
        }
    }
}

impl SmtSolver for Z3Solver {
    #[logfn_inputs(TRACE)]
    fn solve(&self, formula: &Rc<Formula>) -> SmtResult {
        self.check_formula(formula, false).0
    }

    #[logfn_inputs(TRACE)]
    fn model(&self, formula: &Rc<Formula>) -> PolicyResult<Option<Model>> {
        match self.check_formula(formula, true) {
            (SmtResult::Satisfiable, Some(model)) => Ok(Some(model)),
            (SmtResult::Unsatisfiable, _) => Ok(None),
            _ => Err(PolicyError::SolverUndefined(
                "looking for a model".to_string(),
            )),
        }
    }

    #[logfn_inputs(TRACE)]
    fn is_unsat(&self, formula: &Rc<Formula>) -> PolicyResult<bool> {
        match self.solve(formula) {
            SmtResult::Satisfiable => Ok(false),
            SmtResult::Unsatisfiable => Ok(true),
            SmtResult::Undefined => Err(PolicyError::SolverUndefined(
                "checking satisfiability".to_string(),
            )),
        }
    }
}

impl OptimizationSolver for Z3Solver {
    fn new_session(&self) -> Box<dyn OptimizationSession + '_> {
        let z3_optimize = unsafe {
            let z3_optimize = z3_sys::Z3_mk_optimize(self.z3_context);
            z3_sys::Z3_optimize_inc_ref(self.z3_context, z3_optimize);
            z3_optimize
        };
        Box::new(Z3OptimizationSession {
            solver: self,
            z3_optimize,
            variables: Vec::new(),
            scopes: Vec::new(),
            status: None,
            model: None,
        })
    }
}

/// A Z3 optimize object. Objectives are maximized lexicographically in the order they
/// were registered.
pub struct Z3OptimizationSession<'a> {
    solver: &'a Z3Solver,
    z3_optimize: z3_sys::Z3_optimize,
    /// The variables of the constraints and objectives, for reading models.
    variables: Vec<Variable>,
    /// The number of variables at each push.
    scopes: Vec<usize>,
    status: Option<OptimizationStatus>,
    model: Option<Model>,
}

impl Drop for Z3OptimizationSession<'_> {
    fn drop(&mut self) {
        unsafe {
            z3_sys::Z3_optimize_dec_ref(self.solver.z3_context, self.z3_optimize);
        }
    }
}

impl Z3OptimizationSession<'_> {
    fn forget_check(&mut self) {
        self.status = None;
        self.model = None;
    }
}

impl OptimizationSession for Z3OptimizationSession<'_> {
    fn push(&mut self) {
        self.scopes.push(self.variables.len());
        unsafe {
            z3_sys::Z3_optimize_push(self.solver.z3_context, self.z3_optimize);
        }
    }

    fn pop(&mut self) {
        if let Some(variables) = self.scopes.pop() {
            self.variables.truncate(variables);
            self.forget_check();
            unsafe {
                z3_sys::Z3_optimize_pop(self.solver.z3_context, self.z3_optimize);
            }
        }
    }

    fn add_constraint(&mut self, constraint: Rc<Formula>) {
        self.forget_check();
        self.variables.extend(constraint.variables());
        let ast = self.solver.formula_ast(&constraint);
        unsafe {
            z3_sys::Z3_optimize_assert(self.solver.z3_context, self.z3_optimize, ast);
        }
    }

    fn maximize(&mut self, objective: &LinearExpr) -> ObjectiveHandle {
        self.forget_check();
        self.variables.extend(objective.variables().cloned());
        let ast = self
            .solver
            .expression_ast(objective, is_integral_expression(objective));
        let index =
            unsafe { z3_sys::Z3_optimize_maximize(self.solver.z3_context, self.z3_optimize, ast) };
        ObjectiveHandle(index as usize)
    }

    fn check(&mut self) -> OptimizationStatus {
        let _guard = Z3_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let context = self.solver.z3_context;
        let result = unsafe { z3_sys::Z3_optimize_check(context, self.z3_optimize, 0, ptr::null()) };
        let status = match satisfiability(result) {
            _ if self.solver.has_error() => OptimizationStatus::Undef,
            SmtResult::Satisfiable => OptimizationStatus::Opt,
            SmtResult::Unsatisfiable => OptimizationStatus::Unsat,
            SmtResult::Undefined => OptimizationStatus::Undef,
        };
        self.model = None;
        if status == OptimizationStatus::Opt {
            unsafe {
                let z3_model = z3_sys::Z3_optimize_get_model(context, self.z3_optimize);
                if !z3_model.is_null() {
                    z3_sys::Z3_model_inc_ref(context, z3_model);
                    let variables = self.variables.iter().collect::<BTreeSet<_>>();
                    self.model = Some(self.solver.read_model(z3_model, variables.into_iter()));
                    z3_sys::Z3_model_dec_ref(context, z3_model);
                }
            }
        }
        self.status = Some(status);
        status
    }

    /// Z3 reports the optimum as a * infinity + b + c * epsilon. The infinitesimal part of
    /// a supremum that is not attained is read with the given epsilon.
    fn upper(&self, objective: ObjectiveHandle, epsilon: &Rational) -> Option<Rational> {
        if self.status != Some(OptimizationStatus::Opt) {
            return None;
        }
        let context = self.solver.z3_context;
        let parts = unsafe {
            let vector = z3_sys::Z3_optimize_get_upper_as_vector(
                context,
                self.z3_optimize,
                objective.0 as c_uint,
            );
            if vector.is_null() {
                return None;
            }
            z3_sys::Z3_ast_vector_inc_ref(context, vector);
            let parts = (0..z3_sys::Z3_ast_vector_size(context, vector))
                .map(|i| self.solver.numeral_value(z3_sys::Z3_ast_vector_get(context, vector, i)))
                .collect::<Vec<_>>();
            z3_sys::Z3_ast_vector_dec_ref(context, vector);
            parts
        };
        match parts.as_slice() {
            [Some(infinite), Some(value), Some(infinitesimal)] if infinite.is_zero() => {
                Some(value + infinitesimal * epsilon)
            }
            _ => None,
        }
    }

    fn model(&self) -> Option<Model> {
        self.model.clone()
    }
}

impl InterpolatingSolver for Z3Solver {
    fn new_interpolating_session(&self) -> Box<dyn InterpolatingSession + '_> {
        Box::new(Z3InterpolatingSession {
            solver: self,
            formulas: Vec::new(),
            model: None,
        })
    }
}

/// Satisfiability and models come from Z3. Interpolants are the negated projections of the
/// suffixes of the sequence, kept only if Z3 confirms that they are interpolants.
pub struct Z3InterpolatingSession<'a> {
    solver: &'a Z3Solver,
    formulas: Vec<Rc<Formula>>,
    model: Option<Model>,
}

impl InterpolatingSession for Z3InterpolatingSession<'_> {
    fn push(&mut self, formula: Rc<Formula>) -> InterpolationHandle {
        self.formulas.push(formula);
        InterpolationHandle(self.formulas.len() - 1)
    }

    fn is_unsat(&mut self) -> PolicyResult<bool> {
        let conjunction = Formula::and(self.formulas.clone());
        self.model = self.solver.model(&conjunction)?;
        Ok(self.model.is_none())
    }

    fn model(&self) -> Option<Model> {
        self.model.clone()
    }

    fn sequence_interpolants(
        &mut self,
        handles: &[InterpolationHandle],
    ) -> PolicyResult<Vec<Rc<Formula>>> {
        let formulas = handles
            .iter()
            .map(|h| {
                self.formulas.get(h.0).cloned().ok_or_else(|| {
                    PolicyError::ContractViolation(format!("unknown interpolation handle {}", h.0))
                })
            })
            .collect::<PolicyResult<Vec<_>>>()?;
        let interpolants = interpolation::sequence_candidates(&formulas)?;
        let mut previous = Formula::truth();
        for (interpolant, formula) in interpolants.iter().zip(formulas.iter()) {
            let step = Formula::and(vec![
                previous.clone(),
                formula.clone(),
                Formula::not(interpolant.clone()),
            ]);
            if !self.solver.is_unsat(&step)? {
                // The suffix is infeasible over the integers only.
                return Err(PolicyError::SolverUndefined(format!(
                    "interpolating: {} does not follow from the path prefix",
                    interpolant
                )));
            }
            previous = interpolant.clone();
        }
        Ok(interpolants)
    }
}

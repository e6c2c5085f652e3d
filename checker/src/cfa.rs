// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::{PolicyError, PolicyResult};
use crate::formula::{Formula, FormulaTrait, LinearExpr, Sort, Variable};
use crate::utils;

use mirai_annotations::*;
use petgraph::graph::{DiGraph, EdgeIndex, EdgeReference, NodeIndex};
use petgraph::visit::{depth_first_search, DfsEvent, DfsPostOrder, EdgeFiltered, EdgeRef};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result};
use std::path::Path;
use std::rc::Rc;

/// The name of the variable that holds the return value of a function.
pub const RETURN_VARIABLE: &str = "__retval__";

/// A program point.
#[derive(Clone, Debug)]
pub struct CfaNode {
    /// The qualified label of the node: function::label.
    pub label: Rc<str>,
    pub function: Rc<str>,
    pub is_error: bool,
}

/// The statement associated with an edge of the automaton.
/// All variables are uninstantiated.
#[derive(Clone, Debug)]
pub enum CfaEdge {
    Blank,
    Assume(Rc<Formula>),
    Assign { target: Variable, value: LinearExpr },
    /// The target gets an unknown value.
    Havoc(Variable),
    /// From the call node to the entry of the callee. The value is an index into the call sites.
    Call(usize),
    /// From the exit of the callee to the return node of the call site.
    Return(usize),
    /// From the call node to the return node, standing for the entire call.
    Summary(usize),
}

impl CfaEdge {
    /// True for edges that do not leave the function they start in.
    pub fn is_intraprocedural(&self) -> bool {
        !matches!(self, CfaEdge::Call(..) | CfaEdge::Return(..))
    }
}

#[derive(Clone, Debug)]
pub struct FunctionInfo {
    pub name: Rc<str>,
    pub entry: NodeIndex,
    pub exit: NodeIndex,
    pub parameters: Vec<Variable>,
    pub locals: Vec<Variable>,
    pub return_variable: Option<Variable>,
}

#[derive(Clone, Debug)]
pub struct CallSite {
    pub caller: Rc<str>,
    pub callee: Rc<str>,
    /// Expressions over caller variables, one per formal parameter of the callee.
    pub arguments: Vec<LinearExpr>,
    /// The caller variable that receives the return value.
    pub result: Option<Variable>,
    pub call_node: NodeIndex,
    pub return_node: NodeIndex,
}

/// The names of the variables a function reads and writes, including the globals read and
/// written by the functions it calls.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Footprint {
    pub read: BTreeSet<Rc<str>>,
    pub written: BTreeSet<Rc<str>>,
}

impl Footprint {
    pub fn contains(&self, name: &str) -> bool {
        self.read.contains(name) || self.written.contains(name)
    }
}

/// A control flow automaton for a whole program.
pub struct Cfa {
    pub graph: DiGraph<CfaNode, CfaEdge>,
    pub functions: BTreeMap<Rc<str>, FunctionInfo>,
    pub main: Rc<str>,
    pub globals: Vec<Variable>,
    pub call_sites: Vec<CallSite>,
    variables: HashMap<Rc<str>, Variable>,
    labels: HashMap<Rc<str>, NodeIndex>,
    loop_heads: HashSet<NodeIndex>,
    reverse_post_order: HashMap<NodeIndex, usize>,
    live_variables: HashMap<NodeIndex, BTreeSet<Variable>>,
    footprints: HashMap<Rc<str>, Footprint>,
    invariants: HashMap<NodeIndex, Rc<Formula>>,
    no_variables: BTreeSet<Variable>,
}

impl Debug for Cfa {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("Cfa")
            .field("main", &self.main)
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

impl Cfa {
    /// Reads a program description from a JSON file.
    pub fn load(path: &Path) -> PolicyResult<Cfa> {
        let text = std::fs::read_to_string(path)?;
        Cfa::from_json(&text)
    }

    pub fn from_json(text: &str) -> PolicyResult<Cfa> {
        let description: ProgramDescription = serde_json::from_str(text)?;
        Cfa::from_description(&description)
    }

    pub fn from_description(description: &ProgramDescription) -> PolicyResult<Cfa> {
        CfaBuilder::default().build(description)
    }

    pub fn main_function(&self) -> &FunctionInfo {
        // The builder checks that main exists.
        &self.functions[&self.main]
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn function_of(&self, node: NodeIndex) -> &Rc<str> {
        &self.graph[node].function
    }

    pub fn node(&self, label: &str) -> Option<NodeIndex> {
        self.labels.get(label).copied()
    }

    pub fn label(&self, node: NodeIndex) -> &Rc<str> {
        &self.graph[node].label
    }

    pub fn is_error(&self, node: NodeIndex) -> bool {
        self.graph[node].is_error
    }

    pub fn edge(&self, edge: EdgeIndex) -> &CfaEdge {
        &self.graph[edge]
    }

    pub fn edge_target(&self, edge: EdgeIndex) -> NodeIndex {
        match self.graph.edge_endpoints(edge) {
            Some((_, target)) => target,
            None => assume_unreachable!("edge indices are never removed"),
        }
    }

    pub fn outgoing_edges(&self, node: NodeIndex) -> Vec<EdgeIndex> {
        let mut edges = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| e.id())
            .collect::<Vec<_>>();
        edges.sort();
        edges
    }

    /// The number of edges entering the node, other than return edges.
    pub fn incoming_edge_count(&self, node: NodeIndex) -> usize {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .filter(|e| !matches!(e.weight(), CfaEdge::Return(..)))
            .count()
    }

    pub fn is_loop_head(&self, node: NodeIndex) -> bool {
        self.loop_heads.contains(&node)
    }

    pub fn is_function_entry(&self, node: NodeIndex) -> bool {
        self.functions.get(self.function_of(node)).map(|f| f.entry) == Some(node)
    }

    pub fn is_function_exit(&self, node: NodeIndex) -> bool {
        self.functions.get(self.function_of(node)).map(|f| f.exit) == Some(node)
    }

    /// True if the node is the source of a call or the target of a return.
    pub fn is_call_or_return_node(&self, node: NodeIndex) -> bool {
        self.call_sites
            .iter()
            .any(|cs| cs.call_node == node || cs.return_node == node)
    }

    /// The position of the node in the reverse post order of the automaton.
    pub fn reverse_post_order(&self, node: NodeIndex) -> usize {
        self.reverse_post_order
            .get(&node)
            .copied()
            .unwrap_or(usize::MAX)
    }

    /// The numeric variables that may be read before they are written on some path from the node.
    /// Globals are always live. The return variable is live at the exit of its function.
    pub fn live_variables(&self, node: NodeIndex) -> &BTreeSet<Variable> {
        self.live_variables
            .get(&node)
            .unwrap_or(&self.no_variables)
    }

    /// The linear parts of the atoms of the conditions of assume edges in the function of the node.
    pub fn assumption_expressions(&self, node: NodeIndex) -> Vec<LinearExpr> {
        let function = self.function_of(node);
        let mut result = BTreeSet::new();
        for edge in self.graph.edge_references() {
            if self.graph[edge.source()].function != *function {
                continue;
            }
            if let CfaEdge::Assume(condition) = edge.weight() {
                for atom in condition.atoms() {
                    if let Formula::Atom(atom) = atom.as_ref() {
                        result.insert(atom.expr.linear_part());
                    }
                }
            }
        }
        result.into_iter().collect()
    }

    pub fn footprint(&self, function: &str) -> Option<&Footprint> {
        self.footprints.get(function)
    }

    /// The globals written by the function or by the functions it calls.
    pub fn written_globals(&self, function: &str) -> Vec<Variable> {
        match self.footprints.get(function) {
            Some(footprint) => self
                .globals
                .iter()
                .filter(|g| footprint.written.contains(&g.name))
                .cloned()
                .collect(),
            None => vec![],
        }
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.iter().any(|g| &*g.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// An invariant supplied with the program description for the node.
    pub fn invariant(&self, node: NodeIndex) -> Option<&Rc<Formula>> {
        self.invariants.get(&node)
    }

    /// True if the function can (transitively) call itself.
    pub fn is_recursive(&self, function: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack = self.callees(function);
        while let Some(callee) = stack.pop() {
            if &*callee == function {
                return true;
            }
            if visited.insert(callee.clone()) {
                stack.extend(self.callees(&callee));
            }
        }
        false
    }

    fn callees(&self, function: &str) -> Vec<Rc<str>> {
        self.call_sites
            .iter()
            .filter(|cs| &*cs.caller == function)
            .map(|cs| cs.callee.clone())
            .collect()
    }
}

/// The JSON form of a program.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProgramDescription {
    #[serde(default = "default_main")]
    pub main: String,
    #[serde(default)]
    pub globals: Vec<VariableDescription>,
    pub functions: Vec<FunctionDescription>,
}

fn default_main() -> String {
    String::from("main")
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VariableDescription {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub type_name: String,
}

fn default_type() -> String {
    String::from("int")
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDescription {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<VariableDescription>,
    #[serde(default)]
    pub locals: Vec<VariableDescription>,
    /// The type of the return value, if the function returns one.
    #[serde(default)]
    pub returns: Option<String>,
    pub entry: String,
    pub exit: String,
    #[serde(default)]
    pub error_nodes: Vec<String>,
    #[serde(default)]
    pub invariants: BTreeMap<String, ConditionDescription>,
    pub edges: Vec<EdgeDescription>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EdgeDescription {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub statement: Statement,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    #[default]
    Blank,
    Assign {
        target: String,
        value: ExpressionDescription,
    },
    Havoc(String),
    Assume(ConditionDescription),
    Call {
        function: String,
        #[serde(default)]
        arguments: Vec<ExpressionDescription>,
        #[serde(default)]
        result: Option<String>,
    },
    ReturnValue(ExpressionDescription),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionDescription {
    Var(String),
    Constant(i64),
    /// A rational constant such as "1/2".
    Rational(String),
    Add(Box<ExpressionDescription>, Box<ExpressionDescription>),
    Sub(Box<ExpressionDescription>, Box<ExpressionDescription>),
    Mul(Box<ExpressionDescription>, Box<ExpressionDescription>),
    Neg(Box<ExpressionDescription>),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ConditionDescription {
    True,
    False,
    /// A condition whose value is unknown.
    Nondet,
    Le(ExpressionDescription, ExpressionDescription),
    Lt(ExpressionDescription, ExpressionDescription),
    Ge(ExpressionDescription, ExpressionDescription),
    Gt(ExpressionDescription, ExpressionDescription),
    Eq(ExpressionDescription, ExpressionDescription),
    Ne(ExpressionDescription, ExpressionDescription),
    Not(Box<ConditionDescription>),
    And(Vec<ConditionDescription>),
    Or(Vec<ConditionDescription>),
}

#[derive(Default)]
struct CfaBuilder {
    graph: DiGraph<CfaNode, CfaEdge>,
    labels: HashMap<Rc<str>, NodeIndex>,
    variables: HashMap<Rc<str>, Variable>,
    globals: Vec<Variable>,
    functions: BTreeMap<Rc<str>, FunctionInfo>,
    call_sites: Vec<CallSite>,
    invariants: HashMap<NodeIndex, Rc<Formula>>,
}

impl CfaBuilder {
    fn build(mut self, description: &ProgramDescription) -> PolicyResult<Cfa> {
        for global in description.globals.iter() {
            let variable = self.declare(&global.name, &global.type_name)?;
            self.globals.push(variable);
        }
        for function in description.functions.iter() {
            self.declare_function(function)?;
        }
        for function in description.functions.iter() {
            self.add_edges(function)?;
        }
        let main: Rc<str> = Rc::from(description.main.as_str());
        if !self.functions.contains_key(&main) {
            return Err(PolicyError::InvalidProgram(format!(
                "the main function {} is not defined",
                main
            )));
        }
        let mut cfa = Cfa {
            graph: self.graph,
            functions: self.functions,
            main,
            globals: self.globals,
            call_sites: self.call_sites,
            variables: self.variables,
            labels: self.labels,
            loop_heads: HashSet::new(),
            reverse_post_order: HashMap::new(),
            live_variables: HashMap::new(),
            footprints: HashMap::new(),
            invariants: self.invariants,
            no_variables: BTreeSet::new(),
        };
        cfa.loop_heads = compute_loop_heads(&cfa);
        cfa.reverse_post_order = compute_reverse_post_order(&cfa);
        cfa.live_variables = compute_live_variables(&cfa);
        cfa.footprints = compute_footprints(&cfa);
        debug!(
            "built {:?} with loop heads {:?}",
            cfa,
            cfa.loop_heads
                .iter()
                .map(|n| cfa.label(*n).to_string())
                .collect::<BTreeSet<_>>()
        );
        Ok(cfa)
    }

    fn declare(&mut self, name: &str, type_name: &str) -> PolicyResult<Variable> {
        let sort = match Sort::from_type_name(type_name) {
            Some(sort) if sort.is_numeric() => sort,
            _ => {
                return Err(PolicyError::InvalidProgram(format!(
                    "unsupported type {} of {}",
                    type_name, name
                )))
            }
        };
        if self.variables.contains_key(name) {
            return Err(PolicyError::InvalidProgram(format!(
                "{} is declared more than once",
                name
            )));
        }
        let variable = Variable::new(name, sort);
        self.variables.insert(variable.name.clone(), variable.clone());
        Ok(variable)
    }

    fn node(&mut self, function: &str, label: &str) -> NodeIndex {
        let qualified: Rc<str> = Rc::from(format!("{}::{}", function, label).as_str());
        if let Some(node) = self.labels.get(&qualified) {
            return *node;
        }
        let node = self.graph.add_node(CfaNode {
            label: qualified.clone(),
            function: Rc::from(function),
            is_error: false,
        });
        self.labels.insert(qualified, node);
        node
    }

    fn declare_function(&mut self, function: &FunctionDescription) -> PolicyResult<()> {
        let name: Rc<str> = Rc::from(function.name.as_str());
        if self.functions.contains_key(&name) {
            return Err(PolicyError::InvalidProgram(format!(
                "function {} is defined more than once",
                name
            )));
        }
        let qualify = |local: &str| format!("{}::{}", name, local);
        let mut parameters = Vec::new();
        for parameter in function.parameters.iter() {
            parameters.push(self.declare(&qualify(&parameter.name), &parameter.type_name)?);
        }
        let mut locals = Vec::new();
        for local in function.locals.iter() {
            locals.push(self.declare(&qualify(&local.name), &local.type_name)?);
        }
        let return_variable = match &function.returns {
            Some(type_name) => Some(self.declare(&qualify(RETURN_VARIABLE), type_name)?),
            None => None,
        };
        let entry = self.node(&name, &function.entry);
        let exit = self.node(&name, &function.exit);
        for error in function.error_nodes.iter() {
            let node = self.node(&name, error);
            self.graph[node].is_error = true;
        }
        self.functions.insert(
            name.clone(),
            FunctionInfo {
                name,
                entry,
                exit,
                parameters,
                locals,
                return_variable,
            },
        );
        Ok(())
    }

    fn add_edges(&mut self, function: &FunctionDescription) -> PolicyResult<()> {
        let name = function.name.as_str();
        for edge in function.edges.iter() {
            let from = self.node(name, &edge.from);
            let to = self.node(name, &edge.to);
            match &edge.statement {
                Statement::Blank => {
                    self.graph.add_edge(from, to, CfaEdge::Blank);
                }
                Statement::Assign { target, value } => {
                    let target = self.resolve(name, target)?;
                    let edge = match self.expression(name, value)? {
                        Some(value) => CfaEdge::Assign { target, value },
                        None => CfaEdge::Havoc(target),
                    };
                    self.graph.add_edge(from, to, edge);
                }
                Statement::Havoc(target) => {
                    let target = self.resolve(name, target)?;
                    self.graph.add_edge(from, to, CfaEdge::Havoc(target));
                }
                Statement::Assume(condition) => {
                    let condition = self.condition(name, condition, true)?;
                    self.graph.add_edge(from, to, CfaEdge::Assume(condition));
                }
                Statement::ReturnValue(value) => {
                    let target = self
                        .functions
                        .get(name)
                        .and_then(|f| f.return_variable.clone())
                        .ok_or_else(|| {
                            PolicyError::InvalidProgram(format!(
                                "{} returns a value but declares no return type",
                                name
                            ))
                        })?;
                    let edge = match self.expression(name, value)? {
                        Some(value) => CfaEdge::Assign { target, value },
                        None => CfaEdge::Havoc(target),
                    };
                    self.graph.add_edge(from, to, edge);
                }
                Statement::Call {
                    function: callee,
                    arguments,
                    result,
                } => self.add_call(name, from, to, callee, arguments, result.as_deref())?,
            }
        }
        for (label, condition) in function.invariants.iter() {
            let node = self.node(name, label);
            let invariant = self.condition(name, condition, true)?;
            self.invariants.insert(node, invariant);
        }
        Ok(())
    }

    fn add_call(
        &mut self,
        caller: &str,
        call_node: NodeIndex,
        return_node: NodeIndex,
        callee: &str,
        arguments: &[ExpressionDescription],
        result: Option<&str>,
    ) -> PolicyResult<()> {
        let (entry, exit, parameters, return_variable) = match self.functions.get(callee) {
            Some(info) => (
                info.entry,
                info.exit,
                info.parameters.clone(),
                info.return_variable.clone(),
            ),
            None => {
                return Err(PolicyError::InvalidProgram(format!(
                    "{} calls the undefined function {}",
                    caller, callee
                )))
            }
        };
        if parameters.len() != arguments.len() {
            return Err(PolicyError::InvalidProgram(format!(
                "{} calls {} with {} arguments but it has {} parameters",
                caller,
                callee,
                arguments.len(),
                parameters.len()
            )));
        }
        let mut argument_expressions = Vec::with_capacity(arguments.len());
        for argument in arguments.iter() {
            match self.expression(caller, argument)? {
                Some(expression) => argument_expressions.push(expression),
                None => {
                    return Err(PolicyError::InvalidProgram(format!(
                        "{} passes a non linear argument to {}",
                        caller, callee
                    )))
                }
            }
        }
        let result = match result {
            Some(result) => {
                if return_variable.is_none() {
                    return Err(PolicyError::InvalidProgram(format!(
                        "{} uses the result of {}, which returns nothing",
                        caller, callee
                    )));
                }
                Some(self.resolve(caller, result)?)
            }
            None => None,
        };
        let index = self.call_sites.len();
        self.call_sites.push(CallSite {
            caller: Rc::from(caller),
            callee: Rc::from(callee),
            arguments: argument_expressions,
            result,
            call_node,
            return_node,
        });
        self.graph.add_edge(call_node, entry, CfaEdge::Call(index));
        self.graph.add_edge(exit, return_node, CfaEdge::Return(index));
        self.graph
            .add_edge(call_node, return_node, CfaEdge::Summary(index));
        Ok(())
    }

    /// Locals shadow globals.
    fn resolve(&self, function: &str, name: &str) -> PolicyResult<Variable> {
        let qualified = format!("{}::{}", function, name);
        self.variables
            .get(qualified.as_str())
            .or_else(|| self.variables.get(name))
            .cloned()
            .ok_or_else(|| {
                PolicyError::InvalidProgram(format!("{} uses the undeclared variable {}", function, name))
            })
    }

    /// Returns None if the expression is not linear.
    fn expression(
        &self,
        function: &str,
        expression: &ExpressionDescription,
    ) -> PolicyResult<Option<LinearExpr>> {
        Ok(match expression {
            ExpressionDescription::Var(name) => {
                Some(LinearExpr::variable(self.resolve(function, name)?))
            }
            ExpressionDescription::Constant(value) => {
                Some(LinearExpr::constant(utils::rational(*value)))
            }
            ExpressionDescription::Rational(text) => match utils::parse_rational(text) {
                Some(value) => Some(LinearExpr::constant(value)),
                None => {
                    return Err(PolicyError::InvalidProgram(format!(
                        "{} is not a rational constant",
                        text
                    )))
                }
            },
            ExpressionDescription::Add(left, right) => {
                let left = self.expression(function, left)?;
                let right = self.expression(function, right)?;
                left.zip(right).map(|(l, r)| l.plus(&r))
            }
            ExpressionDescription::Sub(left, right) => {
                let left = self.expression(function, left)?;
                let right = self.expression(function, right)?;
                left.zip(right).map(|(l, r)| l.minus(&r))
            }
            ExpressionDescription::Mul(left, right) => {
                let left = self.expression(function, left)?;
                let right = self.expression(function, right)?;
                match (left, right) {
                    (Some(l), Some(r)) if r.is_constant() => Some(l.scaled(r.constant_part())),
                    (Some(l), Some(r)) if l.is_constant() => Some(r.scaled(l.constant_part())),
                    _ => None,
                }
            }
            ExpressionDescription::Neg(operand) => {
                self.expression(function, operand)?.map(|e| e.negated())
            }
        })
    }

    /// Translates a condition, or its negation if positive is false. Non linear comparisons
    /// are unknown and become true under either polarity.
    fn condition(
        &self,
        function: &str,
        condition: &ConditionDescription,
        positive: bool,
    ) -> PolicyResult<Rc<Formula>> {
        type Comparison = fn(&LinearExpr, &LinearExpr) -> Rc<Formula>;
        let compare = |left: &ExpressionDescription,
                       right: &ExpressionDescription,
                       if_positive: Comparison,
                       if_negative: Comparison|
         -> PolicyResult<Rc<Formula>> {
            let left = self.expression(function, left)?;
            let right = self.expression(function, right)?;
            Ok(match (left, right) {
                (Some(l), Some(r)) => {
                    if positive {
                        if_positive(&l, &r)
                    } else {
                        if_negative(&l, &r)
                    }
                }
                _ => Formula::truth(),
            })
        };
        match condition {
            ConditionDescription::True => Ok(Formula::from_bool(positive)),
            ConditionDescription::False => Ok(Formula::from_bool(!positive)),
            ConditionDescription::Nondet => Ok(Formula::truth()),
            ConditionDescription::Le(l, r) => compare(l, r, Formula::le, Formula::gt),
            ConditionDescription::Lt(l, r) => compare(l, r, Formula::lt, Formula::ge),
            ConditionDescription::Ge(l, r) => compare(l, r, Formula::ge, Formula::lt),
            ConditionDescription::Gt(l, r) => compare(l, r, Formula::gt, Formula::le),
            ConditionDescription::Eq(l, r) => compare(l, r, Formula::eq, Formula::ne),
            ConditionDescription::Ne(l, r) => compare(l, r, Formula::ne, Formula::eq),
            ConditionDescription::Not(operand) => self.condition(function, operand, !positive),
            ConditionDescription::And(operands) | ConditionDescription::Or(operands) => {
                let operands = operands
                    .iter()
                    .map(|o| self.condition(function, o, positive))
                    .collect::<PolicyResult<Vec<_>>>()?;
                let is_and = matches!(condition, ConditionDescription::And(..));
                if is_and == positive {
                    Ok(Formula::and(operands))
                } else {
                    Ok(Formula::or(operands))
                }
            }
        }
    }
}

/// The targets of back edges found by a depth first search of the intraprocedural graph
/// of each function.
fn compute_loop_heads(cfa: &Cfa) -> HashSet<NodeIndex> {
    let intraprocedural = EdgeFiltered::from_fn(&cfa.graph, |e: EdgeReference<'_, CfaEdge>| {
        e.weight().is_intraprocedural()
    });
    let mut heads = HashSet::new();
    for function in cfa.functions.values() {
        depth_first_search(&intraprocedural, Some(function.entry), |event| {
            if let DfsEvent::BackEdge(_, head) = event {
                heads.insert(head);
            }
        });
    }
    heads
}

fn compute_reverse_post_order(cfa: &Cfa) -> HashMap<NodeIndex, usize> {
    let mut post_order = Vec::with_capacity(cfa.graph.node_count());
    let mut dfs = DfsPostOrder::empty(&cfa.graph);
    let main_entry = cfa.main_function().entry;
    let entries = Some(main_entry)
        .into_iter()
        .chain(cfa.functions.values().map(|f| f.entry))
        .chain(cfa.graph.node_indices());
    for entry in entries {
        if dfs.discovered.contains(entry.index()) {
            continue;
        }
        dfs.move_to(entry);
        while let Some(node) = dfs.next(&cfa.graph) {
            post_order.push(node);
        }
    }
    post_order
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect()
}

/// A backward may analysis over the intraprocedural edges of each function.
fn compute_live_variables(cfa: &Cfa) -> HashMap<NodeIndex, BTreeSet<Variable>> {
    let globals: BTreeSet<Variable> = cfa.globals.iter().cloned().collect();
    let mut live: HashMap<NodeIndex, BTreeSet<Variable>> = cfa
        .graph
        .node_indices()
        .map(|n| (n, BTreeSet::new()))
        .collect();
    for function in cfa.functions.values() {
        if let (Some(retval), Some(exit)) = (&function.return_variable, live.get_mut(&function.exit))
        {
            exit.insert(retval.clone());
        }
    }
    let mut changed = true;
    while changed {
        changed = false;
        for edge in cfa.graph.edge_references() {
            let (uses, defines) = match edge.weight() {
                // The summary edge of the call site carries liveness across the call.
                CfaEdge::Call(..) | CfaEdge::Return(..) => continue,
                CfaEdge::Blank => (BTreeSet::new(), None),
                CfaEdge::Assume(condition) => (condition.variables(), None),
                CfaEdge::Assign { target, value } => {
                    (value.variables().cloned().collect(), Some(target))
                }
                CfaEdge::Havoc(target) => (BTreeSet::new(), Some(target)),
                CfaEdge::Summary(index) => {
                    let call_site = &cfa.call_sites[*index];
                    let uses = call_site
                        .arguments
                        .iter()
                        .flat_map(|a| a.variables().cloned())
                        .collect();
                    (uses, call_site.result.as_ref())
                }
            };
            let mut incoming = live[&edge.target()].clone();
            if let Some(defined) = defines {
                incoming.remove(defined);
            }
            incoming.extend(uses);
            if let Some(source) = live.get_mut(&edge.source()) {
                let before = source.len();
                source.extend(incoming);
                changed |= source.len() != before;
            }
        }
    }
    for variables in live.values_mut() {
        variables.extend(globals.iter().cloned());
    }
    live
}

fn compute_footprints(cfa: &Cfa) -> HashMap<Rc<str>, Footprint> {
    let mut footprints: HashMap<Rc<str>, Footprint> = HashMap::new();
    for function in cfa.functions.values() {
        let mut footprint = Footprint::default();
        footprint
            .read
            .extend(function.parameters.iter().map(|p| p.name.clone()));
        if let Some(retval) = &function.return_variable {
            footprint.written.insert(retval.name.clone());
        }
        footprints.insert(function.name.clone(), footprint);
    }
    for edge in cfa.graph.edge_references() {
        let function = &cfa.graph[edge.source()].function;
        let (read, written): (Vec<Rc<str>>, Option<Rc<str>>) = match edge.weight() {
            CfaEdge::Blank | CfaEdge::Call(..) | CfaEdge::Return(..) => continue,
            CfaEdge::Assume(condition) => (condition.function_names().into_iter().collect(), None),
            CfaEdge::Assign { target, value } => (
                value.variables().map(|v| v.name.clone()).collect(),
                Some(target.name.clone()),
            ),
            CfaEdge::Havoc(target) => (vec![], Some(target.name.clone())),
            CfaEdge::Summary(index) => {
                let call_site = &cfa.call_sites[*index];
                (
                    call_site
                        .arguments
                        .iter()
                        .flat_map(|a| a.variables().map(|v| v.name.clone()))
                        .collect(),
                    call_site.result.as_ref().map(|r| r.name.clone()),
                )
            }
        };
        if let Some(footprint) = footprints.get_mut(function) {
            footprint.read.extend(read);
            footprint.written.extend(written);
        }
    }
    // Globals accessed by callees are accessed by their callers.
    let mut changed = true;
    while changed {
        changed = false;
        for call_site in cfa.call_sites.iter() {
            let (read, written) = match footprints.get(&call_site.callee) {
                Some(callee) => (
                    callee
                        .read
                        .iter()
                        .filter(|n| cfa.is_global(n))
                        .cloned()
                        .collect::<Vec<_>>(),
                    callee
                        .written
                        .iter()
                        .filter(|n| cfa.is_global(n))
                        .cloned()
                        .collect::<Vec<_>>(),
                ),
                None => continue,
            };
            if let Some(caller) = footprints.get_mut(&call_site.caller) {
                let before = caller.read.len() + caller.written.len();
                caller.read.extend(read);
                caller.written.extend(written);
                changed |= caller.read.len() + caller.written.len() != before;
            }
        }
    }
    footprints
}

//! Match-specification compiler and evaluator
//!
//! A match specification is a list of `{pattern, guards, actions}` clauses
//! evaluated against a call's argument list. Predicates supplied by the
//! caller are declarative [`CallPredicate`] values; compilation validates
//! each clause and rewrites its outcome sentinel into an action list. The
//! controller never runs caller code against live arguments: only compiled
//! specifications reach the event source.

use crate::event::Term;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// One position in a clause head: wildcard, variable binding, or literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ArgPattern {
    /// Matches anything, binds nothing.
    Any,
    /// Binds the argument to variable slot `$n`.
    Bind(usize),
    /// Matches structurally equal terms only.
    Literal(Term),
}

/// Guard operand: a bound variable or a literal term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Var(usize),
    Lit(Term),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeTest {
    Integer,
    Float,
    Number,
    String,
    List,
    Map,
    Bool,
}

/// A single guard test. All guards in a clause must hold for it to match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GuardTest {
    Cmp(CmpOp, Operand, Operand),
    TypeIs(TypeTest, Operand),
    Not(Box<GuardTest>),
    AnyOf(Vec<GuardTest>),
}

/// Action attached to a matching clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    /// Request a paired `return_from` event alongside the `call` event.
    ReturnTrace,
}

/// One compiled clause: head pattern, guard list, action list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsClause {
    pub head: Vec<ArgPattern>,
    pub guards: Vec<GuardTest>,
    pub actions: Vec<Action>,
}

/// A compiled match specification: first matching clause wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSpec {
    pub clauses: Vec<MsClause>,
}

/// Outcome sentinel of a predicate clause.
///
/// `Matched` compiles to an empty action list (pass-through); `ReturnTrace`
/// compiles to a return-trace action so call arguments and return values are
/// captured together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseOutcome {
    Matched,
    ReturnTrace,
}

/// One clause of a caller-supplied predicate, before compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateClause {
    pub head: Vec<ArgPattern>,
    pub guards: Vec<GuardTest>,
    pub outcome: ClauseOutcome,
}

/// A declarative predicate over a call's argument list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallPredicate {
    pub clauses: Vec<PredicateClause>,
}

impl CallPredicate {
    pub fn clause(mut self, clause: PredicateClause) -> Self {
        self.clauses.push(clause);
        self
    }
}

impl PredicateClause {
    pub fn matching(head: Vec<ArgPattern>) -> Self {
        PredicateClause {
            head,
            guards: Vec::new(),
            outcome: ClauseOutcome::Matched,
        }
    }

    pub fn returning(head: Vec<ArgPattern>) -> Self {
        PredicateClause {
            head,
            guards: Vec::new(),
            outcome: ClauseOutcome::ReturnTrace,
        }
    }

    pub fn guard(mut self, g: GuardTest) -> Self {
        self.guards.push(g);
        self
    }
}

/// Why a predicate could not be compiled. Each variant names the offending
/// clause so the operator can fix it; nothing is armed on failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("predicate has no clauses")]
    EmptyPredicate,
    #[error("clause {clause}: guard references unbound variable ${var}")]
    UnboundVariable { clause: usize, var: usize },
    #[error("clause {clause}: variable ${var} bound more than once in the head")]
    DuplicateBinding { clause: usize, var: usize },
}

/// Argument selector of a trace pattern, as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSelector {
    /// Match any arity, any arguments.
    Any,
    /// Match a fixed arity only.
    Arity(u8),
    /// An already-compiled match specification.
    Spec(MatchSpec),
    /// A predicate to be compiled before installation.
    Predicate(CallPredicate),
}

/// Argument selector after compilation; the only form handed to the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CompiledArgs {
    Any,
    Arity(u8),
    Spec(MatchSpec),
}

impl ArgSelector {
    /// Compile into source-ready form. Identity on everything except
    /// predicates: arity and already-compiled specifications pass through
    /// unchanged.
    pub fn compile(self) -> Result<CompiledArgs, CompileError> {
        match self {
            ArgSelector::Any => Ok(CompiledArgs::Any),
            ArgSelector::Arity(n) => Ok(CompiledArgs::Arity(n)),
            ArgSelector::Spec(spec) => Ok(CompiledArgs::Spec(spec)),
            ArgSelector::Predicate(pred) => compile_predicate(&pred).map(CompiledArgs::Spec),
        }
    }
}

/// Compile a predicate clause by clause: head and guards are preserved
/// unchanged, outcome sentinels become action lists.
pub fn compile_predicate(pred: &CallPredicate) -> Result<MatchSpec, CompileError> {
    if pred.clauses.is_empty() {
        return Err(CompileError::EmptyPredicate);
    }
    let mut clauses = Vec::with_capacity(pred.clauses.len());
    for (idx, clause) in pred.clauses.iter().enumerate() {
        validate_clause(idx, clause)?;
        let actions = match clause.outcome {
            ClauseOutcome::Matched => Vec::new(),
            ClauseOutcome::ReturnTrace => vec![Action::ReturnTrace],
        };
        clauses.push(MsClause {
            head: clause.head.clone(),
            guards: clause.guards.clone(),
            actions,
        });
    }
    Ok(MatchSpec { clauses })
}

fn validate_clause(idx: usize, clause: &PredicateClause) -> Result<(), CompileError> {
    let mut bound = Vec::new();
    for pat in &clause.head {
        if let ArgPattern::Bind(var) = pat {
            if bound.contains(var) {
                return Err(CompileError::DuplicateBinding { clause: idx, var: *var });
            }
            bound.push(*var);
        }
    }
    for guard in &clause.guards {
        check_guard_vars(idx, guard, &bound)?;
    }
    Ok(())
}

fn check_guard_vars(idx: usize, guard: &GuardTest, bound: &[usize]) -> Result<(), CompileError> {
    let check_op = |op: &Operand| -> Result<(), CompileError> {
        if let Operand::Var(var) = op {
            if !bound.contains(var) {
                return Err(CompileError::UnboundVariable { clause: idx, var: *var });
            }
        }
        Ok(())
    };
    match guard {
        GuardTest::Cmp(_, a, b) => {
            check_op(a)?;
            check_op(b)
        }
        GuardTest::TypeIs(_, op) => check_op(op),
        GuardTest::Not(inner) => check_guard_vars(idx, inner, bound),
        GuardTest::AnyOf(inner) => {
            for g in inner {
                check_guard_vars(idx, g, bound)?;
            }
            Ok(())
        }
    }
}

/// Result of evaluating a specification against an argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchOutcome {
    pub return_trace: bool,
}

impl MatchSpec {
    /// Evaluate against an argument list. First matching clause wins; `None`
    /// means no clause matched and the call is not traced.
    pub fn matches(&self, args: &[Term]) -> Option<MatchOutcome> {
        for clause in &self.clauses {
            if let Some(bindings) = match_head(&clause.head, args) {
                if clause.guards.iter().all(|g| eval_guard(g, &bindings)) {
                    return Some(MatchOutcome {
                        return_trace: clause.actions.contains(&Action::ReturnTrace),
                    });
                }
            }
        }
        None
    }
}

impl CompiledArgs {
    /// Evaluate the selector against an argument list.
    pub fn matches(&self, args: &[Term]) -> Option<MatchOutcome> {
        match self {
            CompiledArgs::Any => Some(MatchOutcome::default()),
            CompiledArgs::Arity(n) => (args.len() == *n as usize).then(MatchOutcome::default),
            CompiledArgs::Spec(spec) => spec.matches(args),
        }
    }
}

fn match_head<'a>(head: &[ArgPattern], args: &'a [Term]) -> Option<HashMap<usize, &'a Term>> {
    if head.len() != args.len() {
        return None;
    }
    let mut bindings = HashMap::new();
    for (pat, arg) in head.iter().zip(args) {
        match pat {
            ArgPattern::Any => {}
            ArgPattern::Literal(lit) => {
                if lit != arg {
                    return None;
                }
            }
            ArgPattern::Bind(var) => {
                bindings.insert(*var, arg);
            }
        }
    }
    Some(bindings)
}

fn eval_guard(guard: &GuardTest, bindings: &HashMap<usize, &Term>) -> bool {
    match guard {
        GuardTest::Cmp(op, a, b) => {
            let (Some(a), Some(b)) = (resolve(a, bindings), resolve(b, bindings)) else {
                return false;
            };
            eval_cmp(*op, a, b)
        }
        GuardTest::TypeIs(test, op) => {
            let Some(term) = resolve(op, bindings) else {
                return false;
            };
            eval_type(*test, term)
        }
        GuardTest::Not(inner) => !eval_guard(inner, bindings),
        GuardTest::AnyOf(inner) => inner.iter().any(|g| eval_guard(g, bindings)),
    }
}

fn resolve<'a>(op: &'a Operand, bindings: &HashMap<usize, &'a Term>) -> Option<&'a Term> {
    match op {
        Operand::Var(var) => bindings.get(var).copied(),
        Operand::Lit(lit) => Some(lit),
    }
}

fn eval_cmp(op: CmpOp, a: &Term, b: &Term) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        // Ordering is defined for numbers and strings; a failed guard on
        // anything else means the clause does not match.
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                x.partial_cmp(&y)
            } else if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
                Some(x.cmp(y))
            } else {
                None
            };
            match (op, ord) {
                (CmpOp::Lt, Some(o)) => o.is_lt(),
                (CmpOp::Le, Some(o)) => o.is_le(),
                (CmpOp::Gt, Some(o)) => o.is_gt(),
                (CmpOp::Ge, Some(o)) => o.is_ge(),
                _ => false,
            }
        }
    }
}

fn eval_type(test: TypeTest, term: &Term) -> bool {
    match test {
        TypeTest::Integer => term.is_i64() || term.is_u64(),
        TypeTest::Float => term.is_f64(),
        TypeTest::Number => term.is_number(),
        TypeTest::String => term.is_string(),
        TypeTest::List => term.is_array(),
        TypeTest::Map => term.is_object(),
        TypeTest::Bool => term.is_boolean(),
    }
}

//! Self-recursive tail call detection.
//!
//! For a binding `name = fn(...) { ... }` the analyzer walks the function
//! body once, carrying a single "terminal" flag, and records every call of
//! `name` whose result is returned unchanged. The compiler later checks call
//! expressions against the recorded sites by node identity.

use std::ptr;

use crate::lang::node::{Arg, Expr, ExprKind, FunctionLit, MapKey, Stmt, StmtKind};

/// Call expressions in tail position, borrowed from the analyzed body and
/// compared by address.
#[derive(Debug, Default, Clone)]
pub struct TailCalls<'a> {
    sites: Vec<&'a Expr>,
}

impl TailCalls<'_> {
    pub fn contains(&self, call: &Expr) -> bool {
        self.sites.iter().any(|&site| ptr::eq(site, call))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Find the self tail calls of `func` bound to `name`.
///
/// Generators never get tail calls, and neither does a function whose body
/// rebinds `name` (parameter, `var`, `for` variable, catch variable or
/// nested declaration), since the call would no longer be a self call.
pub fn analyze<'a>(name: &str, func: &'a FunctionLit) -> TailCalls<'a> {
    if func.generator || func.params.iter().any(|p| p.name == name) {
        return TailCalls::default();
    }

    let mut analyzer = Analyzer {
        name,
        nesting: 0,
        shadowed: false,
        sites: Vec::new(),
    };
    analyzer.block(&func.body, true);

    if analyzer.shadowed {
        return TailCalls::default();
    }
    TailCalls {
        sites: analyzer.sites,
    }
}

struct Analyzer<'n, 'a> {
    name: &'n str,
    /// Statement containers entered below the function body. Only an
    /// expression statement directly in the body is returned implicitly.
    nesting: usize,
    shadowed: bool,
    sites: Vec<&'a Expr>,
}

impl<'a> Analyzer<'_, 'a> {
    fn binds(&mut self, name: &str) {
        if name == self.name {
            self.shadowed = true;
        }
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        self.nesting += 1;
        f(self);
        self.nesting -= 1;
    }

    fn block(&mut self, stmts: &'a [Stmt], terminal: bool) {
        let last = stmts.len().saturating_sub(1);
        for (i, stmt) in stmts.iter().enumerate() {
            self.stmt(stmt, terminal && i == last);
        }
    }

    fn stmt(&mut self, stmt: &'a Stmt, terminal: bool) {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                let returned = terminal && self.nesting == 0;
                self.expr(e, returned);
            }
            StmtKind::Var { name, init } => {
                self.binds(name);
                if let Some(init) = init {
                    self.expr(init, false);
                }
            }
            StmtKind::Block(body) => self.nested(|a| a.block(body, terminal)),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond, false);
                self.nested(|a| {
                    a.stmt(then_branch, terminal);
                    if let Some(else_branch) = else_branch {
                        a.stmt(else_branch, terminal);
                    }
                });
            }
            StmtKind::While { cond, body } => {
                self.expr(cond, false);
                self.nested(|a| a.stmt(body, false));
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.nested(|a| {
                if let Some(init) = init {
                    a.stmt(init, false);
                }
                if let Some(cond) = cond {
                    a.expr(cond, false);
                }
                if let Some(step) = step {
                    a.expr(step, false);
                }
                a.stmt(body, false);
            }),
            StmtKind::ForIn {
                name,
                iterable,
                body,
            } => {
                self.binds(name);
                self.expr(iterable, false);
                self.nested(|a| a.stmt(body, false));
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Return(None) => {}
            StmtKind::Return(Some(value)) => self.expr(value, true),
            StmtKind::Throw(value) => self.expr(value, false),
            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.nested(|a| {
                a.block(body, false);
                if let Some(catch) = catch {
                    a.binds(&catch.name);
                    a.block(&catch.body, false);
                }
                if let Some(finally) = finally {
                    a.block(finally, false);
                }
            }),
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => {
                self.expr(subject, false);
                self.nested(|a| {
                    for case in cases {
                        for value in &case.values {
                            a.expr(value, false);
                        }
                        a.block(&case.body, false);
                    }
                    if let Some(default) = default {
                        a.block(default, false);
                    }
                });
            }
            // Bodies are separate scopes and are not entered.
            StmtKind::Function { name, .. } | StmtKind::Namespace { name, .. } => {
                self.binds(name)
            }
            StmtKind::Class { name, parent, .. } => {
                self.binds(name);
                if let Some(parent) = parent {
                    self.expr(parent, false);
                }
            }
        }
    }

    fn args(&mut self, args: &'a [Arg]) {
        for arg in args {
            match arg {
                Arg::Positional(e) | Arg::Spread(e) | Arg::Named(_, e) => self.expr(e, false),
            }
        }
    }

    fn expr(&mut self, expr: &'a Expr, terminal: bool) {
        match &expr.kind {
            ExprKind::Call { callee, args } => {
                if terminal
                    && callee.as_ident() == Some(self.name)
                    && args.iter().all(|a| matches!(a, Arg::Positional(_)))
                {
                    self.sites.push(expr);
                }
                self.expr(callee, false);
                self.args(args);
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond, false);
                self.expr(then, terminal);
                self.expr(otherwise, terminal);
            }
            ExprKind::Case {
                subject,
                arms,
                default,
            } => {
                self.expr(subject, false);
                for arm in arms {
                    for value in &arm.values {
                        self.expr(value, false);
                    }
                    self.expr(&arm.result, terminal);
                }
                if let Some(default) = default {
                    self.expr(default, terminal);
                }
            }

            ExprKind::Literal(_) | ExprKind::Ident(_) | ExprKind::This => {}
            ExprKind::Function(_) => {}

            ExprKind::Assign { target, value } => {
                self.expr(target, false);
                self.expr(value, false);
            }
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                self.expr(lhs, false);
                self.expr(rhs, false);
            }
            ExprKind::Unary { operand, .. } => self.expr(operand, false),
            ExprKind::MethodCall { object, args, .. } => {
                self.expr(object, false);
                self.args(args);
            }
            ExprKind::Member { object, .. } => self.expr(object, false),
            ExprKind::Index { object, index } => {
                self.expr(object, false);
                self.expr(index, false);
            }
            ExprKind::Array(items) => {
                for item in items {
                    self.expr(item, false);
                }
            }
            ExprKind::Map(entries) => {
                for (key, value) in entries {
                    if let MapKey::Computed(key) = key {
                        self.expr(key, false);
                    }
                    self.expr(value, false);
                }
            }
            ExprKind::Yield(value) => {
                if let Some(value) = value {
                    self.expr(value, false);
                }
            }
        }
    }
}

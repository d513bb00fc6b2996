//! Terse constructors for syntax trees in tests.

use super::node::*;
use super::value::Value;

pub fn int(n: i64) -> Expr {
    Expr::new(1, ExprKind::Literal(Value::Integer(n)))
}

pub fn string(s: &str) -> Expr {
    Expr::new(1, ExprKind::Literal(Value::String(s.to_string())))
}

pub fn ident(name: &str) -> Expr {
    Expr::new(1, ExprKind::Ident(name.to_string()))
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        },
    )
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        1,
        ExprKind::Call {
            callee: Box::new(callee),
            args: args.into_iter().map(Arg::Positional).collect(),
        },
    )
}

pub fn call_args(callee: Expr, args: Vec<Arg>) -> Expr {
    Expr::new(
        1,
        ExprKind::Call {
            callee: Box::new(callee),
            args,
        },
    )
}

pub fn member(object: Expr, name: &str) -> Expr {
    Expr::new(
        1,
        ExprKind::Member {
            object: Box::new(object),
            name: name.to_string(),
        },
    )
}

pub fn func(params: &[&str], body: Vec<Stmt>) -> FunctionLit {
    FunctionLit {
        params: params
            .iter()
            .map(|p| Param {
                name: p.to_string(),
                default: None,
            })
            .collect(),
        variadic: false,
        generator: false,
        body,
    }
}

pub fn func_expr(params: &[&str], body: Vec<Stmt>) -> Expr {
    Expr::new(1, ExprKind::Function(Box::new(func(params, body))))
}

pub fn expr_stmt(e: Expr) -> Stmt {
    Stmt::new(e.line, StmtKind::Expr(e))
}

pub fn var(name: &str, init: Expr) -> Stmt {
    Stmt::new(
        1,
        StmtKind::Var {
            name: name.to_string(),
            init: Some(init),
        },
    )
}

pub fn ret(e: Expr) -> Stmt {
    Stmt::new(1, StmtKind::Return(Some(e)))
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::new(1, StmtKind::Block(stmts))
}

pub fn if_stmt(cond: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Stmt {
    Stmt::new(
        1,
        StmtKind::If {
            cond,
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        },
    )
}

pub fn while_stmt(cond: Expr, body: Stmt) -> Stmt {
    Stmt::new(
        1,
        StmtKind::While {
            cond,
            body: Box::new(body),
        },
    )
}

pub fn fn_decl(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    Stmt::new(
        1,
        StmtKind::Function {
            name: name.to_string(),
            func: Box::new(func(params, body)),
        },
    )
}

pub fn try_stmt(
    body: Vec<Stmt>,
    catch: Option<(&str, Vec<Stmt>)>,
    finally: Option<Vec<Stmt>>,
) -> Stmt {
    Stmt::new(
        1,
        StmtKind::Try {
            body,
            catch: catch.map(|(name, body)| CatchClause {
                name: name.to_string(),
                body,
            }),
            finally,
        },
    )
}

/// Give each statement its own line, starting at `first`.
pub fn lines(stmts: Vec<Stmt>, first: u32) -> Vec<Stmt> {
    stmts
        .into_iter()
        .enumerate()
        .map(|(i, mut s)| {
            s.line = first + i as u32;
            s
        })
        .collect()
}

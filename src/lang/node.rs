use super::value::Value;

/// Statement node. `line` is the 1-based source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

/// Expression node. `line` is the 1-based source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub line: u32,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    // ─────────────────────────── Simple statements ──────────────────────
    /// Expression evaluated for its side effects.
    Expr(Expr),

    /// `var name = init`
    Var { name: String, init: Option<Expr> },

    /// `{ ... }`: opens a lexical block.
    Block(Vec<Stmt>),

    // ──────────────────────────── Control flow ──────────────────────────
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While { cond: Expr, body: Box<Stmt> },

    /// `for (init; cond; step) body`
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },

    /// `for name in iterable body`
    ForIn {
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
    },

    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),

    /// `try { body } catch (name) { handler } finally { cleanup }`
    Try {
        body: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },

    /// `switch subject { case a, b: ... default: ... }`, no fall-through.
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Stmt>>,
    },

    // ──────────────────────────── Declarations ──────────────────────────
    /// `fn name(params) { body }`
    Function { name: String, func: Box<FunctionLit> },

    /// `class Name(parent) { body }`
    Class {
        name: String,
        parent: Option<Expr>,
        body: Vec<Stmt>,
    },

    /// `namespace Name { body }`
    Namespace { name: String, body: Vec<Stmt> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub name: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    // ───────────────────────────── Atoms ────────────────────────────────
    Literal(Value),
    Ident(String),
    This,

    /// `target = value`; target is an identifier, member or index.
    Assign { target: Box<Expr>, value: Box<Expr> },

    // ──────────────────────────── Operators ─────────────────────────────
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// Short-circuit `and` / `or`.
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Unary { op: UnaryOp, operand: Box<Expr> },

    // ──────────────────────────── Access ────────────────────────────────
    Call { callee: Box<Expr>, args: Vec<Arg> },

    /// `object.name(args)`
    MethodCall {
        object: Box<Expr>,
        name: String,
        args: Vec<Arg>,
    },

    /// `object.name`: `name` is a property name, never a variable.
    Member { object: Box<Expr>, name: String },

    Index { object: Box<Expr>, index: Box<Expr> },

    // ──────────────────────────── Constructors ──────────────────────────
    Array(Vec<Expr>),
    Map(Vec<(MapKey, Expr)>),
    Function(Box<FunctionLit>),

    // ──────────────────────────── Conditionals ──────────────────────────
    /// `cond ? then : otherwise`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    /// `case subject { a, b => r; else => d }`
    Case {
        subject: Box<Expr>,
        arms: Vec<CaseArm>,
        default: Option<Box<Expr>>,
    },

    /// `yield value`: only valid inside a generator.
    Yield(Option<Box<Expr>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub values: Vec<Expr>,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapKey {
    /// `{ name: v }`: bare identifier used as a string key.
    Name(String),
    /// `{ [expr]: v }`
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    /// `...expr`: expanded into several arguments at run time.
    Spread(Expr),
    /// `name: expr`
    Named(String, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Function literal. The last parameter collects extra arguments when
/// `variadic` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLit {
    pub params: Vec<Param>,
    pub variadic: bool,
    pub generator: bool,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl Stmt {
    pub fn new(line: u32, kind: StmtKind) -> Self {
        Stmt { line, kind }
    }
}

impl Expr {
    pub fn new(line: u32, kind: ExprKind) -> Self {
        Expr { line, kind }
    }

    /// Identifier text when this is a bare identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

impl StmtKind {
    /// Human-readable construct name for diagnostics.
    pub fn construct_name(&self) -> &'static str {
        match self {
            StmtKind::Expr(_) => "expression statement",
            StmtKind::Var { .. } => "var",
            StmtKind::Block(_) => "block",
            StmtKind::If { .. } => "if",
            StmtKind::While { .. } => "while",
            StmtKind::For { .. } => "for",
            StmtKind::ForIn { .. } => "for-in",
            StmtKind::Break => "break",
            StmtKind::Continue => "continue",
            StmtKind::Return(_) => "return",
            StmtKind::Throw(_) => "throw",
            StmtKind::Try { .. } => "try",
            StmtKind::Switch { .. } => "switch",
            StmtKind::Function { .. } => "fn",
            StmtKind::Class { .. } => "class",
            StmtKind::Namespace { .. } => "namespace",
        }
    }
}

impl ExprKind {
    pub fn construct_name(&self) -> &'static str {
        match self {
            ExprKind::Literal(_) => "literal",
            ExprKind::Ident(_) => "identifier",
            ExprKind::This => "this",
            ExprKind::Assign { .. } => "assignment",
            ExprKind::Binary { .. } => "binary operator",
            ExprKind::Logical { .. } => "logical operator",
            ExprKind::Unary { .. } => "unary operator",
            ExprKind::Call { .. } => "call",
            ExprKind::MethodCall { .. } => "method call",
            ExprKind::Member { .. } => "member access",
            ExprKind::Index { .. } => "index",
            ExprKind::Array(_) => "array literal",
            ExprKind::Map(_) => "map literal",
            ExprKind::Function(_) => "function literal",
            ExprKind::Conditional { .. } => "conditional",
            ExprKind::Case { .. } => "case",
            ExprKind::Yield(_) => "yield",
        }
    }
}

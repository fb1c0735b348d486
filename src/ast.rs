//! Abstract syntax consumed by the evaluator.
//!
//! The parser is an external collaborator: it hands this tree over fully
//! built, and nothing in it is mutated during evaluation. Shared subtrees
//! are `Rc`'d so thunks can capture them without copying.

use std::cmp::Ordering;
use std::rc::Rc;

pub type Name = String;

// ============================================================================
// Atoms
// ============================================================================

/// A primitive scalar literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Int(i64),
    Bool(bool),
    Null,
    /// An unquoted URI literal. There is no separate URI type at runtime;
    /// the lexical shape is kept so values can round-trip through a renderer.
    Uri(String),
}

impl Atom {
    pub fn type_name(&self) -> &'static str {
        match self {
            Atom::Int(_) => "int",
            Atom::Bool(_) => "bool",
            Atom::Null => "null",
            Atom::Uri(_) => "uri",
        }
    }

    /// Order two atoms of the same kind. Atoms of distinct kinds are
    /// incomparable and yield `None`; the caller turns that into a type
    /// error.
    pub fn same_kind_cmp(&self, other: &Atom) -> Option<Ordering> {
        match (self, other) {
            (Atom::Int(a), Atom::Int(b)) => Some(a.cmp(b)),
            (Atom::Bool(a), Atom::Bool(b)) => Some(a.cmp(b)),
            (Atom::Uri(a), Atom::Uri(b)) => Some(a.cmp(b)),
            (Atom::Null, Atom::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// One piece of an interpolated string literal.
#[derive(Debug, Clone)]
pub enum StrPart {
    /// A verbatim text fragment. Contributes no context.
    Lit(String),
    /// An antiquotation: the expression is forced and coerced to text when
    /// the string is evaluated.
    Interp(Rc<Expr>),
}

/// One component of an attribute path, as written: either a literal name or
/// an antiquoted expression producing one.
#[derive(Debug, Clone)]
pub enum KeyPart {
    Static(Name),
    Dynamic(Rc<Expr>),
}

/// An attribute path: a non-empty sequence of key components.
pub type AttrPath = Vec<KeyPart>;

/// A single binding inside `{ ... }`, `rec { ... }` or `let ... in`.
#[derive(Debug, Clone)]
pub enum Binding {
    /// `a.b.c = expr;`; a path of length > 1 builds nested sets.
    Value { path: AttrPath, value: Rc<Expr> },
    /// `inherit a b;` or `inherit (src) a b;`.
    Inherit {
        from: Option<Rc<Expr>>,
        names: Vec<Name>,
    },
}

/// A declared formal parameter in a set pattern, e.g. `x` or `y ? e`.
#[derive(Debug, Clone)]
pub struct Formal {
    pub name: Name,
    pub default: Option<Rc<Expr>>,
}

/// The parameter shape of a function.
#[derive(Debug, Clone)]
pub enum Params {
    /// `x: body`: one identifier receives the whole argument.
    Named(Name),
    /// `{ a, b ? e, ... } @ self: body`. With `ellipsis` the pattern accepts
    /// (and passes through) keys beyond the declared formals; without it,
    /// extra keys are an error. `bound` is the optional `@`-name for the
    /// whole argument set.
    Set {
        formals: Vec<Formal>,
        ellipsis: bool,
        bound: Option<Name>,
    },
}

impl Params {
    /// Every name the parameter shape brings into scope in the body.
    pub fn declared_names(&self) -> Vec<&Name> {
        match self {
            Params::Named(n) => vec![n],
            Params::Set { formals, bound, .. } => {
                let mut names: Vec<&Name> = formals.iter().map(|f| &f.name).collect();
                if let Some(b) = bound {
                    names.push(b);
                }
                names
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Comparison (atoms only)
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Boolean
    And,
    Or,
    /// Logical implication: `a -> b` is `!a || b`.
    Impl,
    // Arithmetic; `Add` doubles as string/path concatenation
    Add,
    Sub,
    Mul,
    Div,
    /// Right-biased shallow attribute-set merge: `//`.
    Update,
    /// List concatenation: `++`.
    Concat,
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// A scalar constant.
    Const(Atom),

    /// A string literal with interpolation, in fragment order.
    Str(Vec<StrPart>),

    /// A filesystem path literal. Canonicalization is deferred to whoever
    /// finally opens it.
    Path(String),

    /// A lookup-path literal like `<nixpkgs>`, resolved by a collaborator
    /// when a real path is demanded.
    LookupPath(String),

    /// Variable reference.
    Var(Name),

    /// `[ a b c ]`; elements stay unevaluated until demanded.
    List(Vec<Rc<Expr>>),

    /// `{ ... }`; right-hand sides see the surrounding scope only.
    Set(Vec<Binding>),

    /// `rec { ... }`; right-hand sides see all sibling bindings.
    RecSet(Vec<Binding>),

    /// `let ... in body`; bindings are recursive, like `rec { }`.
    Let {
        bindings: Vec<Binding>,
        body: Rc<Expr>,
    },

    If {
        cond: Rc<Expr>,
        then_branch: Rc<Expr>,
        else_branch: Rc<Expr>,
    },

    /// `with env; body`.
    With { env: Rc<Expr>, body: Rc<Expr> },

    /// `assert cond; body`.
    Assert { cond: Rc<Expr>, body: Rc<Expr> },

    App { fun: Rc<Expr>, arg: Rc<Expr> },

    Lambda { params: Rc<Params>, body: Rc<Expr> },

    Unary { op: UnaryOp, operand: Rc<Expr> },

    Binary {
        op: BinOp,
        lhs: Rc<Expr>,
        rhs: Rc<Expr>,
    },

    /// `set.a.b` with an optional `or fallback`.
    Select {
        set: Rc<Expr>,
        path: AttrPath,
        fallback: Option<Rc<Expr>>,
    },

    /// `set ? a`; a membership test. Only single-component paths are legal.
    HasAttr { set: Rc<Expr>, path: AttrPath },
}

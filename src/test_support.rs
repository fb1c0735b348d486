//! Test support: expression builders and evaluation harnesses.
//!
//! The parser is an external collaborator, so tests build trees directly.
//! The builders keep that terse: `let_in(vec![attr("x", int(1))], var("x"))`
//! reads close to the surface syntax it stands for. Also here: instrumented
//! builtins for observing forcing behavior, and a ready-made `import`
//! primitive wired to the session importer.

use std::cell::Cell;
use std::rc::Rc;

use crate::ast::{
    Atom, AttrPath, BinOp, Binding, Expr, Formal, KeyPart, Params, StrPart, UnaryOp,
};
use crate::errors::EvalError;
use crate::eval::Evaluator;
use crate::scope::Scope;
use crate::thunk::Thunk;
use crate::value::{Attrs, Builtin, NormalValue, Value};

// ============================================================================
// Expression builders
// ============================================================================

pub fn int(n: i64) -> Rc<Expr> {
    Rc::new(Expr::Const(Atom::Int(n)))
}

pub fn bool_(b: bool) -> Rc<Expr> {
    Rc::new(Expr::Const(Atom::Bool(b)))
}

pub fn null() -> Rc<Expr> {
    Rc::new(Expr::Const(Atom::Null))
}

pub fn uri(u: &str) -> Rc<Expr> {
    Rc::new(Expr::Const(Atom::Uri(u.into())))
}

/// A plain string literal with no interpolation.
pub fn str_(text: &str) -> Rc<Expr> {
    Rc::new(Expr::Str(vec![StrPart::Lit(text.into())]))
}

/// An interpolated string from explicit parts.
pub fn str_parts(parts: Vec<StrPart>) -> Rc<Expr> {
    Rc::new(Expr::Str(parts))
}

pub fn lit(text: &str) -> StrPart {
    StrPart::Lit(text.into())
}

pub fn interp(e: Rc<Expr>) -> StrPart {
    StrPart::Interp(e)
}

pub fn path_(p: &str) -> Rc<Expr> {
    Rc::new(Expr::Path(p.into()))
}

pub fn lookup_path(p: &str) -> Rc<Expr> {
    Rc::new(Expr::LookupPath(p.into()))
}

pub fn var(name: &str) -> Rc<Expr> {
    Rc::new(Expr::Var(name.into()))
}

pub fn list(xs: Vec<Rc<Expr>>) -> Rc<Expr> {
    Rc::new(Expr::List(xs))
}

pub fn set(bindings: Vec<Binding>) -> Rc<Expr> {
    Rc::new(Expr::Set(bindings))
}

pub fn rec_set(bindings: Vec<Binding>) -> Rc<Expr> {
    Rc::new(Expr::RecSet(bindings))
}

pub fn let_in(bindings: Vec<Binding>, body: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::Let { bindings, body })
}

pub fn if_(cond: Rc<Expr>, then_branch: Rc<Expr>, else_branch: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::If {
        cond,
        then_branch,
        else_branch,
    })
}

pub fn with(env: Rc<Expr>, body: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::With { env, body })
}

pub fn assert_(cond: Rc<Expr>, body: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::Assert { cond, body })
}

pub fn app(fun: Rc<Expr>, arg: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::App { fun, arg })
}

pub fn unary(op: UnaryOp, operand: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::Unary { op, operand })
}

pub fn binary(op: BinOp, lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::Binary { op, lhs, rhs })
}

/// `x: body`.
pub fn lambda_named(param: &str, body: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::Lambda {
        params: Rc::new(Params::Named(param.into())),
        body,
    })
}

/// `{ a, b ? e, ... } @ bound: body`.
pub fn lambda_set(
    formals: Vec<Formal>,
    ellipsis: bool,
    bound: Option<&str>,
    body: Rc<Expr>,
) -> Rc<Expr> {
    Rc::new(Expr::Lambda {
        params: Rc::new(Params::Set {
            formals,
            ellipsis,
            bound: bound.map(|s| s.to_string()),
        }),
        body,
    })
}

pub fn formal(name: &str) -> Formal {
    Formal {
        name: name.into(),
        default: None,
    }
}

pub fn formal_default(name: &str, default: Rc<Expr>) -> Formal {
    Formal {
        name: name.into(),
        default: Some(default),
    }
}

/// Split `"a.b.c"` into a static attribute path.
pub fn attr_path(dotted: &str) -> AttrPath {
    dotted
        .split('.')
        .map(|p| KeyPart::Static(p.to_string()))
        .collect()
}

/// `a.b.c = value;` with a static path.
pub fn attr(dotted: &str, value: Rc<Expr>) -> Binding {
    Binding::Value {
        path: attr_path(dotted),
        value,
    }
}

/// `${key} = value;` with a single dynamic key.
pub fn attr_dyn(key: Rc<Expr>, value: Rc<Expr>) -> Binding {
    Binding::Value {
        path: vec![KeyPart::Dynamic(key)],
        value,
    }
}

/// `inherit a b;`
pub fn inherit(names: &[&str]) -> Binding {
    Binding::Inherit {
        from: None,
        names: names.iter().map(|s| s.to_string()).collect(),
    }
}

/// `inherit (src) a b;`
pub fn inherit_from(src: Rc<Expr>, names: &[&str]) -> Binding {
    Binding::Inherit {
        from: Some(src),
        names: names.iter().map(|s| s.to_string()).collect(),
    }
}

/// `set.a.b` with a static path.
pub fn select(set: Rc<Expr>, dotted: &str) -> Rc<Expr> {
    Rc::new(Expr::Select {
        set,
        path: attr_path(dotted),
        fallback: None,
    })
}

/// `set.a.b or fallback`.
pub fn select_or(set: Rc<Expr>, dotted: &str, fallback: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::Select {
        set,
        path: attr_path(dotted),
        fallback: Some(fallback),
    })
}

/// `set.${key}`.
pub fn select_dyn(set: Rc<Expr>, key: Rc<Expr>) -> Rc<Expr> {
    Rc::new(Expr::Select {
        set,
        path: vec![KeyPart::Dynamic(key)],
        fallback: None,
    })
}

/// `set ? name`.
pub fn has_attr(set: Rc<Expr>, name: &str) -> Rc<Expr> {
    Rc::new(Expr::HasAttr {
        set,
        path: attr_path(name),
    })
}

// ============================================================================
// Evaluation harnesses
// ============================================================================

/// Evaluate and normalize under an empty toplevel.
pub fn try_eval(expr: Rc<Expr>) -> Result<NormalValue, EvalError> {
    Evaluator::new().run(expr)
}

pub fn eval_ok(expr: Rc<Expr>) -> NormalValue {
    match try_eval(expr) {
        Ok(v) => v,
        Err(e) => panic!("evaluation failed: {}", e),
    }
}

pub fn eval_err(expr: Rc<Expr>) -> EvalError {
    match try_eval(expr) {
        Ok(v) => panic!("evaluation unexpectedly produced {}", v),
        Err(e) => e,
    }
}

/// A toplevel scope exposing the given named values.
pub fn scope_of(values: Vec<(&str, Value)>) -> Scope {
    let attrs: Attrs = values
        .into_iter()
        .map(|(k, v)| (k.to_string(), Thunk::of_value(v)))
        .collect();
    Scope::root().push(Rc::new(attrs))
}

/// Shorthand for the common "int result" assertion.
pub fn assert_int(expr: Rc<Expr>, expected: i64) {
    assert_eq!(eval_ok(expr), NormalValue::Const(Atom::Int(expected)));
}

// ============================================================================
// Instrumented builtins
// ============================================================================

/// A builtin that bumps a counter every time it runs, then behaves as the
/// identity function. Memoization tests force its application repeatedly
/// and read the counter.
pub fn counting_builtin(name: &str) -> (Builtin, Rc<Cell<usize>>) {
    let counter = Rc::new(Cell::new(0));
    let seen = counter.clone();
    let builtin = Builtin::new(name, move |_ev, arg| {
        seen.set(seen.get() + 1);
        Ok(arg)
    });
    (builtin, counter)
}

/// The classic `import` primitive, wired to the session's importer.
pub fn import_builtin() -> Builtin {
    Builtin::new("import", |ev, arg| ev.import_file(&arg))
}

/// A two-argument `add` primitive, curried at construction the way the
/// builtin ABI prescribes.
pub fn add_builtin() -> Builtin {
    Builtin::new("add", |ev, a| {
        let lhs = ev.force(&a)?;
        Ok(Thunk::of_value(Value::Builtin(Builtin::new(
            "add'",
            move |ev, b| {
                let rhs = ev.force(&b)?;
                match (&lhs, &rhs) {
                    (Value::Const(Atom::Int(x)), Value::Const(Atom::Int(y))) => {
                        Ok(Thunk::of_value(Value::int(x + y)))
                    }
                    (l, r) => Err(EvalError::type_error(format!(
                        "add expects two ints, got {} and {}",
                        l.type_name(),
                        r.type_name()
                    ))),
                }
            },
        ))))
    })
}

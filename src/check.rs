//! Static free-variable check.
//!
//! A second traversal over the tree verifying that every variable reference
//! resolves under some scope, without computing anything: every binding is
//! represented by a null placeholder thunk in an ordinary scope frame. This
//! is deliberately a weak lint, not a type checker; operators and
//! applications are only descended into, never judged.

use std::rc::Rc;

use crate::ast::{Atom, Binding, Expr, KeyPart, Name, StrPart};
use crate::errors::{similar_names, EvalError};
use crate::scope::Scope;
use crate::thunk::Thunk;
use crate::value::{Attrs, Value};

/// Verify that every free variable in `expr` resolves under `scope`.
pub fn check(expr: &Expr, scope: &Scope) -> Result<(), EvalError> {
    check_expr(expr, scope, false)
}

fn null_val() -> Thunk {
    Thunk::of_value(Value::Const(Atom::Null))
}

fn null_frame(names: impl IntoIterator<Item = Name>) -> Rc<Attrs> {
    Rc::new(names.into_iter().map(|n| (n, null_val())).collect())
}

/// The names a group of bindings introduces: the first static key of each
/// path binding, plus every inherited name. A dynamic first key cannot bind
/// a variable statically and is skipped.
fn binding_names(bindings: &[Binding]) -> Vec<Name> {
    let mut names = Vec::new();
    for b in bindings {
        match b {
            Binding::Value { path, .. } => {
                if let Some(KeyPart::Static(n)) = path.first() {
                    names.push(n.clone());
                }
            }
            Binding::Inherit { names: ns, .. } => names.extend(ns.iter().cloned()),
        }
    }
    names
}

fn undefined(name: &Name, scope: &Scope) -> EvalError {
    EvalError::UndefinedVariable {
        name: name.clone(),
        suggestions: similar_names(name, &scope.visible_names()),
    }
}

fn check_expr(expr: &Expr, scope: &Scope, in_with: bool) -> Result<(), EvalError> {
    match expr {
        Expr::Var(name) => {
            if in_with || scope.lookup_static(name).is_some() {
                Ok(())
            } else {
                Err(undefined(name, scope))
            }
        }

        Expr::Const(_) | Expr::Path(_) | Expr::LookupPath(_) => Ok(()),

        Expr::Str(parts) => {
            for part in parts {
                if let StrPart::Interp(e) = part {
                    check_expr(e, scope, in_with)?;
                }
            }
            Ok(())
        }

        Expr::List(xs) => xs.iter().try_for_each(|e| check_expr(e, scope, in_with)),

        Expr::Set(bindings) => check_bindings(bindings, scope, scope, in_with),

        Expr::RecSet(bindings) => {
            let inner = scope.push(null_frame(binding_names(bindings)));
            check_bindings(bindings, &inner, scope, in_with)
        }

        Expr::Let { bindings, body } => {
            let inner = scope.push(null_frame(binding_names(bindings)));
            check_bindings(bindings, &inner, scope, in_with)?;
            check_expr(body, &inner, in_with)
        }

        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            check_expr(cond, scope, in_with)?;
            check_expr(then_branch, scope, in_with)?;
            check_expr(else_branch, scope, in_with)
        }

        // Anything at all may be bound inside the `with` body; misses there
        // can only be found at runtime.
        Expr::With { env, body } => {
            check_expr(env, scope, in_with)?;
            check_expr(body, scope, true)
        }

        Expr::Assert { cond, body } => {
            check_expr(cond, scope, in_with)?;
            check_expr(body, scope, in_with)
        }

        Expr::App { fun, arg } => {
            check_expr(fun, scope, in_with)?;
            check_expr(arg, scope, in_with)
        }

        Expr::Lambda { params, body } => {
            let frame = null_frame(params.declared_names().into_iter().cloned());
            let inner = scope.push(frame);
            // Defaults see every sibling parameter, so they are checked
            // under the same frame as the body.
            if let crate::ast::Params::Set { formals, .. } = &**params {
                for formal in formals {
                    if let Some(default) = &formal.default {
                        check_expr(default, &inner, in_with)?;
                    }
                }
            }
            check_expr(body, &inner, in_with)
        }

        Expr::Unary { operand, .. } => check_expr(operand, scope, in_with),

        Expr::Binary { lhs, rhs, .. } => {
            check_expr(lhs, scope, in_with)?;
            check_expr(rhs, scope, in_with)
        }

        Expr::Select {
            set,
            path,
            fallback,
        } => {
            check_expr(set, scope, in_with)?;
            check_path(path, scope, in_with)?;
            match fallback {
                Some(e) => check_expr(e, scope, in_with),
                None => Ok(()),
            }
        }

        Expr::HasAttr { set, path } => {
            check_expr(set, scope, in_with)?;
            check_path(path, scope, in_with)
        }
    }
}

fn check_path(path: &[KeyPart], scope: &Scope, in_with: bool) -> Result<(), EvalError> {
    for part in path {
        if let KeyPart::Dynamic(e) = part {
            check_expr(e, scope, in_with)?;
        }
    }
    Ok(())
}

fn check_bindings(
    bindings: &[Binding],
    rhs_scope: &Scope,
    key_scope: &Scope,
    in_with: bool,
) -> Result<(), EvalError> {
    for b in bindings {
        match b {
            Binding::Value { path, value } => {
                // Keys are chosen under the outer scope even in `rec` sets.
                check_path(path, key_scope, in_with)?;
                check_expr(value, rhs_scope, in_with)?;
            }
            Binding::Inherit { from, names } => match from {
                Some(src) => check_expr(src, key_scope, in_with)?,
                None => {
                    for n in names {
                        if !in_with && key_scope.lookup_static(n).is_none() {
                            return Err(undefined(n, key_scope));
                        }
                    }
                }
            },
        }
    }
    Ok(())
}

//! Attribute-path machinery.
//!
//! Two pieces live here: evaluating a written attribute path (whose
//! components may be antiquotations) down to concrete names, and `alter`,
//! the single functional-update primitive every nested-path binding goes
//! through.

use std::rc::Rc;

use crate::ast::{AttrPath, KeyPart, Name};
use crate::errors::EvalError;
use crate::eval::Evaluator;
use crate::scope::Scope;
use crate::thunk::Thunk;
use crate::value::{Attrs, Value};

/// Evaluate the components of an attribute path to concrete names.
///
/// Dynamic components force their expression and coerce the result to a
/// context-free string. When `allow_dynamic` is false, meeting one is an
/// error instead.
pub fn eval_selector(
    ev: &mut Evaluator,
    path: &AttrPath,
    scope: &Scope,
    allow_dynamic: bool,
) -> Result<Vec<Name>, EvalError> {
    path.iter()
        .map(|part| match part {
            KeyPart::Static(n) => Ok(n.clone()),
            KeyPart::Dynamic(e) => {
                if !allow_dynamic {
                    return Err(EvalError::DynamicKeyNotAllowed);
                }
                let v = ev.eval(e, scope)?;
                let s = ev.coerce_to_string(&v)?;
                if !s.context.is_empty() {
                    return Err(EvalError::type_error(
                        "an attribute key may not carry string context",
                    ));
                }
                Ok(s.text)
            }
        })
        .collect()
}

/// Functionally update `set` at `path`.
///
/// `f` receives the current thunk at the path, if any; returning `Some`
/// stores the replacement, returning `None` removes (or leaves absent).
/// Intermediate keys are created as needed, but an intermediate set created
/// for nothing is not inserted. An existing intermediate that forces to
/// anything but a set is an error naming the offending prefix.
///
/// The path must be non-empty; an empty path is a bug in the caller.
pub fn alter(
    ev: &mut Evaluator,
    set: &Attrs,
    path: &[Name],
    f: impl FnOnce(Option<Thunk>) -> Option<Thunk>,
) -> Result<Attrs, EvalError> {
    assert!(!path.is_empty(), "alter requires a non-empty attribute path");
    alter_at(ev, set, path, 0, f)
}

fn alter_at(
    ev: &mut Evaluator,
    set: &Attrs,
    path: &[Name],
    depth: usize,
    f: impl FnOnce(Option<Thunk>) -> Option<Thunk>,
) -> Result<Attrs, EvalError> {
    let key = &path[depth];
    let mut out = set.clone();

    if depth == path.len() - 1 {
        match f(set.get(key).cloned()) {
            Some(v) => {
                out.insert(key.clone(), v);
            }
            None => {
                out.remove(key);
            }
        }
        return Ok(out);
    }

    let inner = match set.get(key) {
        None => Attrs::new(),
        Some(t) => match t.force(ev)? {
            Value::Set(attrs) => (*attrs).clone(),
            _ => return Err(EvalError::NotASet(path[..=depth].to_vec())),
        },
    };

    let updated = alter_at(ev, &inner, path, depth + 1, f)?;
    if set.contains_key(key) || !updated.is_empty() {
        out.insert(key.clone(), Thunk::of_value(Value::Set(Rc::new(updated))));
    }
    Ok(out)
}

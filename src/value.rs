//! Runtime values.
//!
//! `Value` is the head-normal form: the outermost constructor is known, but
//! children may still be unforced thunks. `NormalValue` is the fully forced
//! tree the normalizer produces; it is what renderers consume.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::ast::{Atom, Expr, Name, Params};
use crate::errors::EvalError;
use crate::eval::Evaluator;
use crate::scope::Scope;
use crate::thunk::Thunk;

/// The attribute mapping of a set. A `BTreeMap` keeps keys unique and makes
/// iteration order the sorted key order renderers require.
pub type Attrs = BTreeMap<Name, Thunk>;

// ============================================================================
// Strings with context
// ============================================================================

/// A string together with its provenance context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StrVal {
    pub text: String,
    pub context: BTreeSet<String>,
}

impl StrVal {
    pub fn plain(text: impl Into<String>) -> Self {
        StrVal {
            text: text.into(),
            context: BTreeSet::new(),
        }
    }

    pub fn with_context(text: impl Into<String>, context: BTreeSet<String>) -> Self {
        StrVal {
            text: text.into(),
            context,
        }
    }

    /// Concatenation is monoidal in both components: text appends, context
    /// unions.
    pub fn concat(&self, other: &StrVal) -> StrVal {
        let mut text = String::with_capacity(self.text.len() + other.text.len());
        text.push_str(&self.text);
        text.push_str(&other.text);
        let mut context = self.context.clone();
        context.extend(other.context.iter().cloned());
        StrVal { text, context }
    }
}

// ============================================================================
// Head-normal values
// ============================================================================

/// The value a thunk forces to.
#[derive(Debug, Clone)]
pub enum Value {
    /// A scalar.
    Const(Atom),

    /// A string with context.
    Str(StrVal),

    /// A filesystem path, textual and uncanonicalized.
    Path(String),

    /// A `<name>` lookup path, resolved by a collaborator when a real path
    /// is demanded.
    LookupPath(String),

    /// A list of lazy elements.
    List(Rc<Vec<Thunk>>),

    /// An attribute set of lazy values.
    Set(Rc<Attrs>),

    /// A function closed over its definition site.
    Lambda(Closure),

    /// An opaque primitive. Never further reducible.
    Builtin(Builtin),
}

impl Value {
    pub fn bool(b: bool) -> Self {
        Value::Const(Atom::Bool(b))
    }

    pub fn int(n: i64) -> Self {
        Value::Const(Atom::Int(n))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Const(a) => a.type_name(),
            Value::Str(_) => "string",
            Value::Path(_) => "path",
            Value::LookupPath(_) => "lookup path",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Lambda(_) => "lambda",
            Value::Builtin(_) => "builtin",
        }
    }
}

/// A function value: parameter shape and body, closed over the scope where
/// the lambda was written. Call-site scopes are never consulted, not even
/// for default expressions.
#[derive(Clone)]
pub struct Closure {
    pub params: Rc<Params>,
    pub body: Rc<Expr>,
    pub scope: Scope,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<lambda>")
    }
}

type BuiltinFn = dyn Fn(&mut Evaluator, Thunk) -> Result<Thunk, EvalError>;

/// A named primitive taking one argument, unforced. Multi-argument
/// primitives curry by returning another `Builtin` from the first call.
#[derive(Clone)]
pub struct Builtin {
    name: Rc<str>,
    apply: Rc<BuiltinFn>,
}

impl Builtin {
    pub fn new(
        name: &str,
        f: impl Fn(&mut Evaluator, Thunk) -> Result<Thunk, EvalError> + 'static,
    ) -> Self {
        Builtin {
            name: name.into(),
            apply: Rc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, ev: &mut Evaluator, arg: Thunk) -> Result<Thunk, EvalError> {
        (self.apply)(ev, arg)
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin:{}>", self.name)
    }
}

// ============================================================================
// Normal-form values
// ============================================================================

/// A value in which every recursive slot has itself been forced. Functions
/// and builtins are opaque: they normalize to themselves.
#[derive(Debug, Clone)]
pub enum NormalValue {
    Const(Atom),
    Str(StrVal),
    Path(String),
    LookupPath(String),
    List(Vec<NormalValue>),
    Set(BTreeMap<Name, NormalValue>),
    Lambda(Closure),
    Builtin(Builtin),
}

impl NormalValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            NormalValue::Const(a) => a.type_name(),
            NormalValue::Str(_) => "string",
            NormalValue::Path(_) => "path",
            NormalValue::LookupPath(_) => "lookup path",
            NormalValue::List(_) => "list",
            NormalValue::Set(_) => "set",
            NormalValue::Lambda(_) => "lambda",
            NormalValue::Builtin(_) => "builtin",
        }
    }
}

impl PartialEq for NormalValue {
    /// Structural equality on data. Functions and builtins compare unequal
    /// to everything, themselves included.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NormalValue::Const(a), NormalValue::Const(b)) => a == b,
            (NormalValue::Str(a), NormalValue::Str(b)) => a == b,
            (NormalValue::Path(a), NormalValue::Path(b)) => a == b,
            (NormalValue::LookupPath(a), NormalValue::LookupPath(b)) => a == b,
            (NormalValue::List(a), NormalValue::List(b)) => a == b,
            (NormalValue::Set(a), NormalValue::Set(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for NormalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalValue::Const(Atom::Int(n)) => write!(f, "{}", n),
            NormalValue::Const(Atom::Bool(b)) => write!(f, "{}", b),
            NormalValue::Const(Atom::Null) => write!(f, "null"),
            NormalValue::Const(Atom::Uri(u)) => write!(f, "{}", u),
            NormalValue::Str(s) => {
                write!(
                    f,
                    "\"{}\"",
                    s.text
                        .replace('\\', "\\\\")
                        .replace('"', "\\\"")
                        .replace('\n', "\\n")
                )
            }
            NormalValue::Path(p) => write!(f, "{}", p),
            NormalValue::LookupPath(p) => write!(f, "<{}>", p),
            NormalValue::List(xs) => {
                if xs.is_empty() {
                    return write!(f, "[ ]");
                }
                write!(f, "[")?;
                for x in xs {
                    write!(f, " {}", x)?;
                }
                write!(f, " ]")
            }
            NormalValue::Set(attrs) => {
                if attrs.is_empty() {
                    return write!(f, "{{ }}");
                }
                write!(f, "{{")?;
                for (k, v) in attrs {
                    write!(f, " {} = {};", k, v)?;
                }
                write!(f, " }}")
            }
            NormalValue::Lambda(_) => write!(f, "«lambda»"),
            NormalValue::Builtin(b) => write!(f, "«builtin:{}»", b.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_concat_is_monoidal() {
        let a = StrVal::with_context("foo", ["ctx-a".to_string()].into());
        let b = StrVal::with_context("bar", ["ctx-b".to_string()].into());
        let ab = a.concat(&b);
        assert_eq!(ab.text, "foobar");
        assert!(ab.context.contains("ctx-a") && ab.context.contains("ctx-b"));

        let empty = StrVal::default();
        assert_eq!(a.concat(&empty), a);
        assert_eq!(empty.concat(&a), a);
    }

    #[test]
    fn set_display_iterates_sorted_keys() {
        let mut attrs = BTreeMap::new();
        attrs.insert("zebra".to_string(), NormalValue::Const(Atom::Int(1)));
        attrs.insert("apple".to_string(), NormalValue::Const(Atom::Int(2)));
        let v = NormalValue::Set(attrs);
        assert_eq!(v.to_string(), "{ apple = 2; zebra = 1; }");
    }

    #[test]
    fn list_display_preserves_order() {
        let v = NormalValue::List(vec![
            NormalValue::Const(Atom::Int(3)),
            NormalValue::Const(Atom::Int(1)),
            NormalValue::Const(Atom::Int(2)),
        ]);
        assert_eq!(v.to_string(), "[ 3 1 2 ]");
    }

    #[test]
    fn string_display_escapes() {
        let v = NormalValue::Str(StrVal::plain("a\"b\\c"));
        assert_eq!(v.to_string(), r#""a\"b\\c""#);
    }
}

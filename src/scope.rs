//! The scope stack consulted by variable lookup.
//!
//! Scopes form a persistent chain: pushing builds a new head that shares its
//! tail, so closures capture their definition environment by cloning a
//! handle, and "popping" is simply returning to the caller's handle. That
//! makes the restore-on-every-exit-path discipline hold by construction.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::ast::Name;
use crate::errors::EvalError;
use crate::eval::Evaluator;
use crate::thunk::Thunk;
use crate::value::Attrs;

#[derive(Clone, Default)]
pub struct Scope(Option<Rc<Frame>>);

struct Frame {
    binds: Binds,
    parent: Scope,
}

enum Binds {
    /// Ordinary lexical bindings: function parameters, checker scopes.
    Lexical(Rc<Attrs>),
    /// Lexical-priority bindings hidden behind a thunk; how `let` bodies and
    /// recursive-set knots enter the chain.
    Deferred(Thunk),
    /// A `with` frame. Consulted only after every lexical frame.
    With(Thunk),
}

impl Scope {
    /// The empty scope.
    pub fn root() -> Scope {
        Scope(None)
    }

    pub fn push(&self, attrs: Rc<Attrs>) -> Scope {
        self.extend(Binds::Lexical(attrs))
    }

    pub fn push_deferred(&self, set: Thunk) -> Scope {
        self.extend(Binds::Deferred(set))
    }

    pub fn push_with(&self, set: Thunk) -> Scope {
        self.extend(Binds::With(set))
    }

    fn extend(&self, binds: Binds) -> Scope {
        Scope(Some(Rc::new(Frame {
            binds,
            parent: self.clone(),
        })))
    }

    /// Top-down search: the first hit wins. All lexical frames are consulted
    /// before any `with` frame; among `with` frames the innermost wins.
    /// Deferred frames force their backing set, so lookup can fail.
    pub fn lookup(&self, ev: &mut Evaluator, name: &str) -> Result<Option<Thunk>, EvalError> {
        let mut cur = self.0.clone();
        while let Some(frame) = cur {
            match &frame.binds {
                Binds::Lexical(attrs) => {
                    if let Some(t) = attrs.get(name) {
                        return Ok(Some(t.clone()));
                    }
                }
                Binds::Deferred(set) => {
                    if let Some(t) = ev.force_set(set)?.get(name) {
                        return Ok(Some(t.clone()));
                    }
                }
                Binds::With(_) => {}
            }
            cur = frame.parent.0.clone();
        }

        let mut cur = self.0.clone();
        while let Some(frame) = cur {
            if let Binds::With(set) = &frame.binds {
                if let Some(t) = ev.force_set(set)?.get(name) {
                    return Ok(Some(t.clone()));
                }
            }
            cur = frame.parent.0.clone();
        }

        Ok(None)
    }

    /// Search only bindings that are statically known, forcing nothing.
    /// This is all the static checker needs: its frames are plain lexical
    /// maps of placeholder thunks.
    pub fn lookup_static(&self, name: &str) -> Option<Thunk> {
        let mut cur = self.0.clone();
        while let Some(frame) = cur {
            if let Binds::Lexical(attrs) = &frame.binds {
                if let Some(t) = attrs.get(name) {
                    return Some(t.clone());
                }
            }
            cur = frame.parent.0.clone();
        }
        None
    }

    /// Every name reachable without forcing anything: lexical frames, plus
    /// deferred and `with` sets that happen to be forced already. Used for
    /// "did you mean?" suggestions.
    pub fn visible_names(&self) -> Vec<Name> {
        use crate::value::Value;

        let mut names = BTreeSet::new();
        let mut cur = self.0.clone();
        while let Some(frame) = cur {
            match &frame.binds {
                Binds::Lexical(attrs) => names.extend(attrs.keys().cloned()),
                Binds::Deferred(set) | Binds::With(set) => {
                    if let Some(Value::Set(attrs)) = set.peek() {
                        names.extend(attrs.keys().cloned());
                    }
                }
            }
            cur = frame.parent.0.clone();
        }
        names.into_iter().collect()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut cur = self.0.clone();
        while let Some(frame) = cur {
            depth += 1;
            cur = frame.parent.0.clone();
        }
        write!(f, "<scope:{} frames>", depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Atom;
    use crate::value::Value;

    fn attrs(pairs: &[(&str, i64)]) -> Rc<Attrs> {
        Rc::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Thunk::of_value(Value::int(*v))))
                .collect(),
        )
    }

    fn lookup_int(scope: &Scope, name: &str) -> Option<i64> {
        let mut ev = Evaluator::new();
        match scope.lookup(&mut ev, name).unwrap() {
            Some(t) => match t.force(&mut ev).unwrap() {
                Value::Const(Atom::Int(n)) => Some(n),
                v => panic!("expected int, got {}", v.type_name()),
            },
            None => None,
        }
    }

    #[test]
    fn inner_lexical_frame_shadows_outer() {
        let scope = Scope::root()
            .push(attrs(&[("x", 1), ("y", 10)]))
            .push(attrs(&[("x", 2)]));
        assert_eq!(lookup_int(&scope, "x"), Some(2));
        assert_eq!(lookup_int(&scope, "y"), Some(10));
        assert_eq!(lookup_int(&scope, "z"), None);
    }

    #[test]
    fn lexical_wins_over_inner_with() {
        let with_set = Thunk::of_value(Value::Set(attrs(&[("x", 99)])));
        let scope = Scope::root().push(attrs(&[("x", 1)])).push_with(with_set);
        assert_eq!(lookup_int(&scope, "x"), Some(1));
    }

    #[test]
    fn innermost_with_wins_among_withs() {
        let outer = Thunk::of_value(Value::Set(attrs(&[("x", 1), ("only", 5)])));
        let inner = Thunk::of_value(Value::Set(attrs(&[("x", 2)])));
        let scope = Scope::root().push_with(outer).push_with(inner);
        assert_eq!(lookup_int(&scope, "x"), Some(2));
        assert_eq!(lookup_int(&scope, "only"), Some(5));
    }

    #[test]
    fn deferred_frame_resolves_through_its_thunk() {
        let knot = Thunk::knot();
        let scope = Scope::root().push_deferred(knot.clone());
        knot.fill(Value::Set(attrs(&[("x", 3)])));
        assert_eq!(lookup_int(&scope, "x"), Some(3));
    }

    #[test]
    fn non_set_with_scope_fails_lookup() {
        let mut ev = Evaluator::new();
        let scope = Scope::root().push_with(Thunk::of_value(Value::int(1)));
        assert!(scope.lookup(&mut ev, "x").is_err());
    }
}

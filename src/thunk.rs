//! Memoized deferred computations.
//!
//! A thunk stands for a computation that, when forced, yields exactly one
//! head-normal value. The cell moves one way through three states:
//! suspended, forcing ("black hole"), and done. Re-entering a thunk that is
//! already forcing is the infinite-recursion detector. A forced thunk never
//! re-runs its computation; errors are cached just like values so a retry
//! cannot observe a different outcome.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::Expr;
use crate::errors::EvalError;
use crate::eval::Evaluator;
use crate::scope::Scope;
use crate::value::Value;

/// The deferred computation inside a suspended thunk.
pub enum Suspend {
    /// Evaluate an expression under a captured scope. The common case.
    Expr { expr: Rc<Expr>, scope: Scope },
    /// Run an arbitrary one-shot action. Used by builtins, imports, and
    /// inherit bindings.
    Native(Box<dyn FnOnce(&mut Evaluator) -> Result<Value, EvalError>>),
}

enum Cell {
    Suspended(Suspend),
    /// Currently forcing. Also the initial state of pre-allocated knot
    /// handles before they are back-patched.
    Blackhole,
    Done(Result<Value, EvalError>),
}

/// A shareable handle to a memoized deferred computation.
#[derive(Clone)]
pub struct Thunk(Rc<RefCell<Cell>>);

impl Thunk {
    /// Defer evaluation of `expr` under `scope`.
    pub fn defer_expr(expr: Rc<Expr>, scope: Scope) -> Thunk {
        Thunk(Rc::new(RefCell::new(Cell::Suspended(Suspend::Expr {
            expr,
            scope,
        }))))
    }

    /// Defer an arbitrary action.
    pub fn defer(f: impl FnOnce(&mut Evaluator) -> Result<Value, EvalError> + 'static) -> Thunk {
        Thunk(Rc::new(RefCell::new(Cell::Suspended(Suspend::Native(
            Box::new(f),
        )))))
    }

    /// Lift an already-computed value. Forcing short-circuits.
    pub fn of_value(v: Value) -> Thunk {
        Thunk(Rc::new(RefCell::new(Cell::Done(Ok(v)))))
    }

    /// A handle with no computation yet: it reads as a black hole until
    /// [`Thunk::fill`] back-patches it. This is how recursive-set knots are
    /// tied: allocate the handle, let every sibling capture it, then fill it
    /// with the finished set.
    pub fn knot() -> Thunk {
        Thunk(Rc::new(RefCell::new(Cell::Blackhole)))
    }

    /// Back-patch a knot handle with its final value.
    ///
    /// Only meaningful on a handle from [`Thunk::knot`] that has not been
    /// filled yet.
    pub fn fill(&self, v: Value) {
        let mut cell = self.0.borrow_mut();
        debug_assert!(matches!(*cell, Cell::Blackhole));
        *cell = Cell::Done(Ok(v));
    }

    /// Force to head-normal form.
    ///
    /// The suspended computation is taken out of the cell and replaced with
    /// a black hole before it runs, so a re-entrant force of the same thunk
    /// fails with `InfiniteRecursion` instead of looping.
    pub fn force(&self, ev: &mut Evaluator) -> Result<Value, EvalError> {
        {
            let cell = self.0.borrow();
            match &*cell {
                Cell::Done(r) => return r.clone(),
                Cell::Blackhole => return Err(EvalError::InfiniteRecursion),
                Cell::Suspended(_) => {}
            }
        }

        let suspend = match std::mem::replace(&mut *self.0.borrow_mut(), Cell::Blackhole) {
            Cell::Suspended(s) => s,
            // Checked just above; evaluation is single-threaded.
            _ => unreachable!("thunk state changed between borrows"),
        };

        let result = match suspend {
            Suspend::Expr { expr, scope } => ev.eval(&expr, &scope),
            Suspend::Native(f) => f(ev),
        };

        *self.0.borrow_mut() = Cell::Done(result.clone());
        result
    }

    /// Peek at the value without forcing. `None` if unforced, forcing, or
    /// failed.
    pub fn peek(&self) -> Option<Value> {
        match &*self.0.borrow() {
            Cell::Done(Ok(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never descend into the payload: thunk graphs are cyclic.
        match &*self.0.borrow() {
            Cell::Suspended(_) => write!(f, "<thunk>"),
            Cell::Blackhole => write!(f, "<thunk:forcing>"),
            Cell::Done(Ok(v)) => write!(f, "<thunk:{}>", v.type_name()),
            Cell::Done(Err(_)) => write!(f, "<thunk:failed>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Atom;
    use crate::value::Value;

    #[test]
    fn of_value_forces_without_an_action() {
        let mut ev = Evaluator::new();
        let t = Thunk::of_value(Value::int(42));
        assert!(matches!(
            t.force(&mut ev),
            Ok(Value::Const(Atom::Int(42)))
        ));
    }

    #[test]
    fn native_action_runs_once() {
        let mut ev = Evaluator::new();
        let t = Thunk::defer(|_| Ok(Value::int(7)));
        assert!(t.peek().is_none());
        t.force(&mut ev).unwrap();
        assert!(matches!(t.peek(), Some(Value::Const(Atom::Int(7)))));
        // A second force hits the cache; a FnOnce could not run again anyway.
        assert!(matches!(
            t.force(&mut ev),
            Ok(Value::Const(Atom::Int(7)))
        ));
    }

    #[test]
    fn errors_are_cached() {
        let mut ev = Evaluator::new();
        let t = Thunk::defer(|_| Err(EvalError::AssertionFailed));
        assert!(matches!(t.force(&mut ev), Err(EvalError::AssertionFailed)));
        assert!(matches!(t.force(&mut ev), Err(EvalError::AssertionFailed)));
    }

    #[test]
    fn unfilled_knot_reads_as_black_hole() {
        let mut ev = Evaluator::new();
        let t = Thunk::knot();
        assert!(matches!(t.force(&mut ev), Err(EvalError::InfiniteRecursion)));
    }

    #[test]
    fn filled_knot_reads_as_its_value() {
        let mut ev = Evaluator::new();
        let t = Thunk::knot();
        t.fill(Value::bool(true));
        assert!(matches!(
            t.force(&mut ev),
            Ok(Value::Const(Atom::Bool(true)))
        ));
    }
}

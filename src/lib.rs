//! flint: a lazy evaluator core for the Nix expression language.
//!
//! The crate takes a parsed expression tree and reduces it on demand:
//! values are produced by forcing memoized thunks, scopes form a persistent
//! chain, and recursive bindings are tied as knots of pre-allocated thunk
//! handles. Parsing, the builtins catalog, and rendering are external
//! collaborators; see [`source`] for the seams.

pub mod ast;
pub mod attrs;
pub mod check;
pub mod errors;
pub mod eval;
pub mod scope;
pub mod source;
pub mod test_support;
pub mod thunk;
pub mod value;

pub use ast::{Atom, BinOp, Expr, Params, UnaryOp};
pub use check::check;
pub use errors::EvalError;
pub use eval::{Config, Evaluator};
pub use scope::Scope;
pub use source::{Importer, LookupPathResolver};
pub use thunk::Thunk;
pub use value::{Attrs, Builtin, NormalValue, StrVal, Value};

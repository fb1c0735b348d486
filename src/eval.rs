//! The evaluator: reduction rules, the argument binder, set construction,
//! and the normalizer.
//!
//! Evaluation is demand-driven. Each rule receives its children unevaluated
//! and defers them as thunks; forcing happens only where a rule actually
//! inspects a value. The session is single-threaded, so thunk cells need no
//! locking and the black-hole rule is simply same-thread re-entry.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{Atom, AttrPath, BinOp, Binding, Expr, Params, StrPart, UnaryOp};
use crate::attrs::{alter, eval_selector};
use crate::errors::{similar_names, EvalError};
use crate::scope::Scope;
use crate::source::{Importer, LookupPathResolver};
use crate::thunk::Thunk;
use crate::value::{Attrs, Closure, NormalValue, StrVal, Value};

/// Evaluation limits.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ceiling on recursive evaluation depth. Catches runaway recursion the
    /// black-hole rule cannot see, e.g. `f = x: f x`.
    pub max_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_depth: 500 }
    }
}

/// An evaluation session. Owns the configuration, the import cache, and the
/// collaborator handles; all forcing funnels through it.
pub struct Evaluator {
    config: Config,
    importer: Option<Box<dyn Importer>>,
    lookup_paths: Option<Box<dyn LookupPathResolver>>,
    /// One thunk per canonical imported file; diamond imports share it.
    import_cache: HashMap<PathBuf, Thunk>,
    /// Scope that top-level and imported expressions start from. Usually
    /// holds the builtins.
    toplevel: Scope,
    depth: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Evaluator {
            config,
            importer: None,
            lookup_paths: None,
            import_cache: HashMap::new(),
            toplevel: Scope::root(),
            depth: 0,
        }
    }

    pub fn with_toplevel(mut self, scope: Scope) -> Self {
        self.toplevel = scope;
        self
    }

    pub fn with_importer(mut self, importer: impl Importer + 'static) -> Self {
        self.importer = Some(Box::new(importer));
        self
    }

    pub fn with_lookup_paths(mut self, resolver: impl LookupPathResolver + 'static) -> Self {
        self.lookup_paths = Some(Box::new(resolver));
        self
    }

    pub fn toplevel(&self) -> &Scope {
        &self.toplevel
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Defer evaluation of `expr` under `scope`.
    pub fn thunk(&self, expr: Rc<Expr>, scope: &Scope) -> Thunk {
        Thunk::defer_expr(expr, scope.clone())
    }

    /// Force a thunk to head-normal form.
    pub fn force(&mut self, t: &Thunk) -> Result<Value, EvalError> {
        t.force(self)
    }

    /// Evaluate an expression at the top level and fully normalize the
    /// result.
    pub fn run(&mut self, expr: Rc<Expr>) -> Result<NormalValue, EvalError> {
        let scope = self.toplevel.clone();
        let t = self.thunk(expr, &scope);
        self.normalize(&t)
    }

    /// Evaluate an expression to head-normal form under `scope`.
    pub fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        if self.depth >= self.config.max_depth {
            return Err(EvalError::StackOverflow(self.config.max_depth));
        }
        self.depth += 1;
        let result = self.eval_inner(expr, scope);
        self.depth -= 1;
        result
    }

    // ========================================================================
    // Reduction rules
    // ========================================================================

    fn eval_inner(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        match expr {
            Expr::Const(a) => Ok(Value::Const(a.clone())),

            Expr::Var(name) => match scope.lookup(self, name)? {
                Some(t) => self.force(&t),
                None => Err(EvalError::UndefinedVariable {
                    name: name.clone(),
                    suggestions: similar_names(name, &scope.visible_names()),
                }),
            },

            Expr::Str(parts) => self.eval_str(parts, scope).map(Value::Str),

            Expr::Path(p) => Ok(Value::Path(p.clone())),

            Expr::LookupPath(p) => Ok(Value::LookupPath(p.clone())),

            Expr::List(xs) => Ok(Value::List(Rc::new(
                xs.iter().map(|e| self.thunk(e.clone(), scope)).collect(),
            ))),

            Expr::Set(bindings) => {
                let (attrs, _) = self.build_attrs(false, bindings, scope)?;
                Ok(Value::Set(attrs))
            }

            Expr::RecSet(bindings) => {
                let (attrs, _) = self.build_attrs(true, bindings, scope)?;
                Ok(Value::Set(attrs))
            }

            Expr::Let { bindings, body } => {
                let (_, knot) = self.build_attrs(true, bindings, scope)?;
                let scope = scope.push_deferred(knot);
                self.eval(body, &scope)
            }

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_bool(cond, scope)? {
                    self.eval(then_branch, scope)
                } else {
                    self.eval(else_branch, scope)
                }
            }

            Expr::With { env, body } => {
                let set = self.thunk(env.clone(), scope);
                match self.force(&set)? {
                    Value::Set(_) => {}
                    v => {
                        return Err(EvalError::type_error(format!(
                            "`with` expects a set, got {}",
                            v.type_name()
                        )))
                    }
                }
                self.eval(body, &scope.push_with(set))
            }

            Expr::Assert { cond, body } => {
                if self.eval_bool(cond, scope)? {
                    self.eval(body, scope)
                } else {
                    Err(EvalError::AssertionFailed)
                }
            }

            Expr::App { fun, arg } => {
                let f = self.eval(fun, scope)?;
                let arg = self.thunk(arg.clone(), scope);
                self.apply(f, arg)
            }

            Expr::Lambda { params, body } => Ok(Value::Lambda(Closure {
                params: params.clone(),
                body: body.clone(),
                scope: scope.clone(),
            })),

            Expr::Unary { op, operand } => {
                let v = self.eval(operand, scope)?;
                self.unop(*op, v)
            }

            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                self.binop(*op, l, r)
            }

            Expr::Select {
                set,
                path,
                fallback,
            } => self.eval_select(set, path, fallback.as_deref(), scope),

            Expr::HasAttr { set, path } => {
                if path.len() != 1 {
                    return Err(EvalError::type_error(
                        "`?` takes exactly one attribute name",
                    ));
                }
                let keys = eval_selector(self, path, scope, false)?;
                match self.eval(set, scope)? {
                    Value::Set(attrs) => Ok(Value::bool(attrs.contains_key(&keys[0]))),
                    v => Err(EvalError::type_error(format!(
                        "`?` expects a set on the left, got {}",
                        v.type_name()
                    ))),
                }
            }
        }
    }

    /// Apply a function value to an unforced argument.
    pub fn apply(&mut self, fun: Value, arg: Thunk) -> Result<Value, EvalError> {
        match fun {
            Value::Lambda(closure) => {
                let frame = self.bind_params(&closure, arg)?;
                let scope = closure.scope.push(frame);
                self.eval(&closure.body, &scope)
            }
            Value::Builtin(b) => {
                let out = b.call(self, arg)?;
                self.force(&out)
            }
            v => Err(EvalError::type_error(format!(
                "attempt to call a {}",
                v.type_name()
            ))),
        }
    }

    // ========================================================================
    // Argument binder
    // ========================================================================

    /// Compute the local bindings a call introduces, per the parameter
    /// shape.
    ///
    /// Set patterns tie a knot: default expressions and the `@`-binding see
    /// the finished argument scope itself, layered over the closure's
    /// definition-site scope. The call site is never consulted for
    /// defaults.
    fn bind_params(&mut self, closure: &Closure, arg: Thunk) -> Result<Rc<Attrs>, EvalError> {
        match &*closure.params {
            Params::Named(n) => {
                let mut attrs = Attrs::new();
                attrs.insert(n.clone(), arg);
                Ok(Rc::new(attrs))
            }
            Params::Set {
                formals,
                ellipsis,
                bound,
            } => {
                let supplied = self.force_set(&arg)?;
                let knot = Thunk::knot();
                let default_scope = closure.scope.push_deferred(knot.clone());

                let mut attrs = Attrs::new();
                if *ellipsis {
                    // Extra keys pass through into the bound scope.
                    for (k, v) in supplied.iter() {
                        attrs.insert(k.clone(), v.clone());
                    }
                } else if let Some(extra) = supplied
                    .keys()
                    .find(|k| formals.iter().all(|f| f.name != **k))
                {
                    return Err(EvalError::UnexpectedArg(extra.clone()));
                }

                for formal in formals {
                    match supplied.get(&formal.name) {
                        Some(t) => {
                            attrs.insert(formal.name.clone(), t.clone());
                        }
                        None => match &formal.default {
                            Some(default) => {
                                attrs.insert(
                                    formal.name.clone(),
                                    Thunk::defer_expr(default.clone(), default_scope.clone()),
                                );
                            }
                            None => return Err(EvalError::MissingArg(formal.name.clone())),
                        },
                    }
                }

                if let Some(name) = bound {
                    attrs.insert(name.clone(), knot.clone());
                }

                let attrs = Rc::new(attrs);
                knot.fill(Value::Set(attrs.clone()));
                Ok(attrs)
            }
        }
    }

    // ========================================================================
    // Set construction
    // ========================================================================

    /// Build the mapping for a set literal, processing bindings in source
    /// order through `alter`.
    ///
    /// For a recursive set, every right-hand side captures a scope that
    /// resolves through the finished set; the returned knot thunk is that
    /// set, and is also what `let` pushes for its body. Keys (including
    /// dynamic ones) and `inherit` sources are chosen under the outer scope.
    fn build_attrs(
        &mut self,
        recursive: bool,
        bindings: &[Binding],
        scope: &Scope,
    ) -> Result<(Rc<Attrs>, Thunk), EvalError> {
        let knot = Thunk::knot();
        let rhs_scope = if recursive {
            scope.push_deferred(knot.clone())
        } else {
            scope.clone()
        };

        let mut attrs = Attrs::new();
        for binding in bindings {
            match binding {
                Binding::Value { path, value } => {
                    let keys = eval_selector(self, path, scope, true)?;
                    let rhs = Thunk::defer_expr(value.clone(), rhs_scope.clone());
                    attrs = alter(self, &attrs, &keys, |_| Some(rhs))?;
                }
                Binding::Inherit { from: None, names } => {
                    // `inherit a;` looks `a` up in the enclosing scope, not
                    // in the set under construction.
                    for name in names {
                        let n = name.clone();
                        let sc = scope.clone();
                        attrs.insert(
                            name.clone(),
                            Thunk::defer(move |ev| match sc.lookup(ev, &n)? {
                                Some(t) => t.force(ev),
                                None => {
                                    let suggestions = similar_names(&n, &sc.visible_names());
                                    Err(EvalError::UndefinedVariable {
                                        name: n,
                                        suggestions,
                                    })
                                }
                            }),
                        );
                    }
                }
                Binding::Inherit {
                    from: Some(src),
                    names,
                } => {
                    // `inherit (src) a b;`: one shared thunk for `src`,
                    // one deferred select per name.
                    let src = self.thunk(src.clone(), scope);
                    for name in names {
                        let n = name.clone();
                        let src = src.clone();
                        attrs.insert(
                            name.clone(),
                            Thunk::defer(move |ev| match ev.force_set(&src)?.get(&n) {
                                Some(t) => t.force(ev),
                                None => Err(EvalError::AttrMissing(vec![n])),
                            }),
                        );
                    }
                }
            }
        }

        let attrs = Rc::new(attrs);
        knot.fill(Value::Set(attrs.clone()));
        Ok((attrs, knot))
    }

    // ========================================================================
    // Strings and coercion
    // ========================================================================

    fn eval_str(&mut self, parts: &[StrPart], scope: &Scope) -> Result<StrVal, EvalError> {
        let mut out = StrVal::default();
        for part in parts {
            match part {
                StrPart::Lit(text) => out.text.push_str(text),
                StrPart::Interp(e) => {
                    let v = self.eval(e, scope)?;
                    let s = self.coerce_to_string(&v)?;
                    out.text.push_str(&s.text);
                    out.context.extend(s.context);
                }
            }
        }
        Ok(out)
    }

    /// Coerce a head-normal value to text. Only strings, paths, lookup
    /// paths, and URI atoms have a textual shape.
    pub fn coerce_to_string(&mut self, v: &Value) -> Result<StrVal, EvalError> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            Value::Path(p) => Ok(StrVal::plain(p.clone())),
            Value::LookupPath(name) => {
                let path = self.resolve_lookup_path(name)?;
                Ok(StrVal::plain(path.display().to_string()))
            }
            Value::Const(Atom::Uri(u)) => Ok(StrVal::plain(u.clone())),
            v => Err(EvalError::CoercionError {
                from: v.type_name(),
                to: "string",
            }),
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn unop(&mut self, op: UnaryOp, v: Value) -> Result<Value, EvalError> {
        match (op, v) {
            (UnaryOp::Neg, Value::Const(Atom::Int(n))) => Ok(Value::int(-n)),
            (UnaryOp::Not, Value::Const(Atom::Bool(b))) => Ok(Value::bool(!b)),
            (op, v) => Err(EvalError::type_error(format!(
                "cannot apply {:?} to {}",
                op,
                v.type_name()
            ))),
        }
    }

    fn binop(&mut self, op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
        use std::cmp::Ordering;
        use BinOp::*;

        match (op, &l, &r) {
            (
                Eq | Neq | Lt | Lte | Gt | Gte,
                Value::Const(a),
                Value::Const(b),
            ) => {
                let ord = a.same_kind_cmp(b).ok_or_else(|| {
                    EvalError::type_error(format!(
                        "cannot compare {} with {}",
                        a.type_name(),
                        b.type_name()
                    ))
                })?;
                Ok(Value::bool(match op {
                    Eq => ord == Ordering::Equal,
                    Neq => ord != Ordering::Equal,
                    Lt => ord == Ordering::Less,
                    Lte => ord != Ordering::Greater,
                    Gt => ord == Ordering::Greater,
                    Gte => ord != Ordering::Less,
                    _ => unreachable!(),
                }))
            }

            (And, Value::Const(Atom::Bool(a)), Value::Const(Atom::Bool(b))) => {
                Ok(Value::bool(*a && *b))
            }
            (Or, Value::Const(Atom::Bool(a)), Value::Const(Atom::Bool(b))) => {
                Ok(Value::bool(*a || *b))
            }
            (Impl, Value::Const(Atom::Bool(a)), Value::Const(Atom::Bool(b))) => {
                Ok(Value::bool(!*a || *b))
            }

            (Add, Value::Const(Atom::Int(a)), Value::Const(Atom::Int(b))) => {
                Ok(Value::int(a + b))
            }
            (Sub, Value::Const(Atom::Int(a)), Value::Const(Atom::Int(b))) => {
                Ok(Value::int(a - b))
            }
            (Mul, Value::Const(Atom::Int(a)), Value::Const(Atom::Int(b))) => {
                Ok(Value::int(a * b))
            }
            (Div, Value::Const(Atom::Int(_)), Value::Const(Atom::Int(0))) => {
                Err(EvalError::DivisionByZero)
            }
            (Div, Value::Const(Atom::Int(a)), Value::Const(Atom::Int(b))) => {
                Ok(Value::int(a / b))
            }

            (Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a.concat(b))),

            // Path concatenation stays textual; nobody canonicalizes here.
            (Add, Value::Path(a), Value::Path(b)) => Ok(Value::Path(format!("{}{}", a, b))),
            (Add, Value::Path(a), Value::Str(b)) => {
                Ok(Value::Str(StrVal::plain(a.clone()).concat(b)))
            }

            // Right-biased shallow merge; nested sets are not merged.
            (Update, Value::Set(a), Value::Set(b)) => {
                let mut merged = (**a).clone();
                for (k, v) in b.iter() {
                    merged.insert(k.clone(), v.clone());
                }
                Ok(Value::Set(Rc::new(merged)))
            }

            (Concat, Value::List(a), Value::List(b)) => Ok(Value::List(Rc::new(
                a.iter().chain(b.iter()).cloned().collect(),
            ))),

            (op, l, r) => Err(EvalError::type_error(format!(
                "cannot apply {:?} to {} and {}",
                op,
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    fn eval_select(
        &mut self,
        set: &Rc<Expr>,
        path: &AttrPath,
        fallback: Option<&Expr>,
        scope: &Scope,
    ) -> Result<Value, EvalError> {
        let keys = eval_selector(self, path, scope, true)?;
        let mut cur = self.thunk(set.clone(), scope);
        for (i, key) in keys.iter().enumerate() {
            let next = match self.force(&cur)? {
                Value::Set(attrs) => attrs.get(key).cloned(),
                _ => None,
            };
            match next {
                Some(t) => cur = t,
                None => {
                    return match fallback {
                        Some(e) => self.eval(e, scope),
                        None => Err(EvalError::AttrMissing(keys[..=i].to_vec())),
                    }
                }
            }
        }
        self.force(&cur)
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Force `source` to a path, load that file through the importer
    /// collaborator, and return a thunk of the file's value. Each file is
    /// parsed and evaluated once; later imports share the cached thunk.
    pub fn import_file(&mut self, source: &Thunk) -> Result<Thunk, EvalError> {
        let path = self.force_path(source)?;
        let canonical = std::fs::canonicalize(&path).unwrap_or(path);
        if let Some(t) = self.import_cache.get(&canonical) {
            trace!("import cache hit for {}", canonical.display());
            return Ok(t.clone());
        }
        debug!("importing {}", canonical.display());

        let importer = self
            .importer
            .as_mut()
            .ok_or_else(|| EvalError::ImportFailed {
                path: canonical.display().to_string(),
                cause: "no importer configured".into(),
            })?;
        let expr = importer
            .load(&canonical)
            .map_err(|cause| EvalError::ImportFailed {
                path: canonical.display().to_string(),
                cause,
            })?;

        let t = Thunk::defer_expr(expr, self.toplevel.clone());
        self.import_cache.insert(canonical, t.clone());
        Ok(t)
    }

    /// Force a thunk to something usable as a filesystem path.
    fn force_path(&mut self, t: &Thunk) -> Result<PathBuf, EvalError> {
        match t.force(self)? {
            Value::Path(p) => Ok(PathBuf::from(p)),
            Value::LookupPath(name) => self.resolve_lookup_path(&name),
            Value::Str(s) => Ok(PathBuf::from(s.text)),
            v => Err(EvalError::CoercionError {
                from: v.type_name(),
                to: "path",
            }),
        }
    }

    fn resolve_lookup_path(&self, name: &str) -> Result<PathBuf, EvalError> {
        self.lookup_paths
            .as_ref()
            .and_then(|r| r.resolve(name))
            .ok_or_else(|| EvalError::ImportFailed {
                path: format!("<{}>", name),
                cause: "not found on the lookup path".into(),
            })
    }

    // ========================================================================
    // Forcing helpers
    // ========================================================================

    /// Force a thunk and require an attribute set.
    pub fn force_set(&mut self, t: &Thunk) -> Result<Rc<Attrs>, EvalError> {
        match t.force(self)? {
            Value::Set(attrs) => Ok(attrs),
            v => Err(EvalError::type_error(format!(
                "expected a set, got {}",
                v.type_name()
            ))),
        }
    }

    fn eval_bool(&mut self, e: &Expr, scope: &Scope) -> Result<bool, EvalError> {
        match self.eval(e, scope)? {
            Value::Const(Atom::Bool(b)) => Ok(b),
            v => Err(EvalError::type_error(format!(
                "expected a boolean, got {}",
                v.type_name()
            ))),
        }
    }

    // ========================================================================
    // Normalizer
    // ========================================================================

    /// Force a thunk and recursively force all substructure, yielding a
    /// cycle-free tree. Atoms, strings, paths, builtins, and functions
    /// normalize to themselves.
    pub fn normalize(&mut self, t: &Thunk) -> Result<NormalValue, EvalError> {
        if self.depth >= self.config.max_depth {
            return Err(EvalError::StackOverflow(self.config.max_depth));
        }
        self.depth += 1;
        let result = self.normalize_inner(t);
        self.depth -= 1;
        result
    }

    fn normalize_inner(&mut self, t: &Thunk) -> Result<NormalValue, EvalError> {
        Ok(match t.force(self)? {
            Value::Const(a) => NormalValue::Const(a),
            Value::Str(s) => NormalValue::Str(s),
            Value::Path(p) => NormalValue::Path(p),
            Value::LookupPath(p) => NormalValue::LookupPath(p),
            Value::Lambda(c) => NormalValue::Lambda(c),
            Value::Builtin(b) => NormalValue::Builtin(b),
            Value::List(xs) => NormalValue::List(
                xs.iter()
                    .map(|x| self.normalize(x))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Set(attrs) => {
                let mut out = BTreeMap::new();
                for (k, v) in attrs.iter() {
                    out.insert(k.clone(), self.normalize(v)?);
                }
                NormalValue::Set(out)
            }
        })
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn constants_evaluate_to_themselves() {
        assert_eq!(eval_ok(int(42)), NormalValue::Const(Atom::Int(42)));
        assert_eq!(eval_ok(null()), NormalValue::Const(Atom::Null));
    }

    #[test]
    fn arithmetic_dispatches_on_both_tags() {
        assert_eq!(
            eval_ok(binary(BinOp::Add, int(1), int(2))),
            NormalValue::Const(Atom::Int(3))
        );
        let err = eval_err(binary(BinOp::Add, int(1), bool_(true)));
        assert!(matches!(err, EvalError::TypeError(_)));
    }

    #[test]
    fn division_truncates_and_guards_zero() {
        assert_eq!(
            eval_ok(binary(BinOp::Div, int(-7), int(2))),
            NormalValue::Const(Atom::Int(-3))
        );
        assert!(matches!(
            eval_err(binary(BinOp::Div, int(1), int(0))),
            EvalError::DivisionByZero
        ));
    }

    #[test]
    fn implication_is_not_l_or_r() {
        for (a, b, out) in [
            (true, true, true),
            (true, false, false),
            (false, true, true),
            (false, false, true),
        ] {
            assert_eq!(
                eval_ok(binary(BinOp::Impl, bool_(a), bool_(b))),
                NormalValue::Const(Atom::Bool(out))
            );
        }
    }

    #[test]
    fn undefined_variable_reports_suggestions() {
        let expr = let_in(vec![attr("count", int(1))], var("coutn"));
        match eval_err(expr) {
            EvalError::UndefinedVariable { name, suggestions } => {
                assert_eq!(name, "coutn");
                assert_eq!(suggestions, vec!["count".to_string()]);
            }
            e => panic!("expected undefined variable, got {}", e),
        }
    }

    #[test]
    fn runaway_recursion_hits_the_depth_ceiling() {
        // f = x: f x; f 1
        let f = lambda_named("x", app(var("f"), var("x")));
        let expr = let_in(vec![attr("f", f)], app(var("f"), int(1)));
        assert!(matches!(eval_err(expr), EvalError::StackOverflow(_)));
    }
}

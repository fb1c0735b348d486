//! Evaluation failures.
//!
//! Every failure is fail-fast: the first error aborts the force in progress
//! and propagates to the caller. Nothing in the core catches errors; a
//! `tryEval`-shaped builtin may, through the builtin ABI.

use thiserror::Error;

use crate::ast::Name;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("undefined variable: {name}")]
    UndefinedVariable {
        name: Name,
        /// Closest in-scope names by edit distance, for diagnostics.
        suggestions: Vec<Name>,
    },

    #[error("type error: {0}")]
    TypeError(String),

    #[error("attribute `{}` is missing", .0.join("."))]
    AttrMissing(Vec<Name>),

    #[error("`{}` is not an attribute set", .0.join("."))]
    NotASet(Vec<Name>),

    #[error("dynamic attribute keys are not allowed in this context")]
    DynamicKeyNotAllowed,

    #[error("function called without required argument `{0}`")]
    MissingArg(Name),

    #[error("function called with unexpected argument `{0}`")]
    UnexpectedArg(Name),

    #[error("assertion failed")]
    AssertionFailed,

    #[error("division by zero")]
    DivisionByZero,

    #[error("infinite recursion encountered")]
    InfiniteRecursion,

    #[error("import of `{path}` failed: {cause}")]
    ImportFailed { path: String, cause: String },

    #[error("cannot coerce {from} to {to}")]
    CoercionError {
        from: &'static str,
        to: &'static str,
    },

    #[error("evaluator call depth exceeded {0}")]
    StackOverflow(usize),
}

impl EvalError {
    pub fn type_error(detail: impl Into<String>) -> Self {
        EvalError::TypeError(detail.into())
    }

    /// A human-oriented follow-up line, when we have one to offer.
    pub fn hint(&self) -> Option<String> {
        match self {
            EvalError::UndefinedVariable { suggestions, .. } if !suggestions.is_empty() => {
                Some(format!("did you mean `{}`?", suggestions.join("`, `")))
            }
            _ => None,
        }
    }
}

// ============================================================================
// "Did you mean?" suggestions
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b.len()]
}

/// Pick up to three candidates within a small edit distance of `name`,
/// closest first.
pub fn similar_names<'a, I>(name: &str, candidates: I) -> Vec<Name>
where
    I: IntoIterator<Item = &'a Name>,
{
    let max_distance = (name.len() / 3).max(2);
    let mut scored: Vec<(usize, &Name)> = candidates
        .into_iter()
        .filter(|c| c.as_str() != name)
        .map(|c| (levenshtein(name, c), c))
        .filter(|(d, _)| *d <= max_distance)
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.truncate(3);
    scored.into_iter().map(|(_, c)| c.clone()).collect()
}

use std::fmt;

/// Everything that can go wrong while lexing, parsing, or evaluating a program.
///
/// Lexical, syntactic, name resolution, type, arity, index, inheritance,
/// and internal ("should-not-happen invariant") errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VesperError {
    Lexical(String),
    Syntax(String),
    Name(String),
    Type(String),
    Arity(String),
    Index(String),
    Inheritance(String),
    Internal(String),
}

impl VesperError {
    pub(crate) fn message(&self) -> &str {
        match self {
            Self::Lexical(s)
            | Self::Syntax(s)
            | Self::Name(s)
            | Self::Type(s)
            | Self::Arity(s)
            | Self::Index(s)
            | Self::Inheritance(s)
            | Self::Internal(s) => s,
        }
    }
}

impl fmt::Display for VesperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for VesperError {}

/// Non-local control flow used by the evaluator, plus plain runtime errors.
///
/// `break`/`continue`/`return` unwind the tree-walk as `Flow` values rather
/// than as ordinary errors. They must never escape the loop body / loop /
/// lambda invocation that catches them; an evaluator that lets one escape
/// further than that is an internal bug, not a user-visible error.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Break,
    Continue,
    Return(crate::value::Value),
    Error(VesperError),
}

impl From<VesperError> for Flow {
    fn from(err: VesperError) -> Self {
        Self::Error(err)
    }
}

pub type EvalResult<T> = Result<T, Flow>;

/// The outcome of parsing a whole program: either the top-level node
/// sequence, or the collected messages from every recovered parse error.
/// If any statement failed to parse, the whole program is discarded rather
/// than run with gaps.
#[derive(Debug)]
pub struct ParseOutcome {
    pub(crate) errors: Vec<String>,
}

impl ParseOutcome {
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors.join("\n")
    }
}

impl fmt::Display for ParseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

impl std::error::Error for ParseOutcome {}

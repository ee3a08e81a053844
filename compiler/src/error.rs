//! Collects compile-time diagnostics (spec §4.2, §7). The reporter never
//! aborts compilation; it only accumulates, and formats output on demand.

use std::collections::HashSet;
use std::fmt;

/// The four broad categories from spec §7 that compile-time errors fall
/// into (`Runtime` is a separate taxonomy handled by the interpreter, not
/// this reporter).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ErrorCategory {
    Lexical,
    Syntactic,
    Semantic,
    Internal,
}

/// A specific diagnosis within a category, carrying just enough detail to
/// format a human-readable message.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub enum ErrorKind {
    // Lexical
    UnknownCharacter,
    IntegerOutOfBounds,

    // Syntactic
    UnexpectedSymbol { expected: String },
    MissingSymbol { expected: String },

    // Semantic
    UnknownName,
    Redeclaration,
    WrongKind { expected: String },
    WrongArity { expected: usize, found: usize },
    TypeMismatch,
    NonConstant,
    NonIntegerIndex,
    ReferenceModeMismatch,

    // Internal
    AssemblyTableFull,
    LabelUnresolved,
    SymbolTableInconsistency,
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            UnknownCharacter | IntegerOutOfBounds => ErrorCategory::Lexical,
            UnexpectedSymbol { .. } | MissingSymbol { .. } => ErrorCategory::Syntactic,
            UnknownName
            | Redeclaration
            | WrongKind { .. }
            | WrongArity { .. }
            | TypeMismatch
            | NonConstant
            | NonIntegerIndex
            | ReferenceModeMismatch => ErrorCategory::Semantic,
            AssemblyTableFull | LabelUnresolved | SymbolTableInconsistency => {
                ErrorCategory::Internal
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::UnknownCharacter => write!(f, "unknown character"),
            ErrorKind::IntegerOutOfBounds => write!(f, "integer literal out of bounds"),
            ErrorKind::UnexpectedSymbol { expected } => {
                write!(f, "unexpected symbol, expected {}", expected)
            }
            ErrorKind::MissingSymbol { expected } => write!(f, "missing {}", expected),
            ErrorKind::UnknownName => write!(f, "unknown name"),
            ErrorKind::Redeclaration => write!(f, "redeclaration of a name in this scope"),
            ErrorKind::WrongKind { expected } => write!(f, "expected {}", expected),
            ErrorKind::WrongArity { expected, found } => write!(
                f,
                "wrong number of arguments (expected {}, found {})",
                expected, found
            ),
            ErrorKind::TypeMismatch => write!(f, "type mismatch"),
            ErrorKind::NonConstant => write!(f, "expected a compile-time constant"),
            ErrorKind::NonIntegerIndex => write!(f, "array index must be of type integer"),
            ErrorKind::ReferenceModeMismatch => {
                write!(f, "argument passing mode does not match parameter")
            }
            ErrorKind::AssemblyTableFull => write!(f, "assembly table full"),
            ErrorKind::LabelUnresolved => write!(f, "label left unresolved"),
            ErrorKind::SymbolTableInconsistency => write!(f, "symbol table inconsistency"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompileError {
    pub line: u32,
    pub kind: ErrorKind,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

/// Flat list of `(line, category)` records, with duplicate suppression for
/// `Lexical`/`Syntactic` errors: at most one per line per category. Semantic
/// and internal errors are always recorded, since they're rarer and each
/// instance is usually diagnostically distinct.
#[derive(Default)]
pub struct ErrorReporter {
    errors: Vec<CompileError>,
    seen_this_line: HashSet<(u32, ErrorCategory)>,
}

impl ErrorReporter {
    pub fn new() -> ErrorReporter {
        Default::default()
    }

    pub fn report(&mut self, line: u32, kind: ErrorKind) {
        let category = kind.category();
        if matches!(category, ErrorCategory::Lexical | ErrorCategory::Syntactic) {
            if !self.seen_this_line.insert((line, category)) {
                return;
            }
        }
        self.errors.push(CompileError { line, kind });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// Writes every collected diagnostic, one per line, to `sink` (the
    /// line-oriented textual sink named as an external collaborator in
    /// spec §1).
    pub fn format_report<W: fmt::Write>(&self, sink: &mut W) -> fmt::Result {
        for error in &self.errors {
            writeln!(sink, "{}", error)?;
        }
        Ok(())
    }
}

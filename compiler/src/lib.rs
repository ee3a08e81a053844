//! `sachin-compiler`: the single-pass recursive-descent compiler (spec §2,
//! "Symbols & Opcodes", "Error Reporter", "Scanner", "Symbol Table",
//! "Assembler", "Parser / Analyzer").
//!
//! [`token`] is the closed token alphabet. [`scanner`] turns a character
//! source into a stream of those tokens. [`symbols`] is the block-structured
//! name table the parser consults and updates as it goes. [`assembler`] is
//! the append-only intermediate-code emitter with label back-patching.
//! [`parser`] ties all four together into the one-pass recursive-descent
//! compiler proper; [`error`] is the diagnostic taxonomy it reports into.

pub mod assembler;
pub mod error;
pub mod parser;
pub mod scanner;
pub mod symbols;
pub mod token;

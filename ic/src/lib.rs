//! The intermediate-code file format emitted by the compiler and consumed by
//! the interpreter (spec §3, §6.2).
//!
//! The format is line-oriented UTF-8 text: one non-negative integer per line,
//! in emission order. It carries no header and no length prefix — the
//! opcode/operand arity table in [`sachin::opcode`](../sachin/opcode/index.html)
//! is what makes the flat stream self-describing to a reader that executes it.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A single code word: either an opcode or an operand. The format only ever
/// stores non-negative integers, but intermediate code operands (addresses,
/// displacements, label slots) fit comfortably in `i32`, so decoding targets
/// that type directly rather than `u32` to save callers a cast at every use.
pub type Word = i32;

/// Failure to decode an intermediate-code file: either the underlying I/O
/// failed, or a line wasn't a non-negative decimal integer.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    MalformedLine { line: usize, text: String },
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadError::Io(err) => write!(f, "{}", err),
            ReadError::MalformedLine { line, text } => write!(
                f,
                "line {}: expected a non-negative integer, found \"{}\"",
                line, text
            ),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> ReadError {
        ReadError::Io(err)
    }
}

/// Writes `code` to `writer`, one word per line, in order.
pub fn write<W: Write>(writer: &mut W, code: &[Word]) -> io::Result<()> {
    for word in code {
        writeln!(writer, "{}", word)?;
    }
    Ok(())
}

/// Reads a sequence of words, one per non-blank line, in order.
///
/// Blank lines are skipped so that files written by hand (or pretty-printed)
/// don't need to be perfectly dense.
pub fn read<R: Read>(reader: R) -> Result<Vec<Word>, ReadError> {
    let mut code = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let word: Word = trimmed.parse().map_err(|_| ReadError::MalformedLine {
            line: index + 1,
            text: trimmed.to_owned(),
        })?;
        code.push(word);
    }
    Ok(code)
}

pub trait ReadIcExt: Read + Sized {
    fn read_ic(self) -> Result<Vec<Word>, ReadError> {
        read(self)
    }
}

impl<R: Read + Sized> ReadIcExt for R {}

pub trait WriteIcExt: Write + Sized {
    fn write_ic(&mut self, code: &[Word]) -> io::Result<()> {
        write(self, code)
    }
}

impl<W: Write + Sized> WriteIcExt for W {}

/// Reads an intermediate-code file from `path` (the filesystem byte source
/// named as an external collaborator in spec §1).
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<Word>, ReadError> {
    BufReader::new(File::open(path)?).read_ic()
}

/// Writes `code` to `path`, creating or truncating it.
pub fn write_file<P: AsRef<Path>>(path: P, code: &[Word]) -> io::Result<()> {
    BufWriter::new(File::create(path)?).write_ic(code)
}

#[cfg(test)]
mod test;

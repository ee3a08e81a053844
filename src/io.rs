//! External collaborators for runtime I/O (spec §1, §6.4): "a stdin-like
//! integer/boolean source and stdout-like sink consumed by the VM's read/
//! write opcodes." The core crate only needs these two small traits; wiring
//! them to real `Stdin`/`Stdout` is [`sachin-cli`](../sachin_cli/index.html)'s job.

use crate::error::RuntimeError;
use std::io::BufRead;

pub trait IntSource {
    /// Reads the next whitespace-separated integer token.
    fn read_integer(&mut self) -> Result<i32, RuntimeError>;

    /// Reads the next whitespace-separated boolean token (`true`/`false`,
    /// case-sensitive per spec §4.6).
    fn read_boolean(&mut self) -> Result<bool, RuntimeError>;
}

pub trait IntSink {
    fn write_integer(&mut self, value: i32);
    fn write_boolean(&mut self, value: bool);
}

/// Tokenizes whitespace-separated input lazily from any [`BufRead`], so a
/// single `read` consumes exactly one token regardless of how it's split
/// across lines (spec §6.4 "consumes whitespace-separated tokens").
pub struct TokenReader<R: BufRead> {
    reader: R,
    pending: std::collections::VecDeque<String>,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(reader: R) -> TokenReader<R> {
        TokenReader { reader, pending: std::collections::VecDeque::new() }
    }

    fn next_token(&mut self) -> Result<String, RuntimeError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            let mut line = String::new();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .map_err(|_| RuntimeError::MalformedInput)?;
            if bytes_read == 0 {
                return Err(RuntimeError::MalformedInput);
            }
            self.pending.extend(line.split_whitespace().map(str::to_owned));
        }
    }
}

impl<R: BufRead> IntSource for TokenReader<R> {
    fn read_integer(&mut self) -> Result<i32, RuntimeError> {
        self.next_token()?.parse().map_err(|_| RuntimeError::MalformedInput)
    }

    fn read_boolean(&mut self) -> Result<bool, RuntimeError> {
        match self.next_token()?.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(RuntimeError::MalformedInput),
        }
    }
}

pub struct WriteSink<W: std::io::Write> {
    writer: W,
}

impl<W: std::io::Write> WriteSink<W> {
    pub fn new(writer: W) -> WriteSink<W> {
        WriteSink { writer }
    }
}

impl<W: std::io::Write> IntSink for WriteSink<W> {
    fn write_integer(&mut self, value: i32) {
        let _ = writeln!(self.writer, "{}", value);
    }

    fn write_boolean(&mut self, value: bool) {
        let _ = writeln!(self.writer, "{}", value);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_tokens_across_lines() {
        let mut source = TokenReader::new("5\ntrue false\n7 8".as_bytes());
        assert_eq!(source.read_integer(), Ok(5));
        assert_eq!(source.read_boolean(), Ok(true));
        assert_eq!(source.read_boolean(), Ok(false));
        assert_eq!(source.read_integer(), Ok(7));
        assert_eq!(source.read_integer(), Ok(8));
    }

    #[test]
    fn malformed_boolean_is_an_error() {
        let mut source = TokenReader::new("maybe".as_bytes());
        assert_eq!(source.read_boolean(), Err(RuntimeError::MalformedInput));
    }
}

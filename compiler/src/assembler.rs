//! Append-only emitter for the intermediate code, with label back-patching
//! (spec §4.4).

use crate::error::{ErrorKind, ErrorReporter};
use sachin::opcode::Opcode;

/// Code image size bound (spec §4.4 "e.g. 10 000"). Beyond this, emission
/// keeps going (so later, unrelated errors still get a chance to surface)
/// but every further `emit`/`reserve_label` records `AssemblyTableFull`.
pub const MAX_CODE_SIZE: usize = 10_000;

pub struct Assembler {
    code: Vec<i32>,
    max_size: usize,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::with_max_size(MAX_CODE_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Assembler {
        Assembler { code: Vec::new(), max_size }
    }

    pub fn current_address(&self) -> i32 {
        self.code.len() as i32
    }

    fn push(&mut self, value: i32, line: u32, errors: &mut ErrorReporter) {
        if self.code.len() >= self.max_size {
            errors.report(line, ErrorKind::AssemblyTableFull);
            return;
        }
        self.code.push(value);
    }

    pub fn emit(&mut self, opcode: Opcode, operands: &[i32], line: u32, errors: &mut ErrorReporter) {
        debug_assert_eq!(operands.len(), opcode.arity());
        self.push(opcode as i32, line, errors);
        for operand in operands {
            self.push(*operand, line, errors);
        }
    }

    /// Appends a placeholder zero and returns its index, to be filled in
    /// later by `resolve_address`/`resolve_argument` once the target is
    /// known.
    pub fn reserve_label(&mut self, line: u32, errors: &mut ErrorReporter) -> i32 {
        let slot = self.current_address();
        self.push(0, line, errors);
        slot
    }

    pub fn resolve_address(&mut self, slot: i32) {
        self.resolve_argument(slot, self.current_address());
    }

    pub fn resolve_argument(&mut self, slot: i32, value: i32) {
        let index = slot as usize;
        if index < self.code.len() {
            self.code[index] = value;
        }
    }

    pub fn into_code(self) -> Vec<i32> {
        self.code
    }

    pub fn code(&self) -> &[i32] {
        &self.code
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emit_appends_opcode_then_operands() {
        let mut asm = Assembler::new();
        let mut errors = ErrorReporter::new();
        asm.emit(Opcode::Constant, &[42], 1, &mut errors);
        assert_eq!(asm.code(), &[Opcode::Constant as i32, 42]);
        assert!(!errors.has_errors());
    }

    #[test]
    fn reserve_label_and_resolve_address() {
        let mut asm = Assembler::new();
        let mut errors = ErrorReporter::new();
        let slot = asm.reserve_label(1, &mut errors);
        asm.emit(Opcode::EndProgram, &[], 1, &mut errors);
        asm.resolve_address(slot);
        assert_eq!(asm.code()[slot as usize], 1);
    }

    #[test]
    fn overflow_past_max_size_reports_internal_error() {
        let mut asm = Assembler::with_max_size(2);
        let mut errors = ErrorReporter::new();
        asm.emit(Opcode::Constant, &[1], 1, &mut errors);
        assert!(!errors.has_errors());
        asm.emit(Opcode::Constant, &[2], 1, &mut errors);
        assert!(errors.has_errors());
    }
}

//! Recursive-descent parser/analyzer (spec §4.5): one-symbol lookahead,
//! directly driving the symbol table and assembler as it goes, so there is
//! no separate AST stage.
//!
//! The concrete grammar below is this implementation's own, built from the
//! token alphabet and the production-by-production emission rules in spec
//! §4.5 (the BNF appendix the spec text refers to isn't part of this
//! repository); see `DESIGN.md` for the grammar as adopted and the call/
//! parallel-call conventions it relies on.

use crate::assembler::Assembler;
use crate::error::{ErrorKind, ErrorReporter};
use crate::scanner::{CharSource, Scanner};
use crate::symbols::{DataType, ObjectKind, ObjectRecord, SymbolTable};
use crate::token::Symbol;
use sachin::opcode::Opcode;
use std::collections::HashMap;

#[derive(Clone)]
struct ParameterSignature {
    by_reference: bool,
    data_type: DataType,
}

#[derive(Clone)]
struct ProcedureSignature {
    params: Vec<ParameterSignature>,
    return_type: Option<DataType>,
}

/// Result of compiling one source unit (spec §4.5 "Compilation's overall
/// success flag is false if any error was reported").
pub struct CompileOutput {
    pub code: Vec<i32>,
    pub success: bool,
    pub errors: ErrorReporter,
}

pub fn compile<C: CharSource>(source: C) -> CompileOutput {
    Parser::new(source).compile()
}

pub struct Parser<C: CharSource> {
    scanner: Scanner<C>,
    symbols: SymbolTable,
    assembler: Assembler,
    errors: ErrorReporter,
    /// Parameter/return signatures keyed by name index, since
    /// [`ObjectRecord`] only carries enough to re-derive a call's entry
    /// address and static level, not its parameter list (spec §4.5
    /// "Enforce arity and per-parameter type/mode").
    procedures: HashMap<usize, ProcedureSignature>,
}

impl<C: CharSource> Parser<C> {
    pub fn new(source: C) -> Parser<C> {
        Parser {
            scanner: Scanner::new(source),
            symbols: SymbolTable::new(),
            assembler: Assembler::new(),
            errors: ErrorReporter::new(),
            procedures: HashMap::new(),
        }
    }

    pub fn compile(mut self) -> CompileOutput {
        self.program();
        let success = !self.errors.has_errors();
        CompileOutput { code: self.assembler.into_code(), success, errors: self.errors }
    }

    // ---- token-stream helpers --------------------------------------

    fn current(&self) -> Symbol {
        self.scanner.current_symbol
    }

    fn advance(&mut self) {
        self.scanner.advance();
    }

    fn accept(&mut self, symbol: Symbol) -> bool {
        if self.current() == symbol {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, symbol: Symbol, what: &str) {
        if !self.accept(symbol) {
            self.report(ErrorKind::MissingSymbol { expected: what.to_string() });
        }
    }

    fn expect_name(&mut self, what: &str) -> usize {
        if self.current() == Symbol::Name {
            let word_index = self.scanner.argument.word_index();
            self.advance();
            word_index
        } else {
            self.report(ErrorKind::MissingSymbol { expected: what.to_string() });
            usize::max_value()
        }
    }

    fn report(&mut self, kind: ErrorKind) {
        let line = self.scanner.line_number;
        self.errors.report(line, kind);
        self.scanner.line_is_correct = false;
    }

    /// A statement-level error's recovery point: skip to `;`, `}`, or the
    /// start of a definition/statement keyword (spec §4.5 "Error
    /// recovery").
    fn synchronize(&mut self) {
        loop {
            match self.current() {
                Symbol::Semicolon
                | Symbol::RightBrace
                | Symbol::EndOfText
                | Symbol::If
                | Symbol::While
                | Symbol::Read
                | Symbol::Write
                | Symbol::Send
                | Symbol::Receive
                | Symbol::Open
                | Symbol::Randomize
                | Symbol::Parallel
                | Symbol::Name
                | Symbol::Constant
                | Symbol::Integer
                | Symbol::Boolean
                | Symbol::Channel
                | Symbol::At
                | Symbol::LeftBrace => break,
                _ => self.advance(),
            }
        }
        if self.current() == Symbol::Semicolon {
            self.advance();
        }
    }

    /// The scanner never fails (spec §4.1); `Unknown`/`IntegerOutOfBounds`
    /// tokens are the parser's problem to report wherever they surface.
    fn skip_lexical_errors(&mut self) {
        loop {
            match self.current() {
                Symbol::Unknown => {
                    self.report(ErrorKind::UnknownCharacter);
                    self.advance();
                }
                Symbol::IntegerOutOfBounds => {
                    self.report(ErrorKind::IntegerOutOfBounds);
                    self.advance();
                }
                _ => break,
            }
        }
    }

    // ---- assembler helpers ------------------------------------------

    fn emit(&mut self, opcode: Opcode, operands: &[i32]) {
        let line = self.scanner.line_number;
        self.assembler.emit(opcode, operands, line, &mut self.errors);
    }

    /// Emits `opcode` with a placeholder operand, returning the operand's
    /// slot for later resolution (spec §4.4 "forward branches... reserved
    /// and later resolved by the parser as blocks close").
    fn emit_branch(&mut self, opcode: Opcode) -> i32 {
        let slot = self.assembler.current_address() + 1;
        self.emit(opcode, &[0]);
        slot
    }

    fn resolve(&mut self, slot: i32) {
        self.assembler.resolve_address(slot);
    }

    // ---- types --------------------------------------------------------

    fn type_specifier(&mut self) -> DataType {
        match self.current() {
            Symbol::Integer => {
                self.advance();
                DataType::Integer
            }
            Symbol::Boolean => {
                self.advance();
                DataType::Boolean
            }
            Symbol::Channel => {
                self.advance();
                DataType::Channel
            }
            _ => {
                self.report(ErrorKind::UnexpectedSymbol { expected: "a type".to_string() });
                DataType::Universal
            }
        }
    }

    fn check_types(&mut self, a: DataType, b: DataType) {
        if a == DataType::Universal || b == DataType::Universal {
            return;
        }
        if a != b {
            self.report(ErrorKind::TypeMismatch);
        }
    }

    fn check_arith_operands(&mut self, a: DataType, b: DataType) {
        for t in [a, b] {
            if t != DataType::Integer && t != DataType::Universal {
                self.report(ErrorKind::TypeMismatch);
            }
        }
    }

    fn check_boolean_operands(&mut self, a: DataType, b: DataType) {
        for t in [a, b] {
            if t != DataType::Boolean && t != DataType::Universal {
                self.report(ErrorKind::TypeMismatch);
            }
        }
    }

    fn check_channel_type(&mut self, ty: DataType) {
        if ty != DataType::Channel && ty != DataType::Universal {
            self.report(ErrorKind::TypeMismatch);
        }
    }

    // ---- Program / Block ----------------------------------------------

    /// `Program ::= Block` (spec §4.5 "Program"): `Program n` with `n`
    /// resolved once the top-level scope's object count is known.
    fn program(&mut self) {
        let n_slot = self.assembler.current_address() + 1;
        self.emit(Opcode::Program, &[0]);
        self.symbols.new_block(true);
        self.expect(Symbol::LeftBrace, "{");
        self.definition_part();
        self.statement_part();
        self.expect(Symbol::RightBrace, "}");
        let n = self.symbols.end_block();
        self.assembler.resolve_argument(n_slot, n);
        self.emit(Opcode::EndProgram, &[]);
    }

    /// A lexically nested, non-procedural block (spec §4.6 "Block/
    /// EndBlock... keeping B unchanged"): used for `if`/`while` bodies and
    /// as a bare `{ ... }` statement.
    fn block(&mut self) {
        let n_slot = self.assembler.current_address() + 1;
        self.emit(Opcode::Block, &[0]);
        self.symbols.new_block(false);
        self.expect(Symbol::LeftBrace, "{");
        self.definition_part();
        self.statement_part();
        self.expect(Symbol::RightBrace, "}");
        let n = self.symbols.end_block();
        self.assembler.resolve_argument(n_slot, n);
        self.emit(Opcode::EndBlock, &[]);
    }

    fn definition_part(&mut self) {
        loop {
            self.skip_lexical_errors();
            match self.current() {
                Symbol::Constant => self.constant_definition(),
                Symbol::Integer | Symbol::Boolean | Symbol::Channel => self.variable_definition(),
                Symbol::At => self.procedure_definition(),
                _ => break,
            }
        }
    }

    fn statement_part(&mut self) {
        loop {
            self.skip_lexical_errors();
            if matches!(self.current(), Symbol::RightBrace | Symbol::EndOfText) {
                break;
            }
            self.statement();
        }
    }

    // ---- definitions ----------------------------------------------------

    /// `constant Name = Value (',' Name = Value)* ';'`. No code emitted;
    /// the value is recorded in the symbol table (spec §4.5
    /// "ConstantDefinition").
    fn constant_definition(&mut self) {
        self.expect(Symbol::Constant, "constant");
        loop {
            let name_index = self.expect_name("a constant name");
            self.expect(Symbol::Assign, "=");
            let (value, ty) = self.constant_value();
            if self.symbols.define(name_index, ObjectKind::Constant, ty, value).is_err() {
                self.report(ErrorKind::Redeclaration);
            }
            if !self.accept(Symbol::Comma) {
                break;
            }
        }
        self.expect(Symbol::Semicolon, ";");
    }

    fn constant_value(&mut self) -> (i32, DataType) {
        let negative = self.accept(Symbol::Minus);
        match self.current() {
            Symbol::Numeral => {
                let v = self.scanner.argument.value();
                self.advance();
                (if negative { -v } else { v }, DataType::Integer)
            }
            Symbol::True => {
                self.advance();
                (1, DataType::Boolean)
            }
            Symbol::False => {
                self.advance();
                (0, DataType::Boolean)
            }
            _ => {
                self.report(ErrorKind::NonConstant);
                (0, DataType::Universal)
            }
        }
    }

    /// Array bounds are plain unsigned numerals in this grammar (no named
    /// constants as bounds, to keep bound-resolution a lexical matter).
    fn constant_bound(&mut self) -> i32 {
        if self.current() == Symbol::Numeral {
            let v = self.scanner.argument.value();
            self.advance();
            v
        } else {
            self.report(ErrorKind::NonConstant);
            0
        }
    }

    /// `Type Name ('[' Bound ']')? (',' ...)* ';'` (spec §4.5
    /// "VariableDefinition").
    fn variable_definition(&mut self) {
        let ty = self.type_specifier();
        loop {
            let name_index = self.expect_name("a variable name");
            if self.accept(Symbol::LeftBracket) {
                let bound = self.constant_bound();
                self.expect(Symbol::RightBracket, "]");
                if self.symbols.define(name_index, ObjectKind::Array, ty, bound).is_err() {
                    self.report(ErrorKind::Redeclaration);
                }
            } else if self.symbols.define(name_index, ObjectKind::Variable, ty, 0).is_err() {
                self.report(ErrorKind::Redeclaration);
            }
            if !self.accept(Symbol::Comma) {
                break;
            }
        }
        self.expect(Symbol::Semicolon, ";");
    }

    /// `@ Name '(' (reference? Type Name),* ')' ('->' Type Name)? Block`
    /// (spec §4.5 "ProcedureDefinition"). The entry address is represented
    /// by a two-word header — `[param_words, body_start]` — reserved here
    /// and resolved in two steps, since the runtime needs both to set up
    /// the new frame from a call site whose own operands are fixed at
    /// `(level, header-address)` (see `DESIGN.md`).
    fn procedure_definition(&mut self) {
        self.expect(Symbol::At, "@");
        let name_index = self.expect_name("a procedure name");

        let goto_slot = self.emit_branch(Opcode::Goto);
        let header = self.assembler.current_address();
        self.assembler.reserve_label(self.scanner.line_number, &mut self.errors);
        self.assembler.reserve_label(self.scanner.line_number, &mut self.errors);

        if self.symbols.define(name_index, ObjectKind::Procedure, DataType::Undefined, header).is_err() {
            self.report(ErrorKind::Redeclaration);
        }

        self.symbols.new_block(true);

        // The parameter list is parsed left-to-right, but a return
        // parameter (declared textually *after* the closing paren) must be
        // *defined* first, at displacement 0 (spec §4.3 "the return
        // parameter occupies displacement 0"): the call sequence pushes the
        // pending return slot before any argument (spec §4.5
        // "ProcedureInvocation... the return slot is pre-reserved on the
        // caller's temporary stack before arguments"), so displacement 0 of
        // the callee's frame must line up with that slot. Parameter names
        // are therefore collected here and only handed to the symbol table
        // once the return clause (if any) has been seen.
        struct PendingParam {
            by_reference: bool,
            data_type: DataType,
            name_index: usize,
        }
        let mut pending = Vec::new();
        self.expect(Symbol::LeftParen, "(");
        if self.current() != Symbol::RightParen {
            loop {
                let by_reference = self.accept(Symbol::Reference);
                let ty = self.type_specifier();
                let param_name = self.expect_name("a parameter name");
                pending.push(PendingParam { by_reference, data_type: ty, name_index: param_name });
                if !self.accept(Symbol::Comma) {
                    break;
                }
            }
        }
        self.expect(Symbol::RightParen, ")");

        let mut return_type = None;
        if self.accept(Symbol::Arrow) {
            let ty = self.type_specifier();
            let return_name = self.expect_name("a return-parameter name");
            if self.symbols.define(return_name, ObjectKind::ReturnParameter, ty, 0).is_err() {
                self.report(ErrorKind::Redeclaration);
            }
            return_type = Some(ty);
        }

        let mut params = Vec::with_capacity(pending.len());
        for p in pending {
            let kind = if p.by_reference { ObjectKind::ReferenceParameter } else { ObjectKind::ValueParameter };
            if self.symbols.define(p.name_index, kind, p.data_type, 0).is_err() {
                self.report(ErrorKind::Redeclaration);
            }
            params.push(ParameterSignature { by_reference: p.by_reference, data_type: p.data_type });
        }

        let param_count = params.len() as i32;
        self.procedures.insert(name_index, ProcedureSignature { params, return_type });

        let param_words = param_count + if return_type.is_some() { 1 } else { 0 };
        self.assembler.resolve_argument(header, param_words);
        self.resolve(header + 1);

        let n_slot = self.assembler.current_address() + 1;
        self.emit(Opcode::ProcedureBlock, &[0]);
        self.expect(Symbol::LeftBrace, "{");
        self.definition_part();
        self.statement_part();
        self.expect(Symbol::RightBrace, "}");
        // `n` is the whole scope's allocation (return slot + params +
        // locals), since params/return share the same displacement counter
        // as the body's own locals (so `Variable`/`ReferenceParameter`
        // addressing is uniform). But at body entry `T` already sits at
        // `base + param_words` — the caller's pushed words, not 0 — so
        // `ProcedureBlock` must only reserve the locals *on top of* that
        // (spec §4.6 "parameters already placed by the call sequence");
        // reserving the full `n` would double-count the param/return slots.
        let n = self.symbols.end_block();
        self.assembler.resolve_argument(n_slot, n - param_words);
        self.emit(Opcode::EndProcedureBlock, &[param_count]);
        self.resolve(goto_slot);
    }

    // ---- statements -----------------------------------------------------

    fn statement(&mut self) {
        self.skip_lexical_errors();
        match self.current() {
            Symbol::Name => self.name_led_statement(),
            Symbol::If => self.if_statement(),
            Symbol::While => self.while_statement(),
            Symbol::Read => self.read_statement(),
            Symbol::Write => self.write_statement(),
            Symbol::Send => self.send_statement(),
            Symbol::Receive => self.receive_statement(),
            Symbol::Open => self.open_statement(),
            Symbol::Randomize => self.randomize_statement(),
            Symbol::Parallel => self.parallel_statement(),
            Symbol::LeftBrace => self.block(),
            _ => {
                self.report(ErrorKind::UnexpectedSymbol { expected: "a statement".to_string() });
                self.synchronize();
            }
        }
    }

    /// A statement starting with a `Name` is either a call (callee is a
    /// procedure) or an assignment (callee is a data object); one symbol
    /// of further lookahead after consuming the name disambiguates, same
    /// as any LL(1) parser (spec §4.5 "AssignmentStatement" /
    /// "ProcedureInvocation").
    fn name_led_statement(&mut self) {
        let line = self.scanner.line_number;
        let word_index = self.scanner.argument.word_index();
        self.advance();
        let (record, found) = self.symbols.find(word_index);
        if found.is_err() {
            self.report(ErrorKind::UnknownName);
        }
        if record.kind == ObjectKind::Procedure {
            self.procedure_call(word_index, record, line, false, false);
            self.expect(Symbol::Semicolon, ";");
        } else {
            self.assignment_statement(record);
        }
    }

    /// `ObjectAccess (',' ObjectAccess)* '=' Expression (',' Expression)*
    /// ';'` (spec §4.5 "AssignmentStatement"; §4.6 "Assign").
    fn assignment_statement(&mut self, first_record: ObjectRecord) {
        let mut target_types = vec![self.object_access_tail(first_record, false)];
        while self.accept(Symbol::Comma) {
            target_types.push(self.object_access(false));
        }
        self.expect(Symbol::Assign, "=");
        let mut value_types = vec![self.expression()];
        while self.accept(Symbol::Comma) {
            value_types.push(self.expression());
        }
        if target_types.len() != value_types.len() {
            self.report(ErrorKind::WrongArity { expected: target_types.len(), found: value_types.len() });
        } else {
            for (t, v) in target_types.iter().zip(value_types.iter()) {
                self.check_types(*t, *v);
            }
        }
        let n = target_types.len() as i32;
        self.emit(Opcode::Assign, &[n]);
        self.expect(Symbol::Semicolon, ";");
    }

    fn if_statement(&mut self) {
        self.expect(Symbol::If, "if");
        self.expect(Symbol::LeftParen, "(");
        let condition = self.expression();
        self.expect(Symbol::RightParen, ")");
        if condition != DataType::Boolean && condition != DataType::Universal {
            self.report(ErrorKind::TypeMismatch);
        }
        let a = self.emit_branch(Opcode::Do);
        self.block();
        if self.accept(Symbol::Else) {
            let b = self.emit_branch(Opcode::Goto);
            self.resolve(a);
            self.block();
            self.resolve(b);
        } else {
            self.resolve(a);
        }
    }

    fn while_statement(&mut self) {
        self.expect(Symbol::While, "while");
        let start = self.assembler.current_address();
        self.expect(Symbol::LeftParen, "(");
        let condition = self.expression();
        self.expect(Symbol::RightParen, ")");
        if condition != DataType::Boolean && condition != DataType::Universal {
            self.report(ErrorKind::TypeMismatch);
        }
        let a = self.emit_branch(Opcode::Do);
        self.block();
        self.emit(Opcode::Goto, &[start]);
        self.resolve(a);
    }

    fn read_statement(&mut self) {
        self.expect(Symbol::Read, "read");
        let ty = self.object_access(false);
        let opcode = if ty == DataType::Boolean { Opcode::ReadBoolean } else { Opcode::ReadInteger };
        self.emit(opcode, &[]);
        self.expect(Symbol::Semicolon, ";");
    }

    fn write_statement(&mut self) {
        self.expect(Symbol::Write, "write");
        let ty = self.expression();
        let opcode = if ty == DataType::Boolean { Opcode::WriteBoolean } else { Opcode::WriteInteger };
        self.emit(opcode, &[]);
        self.expect(Symbol::Semicolon, ";");
    }

    /// `send Expression '->' ObjectAccess ';'`. Push order matches the
    /// VM's pop order (spec §4.6 "Pop channel-handle then value"): the
    /// value is written first in source order and popped last.
    fn send_statement(&mut self) {
        self.expect(Symbol::Send, "send");
        let _value_type = self.expression();
        self.expect(Symbol::Arrow, "->");
        let channel_type = self.object_access(true);
        self.check_channel_type(channel_type);
        self.emit(Opcode::Send, &[]);
        self.expect(Symbol::Semicolon, ";");
    }

    /// `receive ObjectAccess '->' ObjectAccess ';'` (spec §4.6 "Pop address
    /// then channel-handle"). The channel is dereferenced to its handle
    /// (`Value`); the target is left as a bare address for the store.
    fn receive_statement(&mut self) {
        self.expect(Symbol::Receive, "receive");
        let channel_type = self.object_access(true);
        self.check_channel_type(channel_type);
        self.expect(Symbol::Arrow, "->");
        let _target_type = self.object_access(false);
        self.emit(Opcode::Receive, &[]);
        self.expect(Symbol::Semicolon, ";");
    }

    fn open_statement(&mut self) {
        self.expect(Symbol::Open, "open");
        let ty = self.object_access(false);
        self.check_channel_type(ty);
        self.emit(Opcode::Open, &[]);
        self.expect(Symbol::Semicolon, ";");
    }

    fn randomize_statement(&mut self) {
        self.expect(Symbol::Randomize, "randomize");
        let ty = self.object_access(false);
        if ty != DataType::Integer && ty != DataType::Universal {
            self.report(ErrorKind::TypeMismatch);
        }
        self.emit(Opcode::Randomize, &[]);
        self.expect(Symbol::Semicolon, ";");
    }

    /// `parallel Name '(' Arguments ')' ';'` (spec §4.5 "Parallel", §9
    /// "post-fix on a normal call"): identical compilation to a sequential
    /// call except for the final opcode.
    fn parallel_statement(&mut self) {
        let line = self.scanner.line_number;
        self.expect(Symbol::Parallel, "parallel");
        let name_index = self.expect_name("a procedure name");
        let (record, found) = self.symbols.find(name_index);
        if found.is_err() {
            self.report(ErrorKind::UnknownName);
        }
        self.procedure_call(name_index, record, line, true, false);
        self.expect(Symbol::Semicolon, ";");
    }

    // ---- calls ------------------------------------------------------------

    fn skip_call_arguments_on_error(&mut self) {
        if !self.accept(Symbol::LeftParen) {
            return;
        }
        let mut depth = 1;
        while depth > 0 && self.current() != Symbol::EndOfText {
            match self.current() {
                Symbol::LeftParen => depth += 1,
                Symbol::RightParen => depth -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    /// Shared by statement calls, `parallel` calls, and function calls
    /// nested in an expression. `require_return` is set only in the
    /// expression-factor case; `parallel` additionally forbids reference
    /// arguments and a return value, since a spawned node has no shared
    /// store to write a caller's reference into and no way to report a
    /// result back except over a channel (spec §4.7 "no shared variables
    /// except through channels").
    fn procedure_call(
        &mut self,
        name_index: usize,
        record: ObjectRecord,
        line: u32,
        parallel: bool,
        require_return: bool,
    ) -> DataType {
        if record.kind != ObjectKind::Procedure {
            self.report(ErrorKind::WrongKind { expected: "a procedure".to_string() });
            self.skip_call_arguments_on_error();
            return DataType::Universal;
        }

        let signature = self.procedures.get(&name_index).cloned();
        let level = self.symbols.level() as i32 - record.level as i32;
        let header = record.value;
        let has_return = signature.as_ref().map_or(false, |s| s.return_type.is_some());

        if parallel && has_return {
            self.report(ErrorKind::WrongKind {
                expected: "a procedure with no return value (a parallel call cannot report one back)".to_string(),
            });
        }
        if require_return && !has_return {
            self.report(ErrorKind::WrongKind { expected: "a function (a procedure with a return value)".to_string() });
        }

        if has_return {
            self.emit(Opcode::Constant, &[0]);
        }

        self.expect(Symbol::LeftParen, "(");
        let mut argument_count = 0;
        if self.current() != Symbol::RightParen {
            loop {
                let expected = signature.as_ref().and_then(|s| s.params.get(argument_count)).cloned();
                if self.accept(Symbol::Reference) {
                    let actual_type = self.object_access(false);
                    if parallel {
                        self.report(ErrorKind::ReferenceModeMismatch);
                    }
                    match &expected {
                        Some(p) if p.by_reference => self.check_types(p.data_type, actual_type),
                        Some(_) => self.report(ErrorKind::ReferenceModeMismatch),
                        None => {}
                    }
                } else {
                    let actual_type = self.expression();
                    match &expected {
                        Some(p) if !p.by_reference => self.check_types(p.data_type, actual_type),
                        Some(_) => self.report(ErrorKind::ReferenceModeMismatch),
                        None => {}
                    }
                }
                argument_count += 1;
                if !self.accept(Symbol::Comma) {
                    break;
                }
            }
        }
        self.expect(Symbol::RightParen, ")");

        if let Some(sig) = &signature {
            if sig.params.len() != argument_count {
                self.report(ErrorKind::WrongArity { expected: sig.params.len(), found: argument_count });
            }
        }

        let opcode = if parallel { Opcode::Parallel } else { Opcode::ProcedureInvocation };
        self.assembler.emit(opcode, &[level, header], line, &mut self.errors);

        signature.and_then(|s| s.return_type).unwrap_or(DataType::Universal)
    }

    // ---- expressions --------------------------------------------------

    /// `Expression = PrimaryExpr { ('&'|'|') PrimaryExpr }` (spec §4.5).
    fn expression(&mut self) -> DataType {
        let mut ty = self.primary_expr();
        loop {
            let opcode = match self.current() {
                Symbol::Ampersand => Opcode::And,
                Symbol::Pipe => Opcode::Or,
                _ => break,
            };
            self.advance();
            let rhs = self.primary_expr();
            self.check_boolean_operands(ty, rhs);
            self.emit(opcode, &[]);
            ty = DataType::Boolean;
        }
        ty
    }

    /// `PrimaryExpr = Simple [relop Simple]`.
    fn primary_expr(&mut self) -> DataType {
        let ty = self.simple();
        let opcode = match self.current() {
            Symbol::Equal => Some(Opcode::Equal),
            Symbol::NotEqual => Some(Opcode::NotEqual),
            Symbol::Less => Some(Opcode::Less),
            Symbol::LessOrEqual => Some(Opcode::LessOrEqual),
            Symbol::Greater => Some(Opcode::Greater),
            Symbol::GreaterOrEqual => Some(Opcode::GreaterOrEqual),
            _ => None,
        };
        match opcode {
            Some(opcode) => {
                self.advance();
                let rhs = self.simple();
                self.check_arith_operands(ty, rhs);
                self.emit(opcode, &[]);
                DataType::Boolean
            }
            None => ty,
        }
    }

    /// `Simple = [-] Term { ('+'|'-') Term }`. A leading minus directly on
    /// a numeral literal folds at compile time (spec §4.5 "Unary minus on
    /// a constant folds at compile time").
    fn simple(&mut self) -> DataType {
        let negative = self.accept(Symbol::Minus);
        if negative && self.current() == Symbol::Numeral {
            let v = self.scanner.argument.value();
            self.advance();
            self.emit(Opcode::Constant, &[-v]);
            return self.additive_tail(DataType::Integer);
        }
        let ty = self.term();
        if negative {
            if ty != DataType::Integer && ty != DataType::Universal {
                self.report(ErrorKind::TypeMismatch);
            }
            self.emit(Opcode::Minus, &[]);
        }
        self.additive_tail(ty)
    }

    fn additive_tail(&mut self, mut ty: DataType) -> DataType {
        loop {
            let opcode = match self.current() {
                Symbol::Plus => Opcode::Add,
                Symbol::Minus => Opcode::Subtract,
                _ => break,
            };
            self.advance();
            let rhs = self.term();
            self.check_arith_operands(ty, rhs);
            self.emit(opcode, &[]);
            ty = DataType::Integer;
        }
        ty
    }

    /// `Term = Factor { ('*'|'/'|'%'|'^') Factor }`.
    fn term(&mut self) -> DataType {
        let mut ty = self.factor();
        loop {
            let opcode = match self.current() {
                Symbol::Times => Opcode::Multiply,
                Symbol::Divide => Opcode::Divide,
                Symbol::Modulo => Opcode::Modulo,
                Symbol::Power => Opcode::Power,
                _ => break,
            };
            self.advance();
            let rhs = self.factor();
            self.check_arith_operands(ty, rhs);
            self.emit(opcode, &[]);
            ty = DataType::Integer;
        }
        ty
    }

    /// `Factor = Numeral | true | false | ObjectAccess | FunctionCall |
    /// '(' Expression ')' | '!' Factor` (spec §4.5).
    fn factor(&mut self) -> DataType {
        self.skip_lexical_errors();
        match self.current() {
            Symbol::Numeral => {
                let v = self.scanner.argument.value();
                self.advance();
                self.emit(Opcode::Constant, &[v]);
                DataType::Integer
            }
            Symbol::True => {
                self.advance();
                self.emit(Opcode::Constant, &[1]);
                DataType::Boolean
            }
            Symbol::False => {
                self.advance();
                self.emit(Opcode::Constant, &[0]);
                DataType::Boolean
            }
            Symbol::Name => {
                let line = self.scanner.line_number;
                let word_index = self.scanner.argument.word_index();
                self.advance();
                let (record, found) = self.symbols.find(word_index);
                if found.is_err() {
                    self.report(ErrorKind::UnknownName);
                }
                if record.kind == ObjectKind::Procedure {
                    self.procedure_call(word_index, record, line, false, true)
                } else {
                    self.object_access_tail(record, true)
                }
            }
            Symbol::LeftParen => {
                self.advance();
                let ty = self.expression();
                self.expect(Symbol::RightParen, ")");
                ty
            }
            Symbol::Bang => {
                self.advance();
                let ty = self.factor();
                if ty != DataType::Boolean && ty != DataType::Universal {
                    self.report(ErrorKind::TypeMismatch);
                }
                self.emit(Opcode::Not, &[]);
                DataType::Boolean
            }
            _ => {
                self.report(ErrorKind::UnexpectedSymbol { expected: "an expression".to_string() });
                DataType::Universal
            }
        }
    }

    // ---- object access --------------------------------------------------

    fn object_access(&mut self, want_value: bool) -> DataType {
        if self.current() != Symbol::Name {
            self.report(ErrorKind::MissingSymbol { expected: "a name".to_string() });
            return DataType::Universal;
        }
        let word_index = self.scanner.argument.word_index();
        self.advance();
        let (record, found) = self.symbols.find(word_index);
        if found.is_err() {
            self.report(ErrorKind::UnknownName);
        }
        self.object_access_tail(record, want_value)
    }

    /// Compiles the rest of an `ObjectAccess` once the name has already
    /// been looked up (and its token consumed), so statement-level code
    /// that needs one token of extra lookahead to disambiguate a call from
    /// an assignment can still share this (spec §4.5 "ObjectAccess").
    fn object_access_tail(&mut self, record: ObjectRecord, want_value: bool) -> DataType {
        match record.kind {
            ObjectKind::Constant => {
                self.emit(Opcode::Constant, &[record.value]);
                record.data_type
            }
            ObjectKind::Procedure => {
                self.report(ErrorKind::WrongKind { expected: "a variable, not a procedure".to_string() });
                DataType::Universal
            }
            ObjectKind::Undefined => {
                // Sentinel from a failed lookup (already reported); push a
                // dummy value so the surrounding expression/statement
                // keeps a plausible stack shape. Compilation has already
                // failed, so the exact bytes no longer matter.
                self.emit(Opcode::Constant, &[0]);
                DataType::Universal
            }
            ObjectKind::Array => {
                self.emit_variable_address(record);
                self.expect(Symbol::LeftBracket, "[");
                let index_type = self.expression();
                if index_type != DataType::Integer && index_type != DataType::Universal {
                    self.report(ErrorKind::NonIntegerIndex);
                }
                self.expect(Symbol::RightBracket, "]");
                self.emit(Opcode::Index, &[record.value]);
                if want_value {
                    self.emit(Opcode::Value, &[]);
                }
                record.data_type
            }
            ObjectKind::ReferenceParameter => {
                let level = self.symbols.level() as i32 - record.level as i32;
                self.emit(Opcode::ReferenceParameter, &[level, record.value]);
                if want_value {
                    self.emit(Opcode::Value, &[]);
                }
                record.data_type
            }
            ObjectKind::Variable | ObjectKind::ValueParameter | ObjectKind::ReturnParameter => {
                self.emit_variable_address(record);
                if want_value {
                    self.emit(Opcode::Value, &[]);
                }
                record.data_type
            }
        }
    }

    fn emit_variable_address(&mut self, record: ObjectRecord) {
        let level = self.symbols.level() as i32 - record.level as i32;
        self.emit(Opcode::Variable, &[level, record.value]);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scanner::StrCharSource;
    use sachin::opcode::Opcode;
    use num_traits::FromPrimitive;

    fn compile_ok(source: &str) -> Vec<i32> {
        let output = compile(StrCharSource::new(source));
        assert!(output.success, "expected success, got errors: {:?}", output.errors.errors());
        output.code
    }

    fn opcodes_in(code: &[i32]) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let mut i = 0;
        while i < code.len() {
            let op = Opcode::from_i32(code[i]).expect("valid opcode");
            ops.push(op);
            i += 1 + op.arity();
        }
        ops
    }

    #[test]
    fn empty_program_compiles() {
        let code = compile_ok("{ }");
        assert_eq!(code[0], Opcode::Program as i32);
        assert_eq!(*code.last().unwrap(), Opcode::EndProgram as i32);
    }

    #[test]
    fn variable_declaration_and_assignment() {
        let code = compile_ok("{ integer x; x = 1 + 2; write x; }");
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::Assign));
        assert!(ops.contains(&Opcode::Add));
        assert!(ops.contains(&Opcode::WriteInteger));
    }

    #[test]
    fn if_else_emits_both_branches() {
        let code = compile_ok("{ integer x; if (x == 0) { x = 1; } else { x = 2; } }");
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::Do));
        assert!(ops.contains(&Opcode::Goto));
        assert!(ops.contains(&Opcode::Equal));
    }

    #[test]
    fn while_loop_jumps_back() {
        let code = compile_ok("{ integer x; x = 0; while (x < 3) { x = x + 1; } }");
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::Do));
        assert!(ops.contains(&Opcode::Less));
    }

    #[test]
    fn function_call_and_recursion() {
        let code = compile_ok(
            "{ @ fact(integer n) -> integer result { if (n <= 1) { result = 1; } else { result = n * fact(n - 1); } } integer y; y = fact(5); write y; }",
        );
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::ProcedureInvocation));
        assert!(ops.contains(&Opcode::ProcedureBlock));
        assert!(ops.contains(&Opcode::EndProcedureBlock));
    }

    #[test]
    fn array_index_and_bounds() {
        let code = compile_ok("{ integer a[5]; a[1] = 9; write a[1]; }");
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::Index));
    }

    #[test]
    fn channel_open_send_receive() {
        let code = compile_ok("{ channel c; integer x; open c; send 1 -> c; receive c -> x; }");
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::Open));
        assert!(ops.contains(&Opcode::Send));
        assert!(ops.contains(&Opcode::Receive));
    }

    #[test]
    fn parallel_call_reuses_procedure_invocation_shape() {
        let code = compile_ok("{ @ noop() { } parallel noop(); }");
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::Parallel));
    }

    #[test]
    fn unknown_name_is_reported_but_does_not_panic() {
        let output = compile(StrCharSource::new("{ x = 1; }"));
        assert!(!output.success);
        assert!(output.errors.errors().iter().any(|e| e.kind == ErrorKind::UnknownName));
    }

    #[test]
    fn redeclaration_is_reported() {
        let output = compile(StrCharSource::new("{ integer x; integer x; }"));
        assert!(!output.success);
        assert!(output.errors.errors().iter().any(|e| e.kind == ErrorKind::Redeclaration));
    }

    #[test]
    fn division_by_constant_type_mismatch_is_reported() {
        let output = compile(StrCharSource::new("{ boolean b; integer x; x = b + 1; }"));
        assert!(!output.success);
        assert!(output.errors.errors().iter().any(|e| e.kind == ErrorKind::TypeMismatch));
    }

    #[test]
    fn reference_parameter_swap() {
        let code = compile_ok(
            "{ @ swap(reference integer a, reference integer b) { integer t; t = a; a = b; b = t; } integer x; integer y; x = 1; y = 2; swap(reference x, reference y); }",
        );
        let ops = opcodes_in(&code);
        assert!(ops.contains(&Opcode::ReferenceParameter));
    }

    #[test]
    fn unknown_character_is_reported_and_recovered() {
        let output = compile(StrCharSource::new("{ integer x; x = 1 $ 2; }"));
        assert!(!output.success);
        assert!(output.errors.errors().iter().any(|e| e.kind == ErrorKind::UnknownCharacter));
    }

    #[test]
    fn missing_closing_brace_is_reported() {
        let output = compile(StrCharSource::new("{ integer x;"));
        assert!(!output.success);
        assert!(output
            .errors
            .errors()
            .iter()
            .any(|e| matches!(&e.kind, ErrorKind::MissingSymbol { .. })));
    }

    #[test]
    fn wrong_arity_call_is_reported() {
        let output = compile(StrCharSource::new(
            "{ @ addOne(integer n) -> integer result { result = n + 1; } integer y; y = addOne(1, 2); }",
        ));
        assert!(!output.success);
        assert!(output
            .errors
            .errors()
            .iter()
            .any(|e| matches!(&e.kind, ErrorKind::WrongArity { .. })));
    }

    #[test]
    fn non_integer_index_is_reported() {
        let output = compile(StrCharSource::new("{ integer a[5]; boolean b; a[b] = 1; }"));
        assert!(!output.success);
        assert!(output.errors.errors().iter().any(|e| e.kind == ErrorKind::NonIntegerIndex));
    }

    #[test]
    fn non_constant_array_bound_is_reported() {
        let output = compile(StrCharSource::new("{ integer n; integer a[n]; }"));
        assert!(!output.success);
        assert!(output.errors.errors().iter().any(|e| e.kind == ErrorKind::NonConstant));
    }

    #[test]
    fn reference_mode_mismatch_is_reported() {
        let output = compile(StrCharSource::new(
            "{ @ swap(reference integer a, reference integer b) { integer t; t = a; a = b; b = t; } integer x; integer y; x = 1; y = 2; swap(x, y); }",
        ));
        assert!(!output.success);
        assert!(output.errors.errors().iter().any(|e| e.kind == ErrorKind::ReferenceModeMismatch));
    }
}

use num_derive::{FromPrimitive, ToPrimitive};
use sachin_util_derive::{EnumFromStr, VariantName};

/// The closed instruction set of the intermediate code (spec §6.2).
///
/// Every variant's operand count is fixed and is given by [`Opcode::arity`].
/// The discriminant order below *is* the wire encoding: `Opcode::from_i32`
/// and `opcode as i32` must round-trip, so new opcodes are appended at the
/// end, never inserted.
///
/// `Parallel`'s arity is 2 (level, entry-slot address), matching
/// `ProcedureInvocation` exactly: the compiler emits the identical
/// argument-push sequence and operand pair for a parallel call, swapping
/// only the final opcode tag (spec §9 "differing only in the final
/// opcode"). See `DESIGN.md` for why this overrides the arity-0 entry in
/// the external wire-format listing.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Hash, FromPrimitive, ToPrimitive, VariantName, EnumFromStr,
)]
pub enum Opcode {
    Program,
    EndProgram,
    ProcedureBlock,
    EndProcedureBlock,
    ProcedureInvocation,
    Block,
    EndBlock,
    Variable,
    ReferenceParameter,
    Index,
    Constant,
    Value,
    Do,
    Goto,
    Assign,
    ReadBoolean,
    ReadInteger,
    WriteBoolean,
    WriteInteger,
    Minus,
    Add,
    Subtract,
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Not,
    Multiply,
    Divide,
    Modulo,
    Power,
    Open,
    Randomize,
    Send,
    Receive,
    Parallel,
}

impl Opcode {
    /// Number of operand words following this opcode in the code image.
    pub fn arity(self) -> usize {
        use Opcode::*;
        match self {
            Program => 1,
            EndProgram => 0,
            ProcedureBlock => 1,
            EndProcedureBlock => 1,
            ProcedureInvocation => 2,
            Block => 1,
            EndBlock => 0,
            Variable => 2,
            ReferenceParameter => 2,
            Index => 1,
            Constant => 1,
            Value => 0,
            Do => 1,
            Goto => 1,
            Assign => 1,
            ReadBoolean => 0,
            ReadInteger => 0,
            WriteBoolean => 0,
            WriteInteger => 0,
            Minus => 0,
            Add => 0,
            Subtract => 0,
            Less => 0,
            LessOrEqual => 0,
            Equal => 0,
            NotEqual => 0,
            Greater => 0,
            GreaterOrEqual => 0,
            And => 0,
            Or => 0,
            Not => 0,
            Multiply => 0,
            Divide => 0,
            Modulo => 0,
            Power => 0,
            Open => 0,
            Randomize => 0,
            Send => 0,
            Receive => 0,
            Parallel => 2,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn round_trips_through_i32() {
        let all = [
            Opcode::Program,
            Opcode::EndProgram,
            Opcode::ProcedureBlock,
            Opcode::EndProcedureBlock,
            Opcode::ProcedureInvocation,
            Opcode::Block,
            Opcode::EndBlock,
            Opcode::Variable,
            Opcode::ReferenceParameter,
            Opcode::Index,
            Opcode::Constant,
            Opcode::Value,
            Opcode::Do,
            Opcode::Goto,
            Opcode::Assign,
            Opcode::ReadBoolean,
            Opcode::ReadInteger,
            Opcode::WriteBoolean,
            Opcode::WriteInteger,
            Opcode::Minus,
            Opcode::Add,
            Opcode::Subtract,
            Opcode::Less,
            Opcode::LessOrEqual,
            Opcode::Equal,
            Opcode::NotEqual,
            Opcode::Greater,
            Opcode::GreaterOrEqual,
            Opcode::And,
            Opcode::Or,
            Opcode::Not,
            Opcode::Multiply,
            Opcode::Divide,
            Opcode::Modulo,
            Opcode::Power,
            Opcode::Open,
            Opcode::Randomize,
            Opcode::Send,
            Opcode::Receive,
            Opcode::Parallel,
        ];

        for op in all.iter().copied() {
            let encoded = op.to_i32().unwrap();
            assert_eq!(Opcode::from_i32(encoded), Some(op));
        }
    }

    #[test]
    fn program_and_end_program_have_expected_arity() {
        assert_eq!(Opcode::Program.arity(), 1);
        assert_eq!(Opcode::EndProgram.arity(), 0);
        assert_eq!(Opcode::Parallel.arity(), Opcode::ProcedureInvocation.arity());
    }
}

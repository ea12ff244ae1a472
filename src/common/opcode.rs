/// A single opcode. Under the hood this is just a byte, so that non-opcode
/// bytes (operands) can be interleaved in the same code stream.
///
/// Opcodes that take an operand wider than a single byte come in pairs: the
/// short form takes a 1-byte operand, the long form (`*Long`) the matching
/// 3-byte big-endian operand. The compiler picks short or long automatically
/// based on how large the operand's index would need to be (see
/// `compiler::compiler::Compiler::emit_constant` and friends). Keeping the
/// pair adjacent in this enum is not required for correctness, but it keeps
/// `is_long`/`short_of` trivial.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Opcode {
    /// Push constants[operand] (1-byte operand).
    Constant = 0,
    /// Push constants[operand] (3-byte big-endian operand).
    ConstantLong = 1,
    /// Push `nil`.
    Nil = 2,
    /// Push `true`.
    True = 3,
    /// Push `false`.
    False = 4,
    /// Pop the top of the stack.
    Pop = 5,
    /// Push frame.slots[operand] (1-byte operand).
    GetLocal = 6,
    /// frame.slots[operand] = peek(0); does not pop (1-byte operand).
    SetLocal = 7,
    /// Push the value of the global named by constants[operand] (1-byte).
    GetGlobal = 8,
    /// Push the value of the global named by constants[operand] (3-byte).
    GetGlobalLong = 9,
    /// Assign peek(0) to the global named by constants[operand]; errors if
    /// the global does not already exist (1-byte).
    SetGlobal = 10,
    /// Assign peek(0) to the global named by constants[operand]; errors if
    /// the global does not already exist (3-byte).
    SetGlobalLong = 11,
    /// Define a new global named by constants[operand], consuming peek(0)
    /// as its initial value (1-byte).
    DefineGlobal = 12,
    /// Define a new global named by constants[operand], consuming peek(0)
    /// as its initial value (3-byte).
    DefineGlobalLong = 13,
    /// Push the value the current closure's upvalues[operand] points to
    /// (1-byte operand).
    GetUpvalue = 14,
    /// Assign peek(0) to the location the current closure's
    /// upvalues[operand] points to; does not pop (1-byte operand).
    SetUpvalue = 15,
    /// Pop two values, push whether they are equal.
    Equal = 16,
    /// Pop two values, push whether they are unequal.
    NotEqual = 17,
    /// Pop two numbers, push `a > b`.
    Greater = 18,
    /// Pop two numbers, push `a >= b`.
    GreaterEqual = 19,
    /// Pop two numbers, push `a < b`.
    Less = 20,
    /// Pop two numbers, push `a <= b`.
    LessEqual = 21,
    /// Pop two values; if both strings, concatenate; if both numbers, sum;
    /// otherwise a runtime error.
    Add = 22,
    /// Pop two numbers, push their difference.
    Subtract = 23,
    /// Pop two numbers, push their product.
    Multiply = 24,
    /// Pop two numbers, push their quotient.
    Divide = 25,
    /// Pop one value, push its logical negation.
    Not = 26,
    /// Negate the number on top of the stack in place.
    Negate = 27,
    /// Pop and print a value's canonical textual form with a trailing
    /// newline.
    Print = 28,
    /// Unconditional forward jump (2-byte operand).
    Jump = 29,
    /// Jump forward if `is_falsey(peek(0))`; always leaves the condition
    /// value on the stack (2-byte operand).
    JumpIfFalse = 30,
    /// Unconditional backward jump, i.e. a loop back-edge (2-byte operand).
    Loop = 31,
    /// Call peek(operand) with `operand` arguments already pushed above it
    /// (1-byte operand = argc).
    Call = 32,
    /// Optimised `receiver.method(args)`: method-name constant (1-byte) then
    /// argc (1-byte).
    Invoke = 33,
    /// Optimised `receiver.method(args)`: method-name constant (3-byte) then
    /// argc (1-byte).
    InvokeLong = 34,
    /// Optimised `super.method(args)`: method-name constant (1-byte) then
    /// argc (1-byte).
    SuperInvoke = 35,
    /// Optimised `super.method(args)`: method-name constant (3-byte) then
    /// argc (1-byte).
    SuperInvokeLong = 36,
    /// Build a closure over constants[operand] (a Function), followed by
    /// `function.upvalue_count` `(is_local, index)` byte pairs (1-byte
    /// operand for the function constant).
    Closure = 37,
    /// Close the open upvalue (if any) pointing at the stack slot holding
    /// the top-of-stack value, then pop it.
    CloseUpvalue = 38,
    /// Pop the return value, close upvalues at or above the frame, pop the
    /// frame, and push the return value for the caller (or halt if this was
    /// the last frame).
    Return = 39,
    /// Push a new empty class named by constants[operand] (1-byte).
    Class = 40,
    /// Push a new empty class named by constants[operand] (3-byte).
    ClassLong = 41,
    /// Read the field/method named by constants[operand] off peek(0)
    /// (1-byte).
    GetProperty = 42,
    /// Read the field/method named by constants[operand] off peek(0)
    /// (3-byte).
    GetPropertyLong = 43,
    /// Write peek(0) into the field named by constants[operand] on peek(1)
    /// (1-byte).
    SetProperty = 44,
    /// Write peek(0) into the field named by constants[operand] on peek(1)
    /// (3-byte).
    SetPropertyLong = 45,
    /// Copy every method from the superclass (peek(1)) into the subclass
    /// (peek(0)).
    Inherit = 46,
    /// Bind the closure on top of the stack as a method named by
    /// constants[operand] on the class just below it (1-byte).
    Method = 47,
    /// Bind the closure on top of the stack as a method named by
    /// constants[operand] on the class just below it (3-byte).
    MethodLong = 48,
    /// `super.name` not followed by a call: pop `super`'s class and `this`
    /// (already pushed by the compiler), look up the method named by
    /// constants[operand] on that class, and push the resulting bound
    /// method; errors if the class has no such method (1-byte).
    GetSuper = 49,
    /// As `GetSuper`, but with a 3-byte method-name constant.
    GetSuperLong = 50,
}

impl Opcode {
    /// Converts a raw byte back into an `Opcode`. Bytecode is only ever
    /// produced by the compiler in this crate, and an opcode byte is only
    /// ever read from a position the compiler itself wrote an opcode to, so
    /// this is total over the bytes that can actually occur at the head of
    /// an instruction; `None` otherwise.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0 => Constant,
            1 => ConstantLong,
            2 => Nil,
            3 => True,
            4 => False,
            5 => Pop,
            6 => GetLocal,
            7 => SetLocal,
            8 => GetGlobal,
            9 => GetGlobalLong,
            10 => SetGlobal,
            11 => SetGlobalLong,
            12 => DefineGlobal,
            13 => DefineGlobalLong,
            14 => GetUpvalue,
            15 => SetUpvalue,
            16 => Equal,
            17 => NotEqual,
            18 => Greater,
            19 => GreaterEqual,
            20 => Less,
            21 => LessEqual,
            22 => Add,
            23 => Subtract,
            24 => Multiply,
            25 => Divide,
            26 => Not,
            27 => Negate,
            28 => Print,
            29 => Jump,
            30 => JumpIfFalse,
            31 => Loop,
            32 => Call,
            33 => Invoke,
            34 => InvokeLong,
            35 => SuperInvoke,
            36 => SuperInvokeLong,
            37 => Closure,
            38 => CloseUpvalue,
            39 => Return,
            40 => Class,
            41 => ClassLong,
            42 => GetProperty,
            43 => GetPropertyLong,
            44 => SetProperty,
            45 => SetPropertyLong,
            46 => Inherit,
            47 => Method,
            48 => MethodLong,
            49 => GetSuper,
            50 => GetSuperLong,
            _ => return None,
        })
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

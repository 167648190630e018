//! Instrumentation sites of the snippet machine
//!
//! Every evaluation or execution step the machine performs corresponds to one
//! `Op`. The discriminant doubles as the coverage bitmap index, so values are
//! fixed and must stay below the bitmap size.
//!
//! ```text
//! 0x01-0x0F  expressions
//! 0x10-0x1F  calls and unwinding
//! 0x20-0x2F  simple statements
//! 0x30-0x3F  control flow
//! 0x40-0x4F  declarations and packages
//! ```

use std::fmt;

/// Machine operations (one bitmap slot each)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Op {
    // Expressions
    /// Literal constant
    Literal = 0x01,
    /// Identifier lookup
    Name = 0x02,
    /// `pkg.Member` selector
    Selector = 0x03,
    /// `x[i]`
    Index = 0x04,
    /// `x[a:b]`
    Slice = 0x05,
    /// `[]T{...}`
    CompositeList = 0x06,
    /// `map[K]V{...}`
    CompositeMap = 0x07,
    /// Unary `-` / `!`
    Unary = 0x08,
    /// Arithmetic and comparison
    Binary = 0x09,
    /// Short-circuit `&&`
    LogicalAnd = 0x0A,
    /// Short-circuit `||`
    LogicalOr = 0x0B,

    // Calls
    /// Call of a snippet-defined function
    Call = 0x10,
    /// Call of a host-provided function
    CallNative = 0x11,
    /// Call of a builtin (`len`, `append`, ...)
    CallBuiltin = 0x12,
    /// `return`
    Return = 0x13,
    /// `defer` registration
    Defer = 0x14,
    /// `panic(...)` raised
    Panic1 = 0x15,
    /// Fault unwinding through a frame with deferred calls
    Panic2 = 0x16,

    // Simple statements
    /// `x := e`
    Define = 0x20,
    /// `x = e`, `x += e`, `x -= e`
    Assign = 0x21,
    /// `x[i] = e`
    AssignIndex = 0x22,
    /// `x++` / `x--`
    IncDec = 0x23,
    /// Expression statement
    ExprStmt = 0x24,
    /// Block entry
    Block = 0x25,

    // Control flow
    /// `if` condition evaluated
    IfCond = 0x30,
    /// `else` branch taken
    IfElse = 0x31,
    /// One iteration of a `for` loop
    ForLoop = 0x32,
    /// One iteration of `range` over a list
    RangeIterList = 0x33,
    /// One iteration of `range` over a string
    RangeIterString = 0x34,
    /// One iteration of `range` over a map
    RangeIterMap = 0x35,
    /// `break`
    Break = 0x36,
    /// `continue`
    Continue = 0x37,
    /// `switch` statement entered
    SwitchClause = 0x38,
    /// `case` expression compared
    SwitchClauseCase = 0x39,
    /// `default` clause taken
    SwitchDefault = 0x3A,

    // Declarations
    /// `var` / `const`
    VarDecl = 0x40,
    /// `func` registered
    FuncDecl = 0x41,
    /// Import resolved
    Import = 0x42,
}

impl Op {
    /// Every opcode, in discriminant order
    pub const ALL: [Op; 38] = [
        Op::Literal,
        Op::Name,
        Op::Selector,
        Op::Index,
        Op::Slice,
        Op::CompositeList,
        Op::CompositeMap,
        Op::Unary,
        Op::Binary,
        Op::LogicalAnd,
        Op::LogicalOr,
        Op::Call,
        Op::CallNative,
        Op::CallBuiltin,
        Op::Return,
        Op::Defer,
        Op::Panic1,
        Op::Panic2,
        Op::Define,
        Op::Assign,
        Op::AssignIndex,
        Op::IncDec,
        Op::ExprStmt,
        Op::Block,
        Op::IfCond,
        Op::IfElse,
        Op::ForLoop,
        Op::RangeIterList,
        Op::RangeIterString,
        Op::RangeIterMap,
        Op::Break,
        Op::Continue,
        Op::SwitchClause,
        Op::SwitchClauseCase,
        Op::SwitchDefault,
        Op::VarDecl,
        Op::FuncDecl,
        Op::Import,
    ];

    /// Bitmap index of this opcode
    #[inline]
    pub const fn index(self) -> usize {
        self as u16 as usize
    }

    /// Look an opcode up by its bitmap index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.index() == index)
    }

    /// Short mnemonic
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Literal => "lit",
            Op::Name => "name",
            Op::Selector => "sel",
            Op::Index => "index",
            Op::Slice => "slice",
            Op::CompositeList => "list",
            Op::CompositeMap => "map",
            Op::Unary => "unary",
            Op::Binary => "binary",
            Op::LogicalAnd => "and",
            Op::LogicalOr => "or",
            Op::Call => "call",
            Op::CallNative => "call.native",
            Op::CallBuiltin => "call.builtin",
            Op::Return => "ret",
            Op::Defer => "defer",
            Op::Panic1 => "panic",
            Op::Panic2 => "unwind",
            Op::Define => "define",
            Op::Assign => "assign",
            Op::AssignIndex => "assign.index",
            Op::IncDec => "incdec",
            Op::ExprStmt => "expr",
            Op::Block => "block",
            Op::IfCond => "if",
            Op::IfElse => "else",
            Op::ForLoop => "for",
            Op::RangeIterList => "range.list",
            Op::RangeIterString => "range.string",
            Op::RangeIterMap => "range.map",
            Op::Break => "break",
            Op::Continue => "continue",
            Op::SwitchClause => "switch",
            Op::SwitchClauseCase => "case",
            Op::SwitchDefault => "default",
            Op::VarDecl => "var",
            Op::FuncDecl => "func",
            Op::Import => "import",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

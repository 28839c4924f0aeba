//! The operator alphabet of defined function bodies.
//!
//! Bodies are straight-line operator sequences over an operand stack; the
//! structured control flow of full WebAssembly belongs to the code-generating
//! collaborator, not to this crate.

use crate::module::{FuncIndex, GlobalIndex, SignatureIndex, TableIndex};
use crate::types::ValueType;

/// A single operator of a function body.
#[derive(Copy, Clone, Debug)]
pub enum Operator {
    /// Traps unconditionally.
    Unreachable,
    /// Does nothing.
    Nop,
    /// Pops and discards the top operand.
    Drop,
    /// Pops a condition and two operands, pushing the first if the condition
    /// is non-zero and the second otherwise.
    Select,
    /// Returns the values currently on the stack.
    Return,

    /// Pushes the value of a local.
    LocalGet(u32),
    /// Pops a value into a local.
    LocalSet(u32),
    /// Stores the top of stack into a local, leaving it on the stack.
    LocalTee(u32),
    /// Pushes the value of a global.
    GlobalGet(GlobalIndex),
    /// Pops a value into a mutable global.
    GlobalSet(GlobalIndex),

    /// Pushes an `i32` constant.
    I32Const(i32),
    /// Pushes an `i64` constant.
    I64Const(i64),
    /// Pushes an `f32` constant, given as raw bits.
    F32Const(u32),
    /// Pushes an `f64` constant, given as raw bits.
    F64Const(u64),
    /// Pushes a `v128` constant.
    V128Const(u128),
    /// Pushes the null reference.
    RefNull,
    /// Pushes a reference to the given function.
    RefFunc(FuncIndex),

    /// `i32` addition.
    I32Add,
    /// `i32` subtraction.
    I32Sub,
    /// `i32` multiplication.
    I32Mul,
    /// Signed `i32` division; traps on division by zero and overflow.
    I32DivS,
    /// Unsigned `i32` division; traps on division by zero.
    I32DivU,
    /// Signed `i32` remainder; traps on division by zero.
    I32RemS,
    /// Unsigned `i32` remainder; traps on division by zero.
    I32RemU,
    /// `i64` addition.
    I64Add,
    /// `i64` subtraction.
    I64Sub,
    /// `i64` multiplication.
    I64Mul,
    /// Signed `i64` division; traps on division by zero and overflow.
    I64DivS,
    /// Unsigned `i64` division; traps on division by zero.
    I64DivU,
    /// `f32` addition.
    F32Add,
    /// `f32` subtraction.
    F32Sub,
    /// `f32` multiplication.
    F32Mul,
    /// `f32` division.
    F32Div,
    /// `f64` addition.
    F64Add,
    /// `f64` subtraction.
    F64Sub,
    /// `f64` multiplication.
    F64Mul,
    /// `f64` division.
    F64Div,

    /// Loads an `i32` from memory 0 at `popped address + offset`.
    I32Load {
        /// Static offset added to the popped address.
        offset: u32,
    },
    /// Loads an `i64` from memory 0.
    I64Load {
        /// Static offset added to the popped address.
        offset: u32,
    },
    /// Stores an `i32` to memory 0.
    I32Store {
        /// Static offset added to the popped address.
        offset: u32,
    },
    /// Stores an `i64` to memory 0.
    I64Store {
        /// Static offset added to the popped address.
        offset: u32,
    },
    /// Pushes the current size of memory 0, in pages.
    MemorySize,
    /// Pops a page delta and grows memory 0, pushing the old size or -1.
    MemoryGrow,

    /// Calls the function at the given index in the function index space.
    Call(FuncIndex),
    /// Pops a table index and calls through the table, checking the callee's
    /// signature token against the given signature.
    CallIndirect {
        /// The expected signature of the callee.
        ty: SignatureIndex,
        /// The table holding the callees.
        table: TableIndex,
    },
}

/// The body of a defined function: declared locals plus a straight-line
/// operator sequence. Falling off the end returns the operand stack as the
/// function's results.
#[derive(Clone, Debug, Default)]
pub struct FunctionBody {
    /// Types of declared locals; parameters precede these in the local index
    /// space.
    pub locals: Vec<ValueType>,
    /// The operator sequence.
    pub code: Vec<Operator>,
}

impl FunctionBody {
    /// A body with no locals executing the given operators.
    pub fn new(code: Vec<Operator>) -> FunctionBody {
        FunctionBody {
            locals: Vec::new(),
            code,
        }
    }
}

//! Trap codes shared between the runtime and code executors.

use std::fmt;

/// The reason a WebAssembly execution trapped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrapCode {
    /// The call stack was exhausted.
    StackOverflow,

    /// An out-of-bounds linear-memory access.
    MemoryOutOfBounds,

    /// An out-of-bounds table access.
    TableOutOfBounds,

    /// A load or store faulted outside any guard region the runtime knows
    /// about.
    AccessViolation,

    /// An indirect call through a null table element.
    IndirectCallToNull,

    /// The signature of an indirect callee did not match the call site.
    BadSignature,

    /// An integer arithmetic operation overflowed.
    IntegerOverflow,

    /// An integer division by zero.
    IntegerDivisionByZero,

    /// An `unreachable` operator was executed.
    UnreachableCodeReached,

    /// An exception propagated out of WebAssembly without a handler.
    UnhandledException,
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TrapCode::*;
        let desc = match self {
            StackOverflow => "call stack exhausted",
            MemoryOutOfBounds => "out of bounds memory access",
            TableOutOfBounds => "out of bounds table access",
            AccessViolation => "access violation",
            IndirectCallToNull => "uninitialized table element",
            BadSignature => "indirect call type mismatch",
            IntegerOverflow => "integer overflow",
            IntegerDivisionByZero => "integer divide by zero",
            UnreachableCodeReached => "unreachable executed",
            UnhandledException => "unhandled exception",
        };
        f.write_str(desc)
    }
}

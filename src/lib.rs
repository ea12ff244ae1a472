//! # corvid
//! A tree-less, single-pass compiler and bytecode VM for a small dynamically
//! typed, class-based scripting language.
//!
//! ## Overview of the compilation process
//! Source text is compiled directly to bytecode in one pass: there is no
//! intermediate AST. The [`compiler`] module drives a Pratt parser
//! ([`compiler::scanner`] produces tokens, [`compiler::rules`] maps token
//! kinds to parsing functions) that emits [`chunk::Chunk`] bytecode as it
//! goes. Compilation can fail with one or more [`compiler::Syntax`] errors,
//! collected via panic-mode recovery so a single malformed statement doesn't
//! cascade into a wall of errors.
//!
//! The resulting top-level function is wrapped in a closure and handed to
//! [`vm::Vm`] for execution. The VM is a stack machine: a value stack, a
//! call-frame stack, a globals table, and a dispatch loop over [`Chunk`]
//! bytecode. Runtime faults surface as [`vm::InterpretError::Runtime`],
//! carrying a [`vm::Trace`] of the call stack at the point of failure.
//!
//! Heap-allocated values (strings, functions, closures, classes, instances)
//! live behind [`object::ObjRef`] handles in a [`gc::Gc`]-owned heap, which
//! is collected by precise mark-and-sweep.
//!
//! [`Chunk`]: chunk::Chunk

pub mod chunk;
pub mod common;
pub mod compiler;
pub mod gc;
pub mod native;
pub mod object;
pub mod table;
pub mod value;
pub mod vm;

pub use chunk::Chunk;
pub use compiler::{compile, ErrorAt, Syntax};
pub use gc::Gc;
pub use value::Value;
pub use vm::{InterpretError, Trace, Vm};

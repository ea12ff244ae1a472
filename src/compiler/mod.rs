//! The compiler turns source text directly into bytecode in a single pass,
//! with no intermediate AST:
//! ~> Source (string)
//! -> Tokens          : scanner.rs
//! -> Bytecode        : compiler.rs, driven by the table in rules.rs
//! ~> Run (result)    : vm::Vm

pub mod compiler;
pub mod rules;
pub mod scanner;
pub mod syntax;

pub use compiler::compile;
pub use syntax::{ErrorAt, Syntax};

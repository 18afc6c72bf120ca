// Library entry exposing assembler modules.
pub mod assembler;
pub mod directives;
pub mod emitter;
pub mod error;
pub mod instructions;
pub mod labels;
pub mod operands;
pub mod registers;

//! Compiler from a scripting-language AST to SB bytecode.
//!
//! The input is a parsed [`ast::Script`]; the output is a
//! [`sable_bytecode::CompiledScript`] ready to be serialized into an `.sb`
//! container. Compilation runs in two passes: a declaration scan that
//! registers functions, statics and identifiers, and a code generation pass
//! that wraps the remaining top-level statements into the synthetic `_main_`
//! entry function and emits the per-function instruction streams.
//!
//! ```
//! use sable_compiler::{Compiler, ast};
//!
//! let script = ast::Script {
//!     body: vec![ast::Stmt::var(
//!         1,
//!         ast::VarKind::Int,
//!         "x",
//!         Some(ast::Expr::int(1, 1)),
//!     )],
//! };
//! let compiled = Compiler::new("demo.sc").compile(&script)?;
//! assert_eq!(compiled.entry_point, 0);
//! # Ok::<(), sable_compiler::CompileError>(())
//! ```

pub mod ast;
pub mod compiler;
pub mod error;

mod frame;
mod scanner;
mod state;

pub use compiler::Compiler;
pub use error::{CompileError, ErrorKind, Location, Result};

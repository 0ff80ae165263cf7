//! The partition-expression language.
//!
//! A deliberately small expression dialect evaluated against one envelope
//! at a time: literals, identifier references, member access on the bound
//! envelope, arithmetic/comparison/ternary operators, and an
//! `if (..) { return ..; } else { return ..; }` statement form. Source
//! strings compile once into an AST and are cached for the process
//! lifetime; there is no general-purpose scripting runtime behind this.

pub mod binding;
pub mod cache;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use binding::envelope_context;
pub use cache::{CompiledExpr, ExprCache};
pub use error::ExprError;
pub use eval::Context;
pub use value::Value;

//! SAPL document compiler.
//!
//! Turns policy documents into [`Compiled`](sapl_core::Compiled) voters of
//! the cheapest nature that is still correct: constants are folded at
//! compile time, subscription-dependent parts become pure functions of the
//! evaluation context, and anything touching attributes becomes a stream
//! that recomputes whenever an input changes.

pub mod attribute;
pub mod combining;
pub mod context;
pub mod document;
pub mod expression;
pub mod filter;
pub mod policy;
pub mod policy_set;

pub use attribute::{ATTRIBUTE_FINDER_OPTIONS, SAPL_VARIABLE, compile_attribute, resolve_options};
pub use combining::{combine_votes, compile_combination, validate_pdp_algorithm};
pub use context::CompilationContext;
pub use document::{CompiledDocument, compile_document, compile_target};
pub use expression::compile_expression;
pub use filter::compile_filter;
pub use policy::compile_policy;
pub use policy_set::compile_policy_set;

pub type Result<T> = std::result::Result<T, sapl_core::CompileError>;

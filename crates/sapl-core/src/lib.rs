//! Core types of the SAPL decision engine.
//!
//! This crate holds everything the compiler and the decision point share:
//! the immutable [`Value`] model, the policy AST consumed by the compiler,
//! the [`Compiled`] artifact natures, the per-evaluation
//! [`EvaluationContext`], broker contracts, decisions and votes, and the
//! stream combinators used for reactive recomputation.

pub mod algorithm;
pub mod ast;
pub mod broker;
pub mod context;
pub mod decision;
pub mod error;
pub mod expression;
pub mod reactive;
pub mod value;
pub mod vote;

pub use algorithm::{CombiningAlgorithm, DefaultDecision, ErrorHandling, VotingMode};
pub use broker::{
    AttributeBroker, AttributeFinderInvocation, AttributeFinderOptions, Clock, FixedClock, FunctionBroker,
    NoAttributeBroker, NoFunctionBroker, SystemClock,
};
pub use context::EvaluationContext;
pub use decision::{AuthorizationDecision, AuthorizationSubscription, Decision};
pub use error::{CompileError, CompileErrorKind, CoreError, Result, SourceLocation};
pub use expression::{Compiled, CompiledExpression, Nature};
pub use value::{AttributeRecord, ErrorValue, ObjectMap, Value, ValueKind, ValueMetadata};
pub use vote::{Outcome, TargetHit, TimestampedVote, Vote, VoteWithCoverage, VoterKind, VoterMetadata};

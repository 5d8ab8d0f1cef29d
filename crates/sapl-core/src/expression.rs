//! Compiled artifacts and their evaluation natures.
//!
//! A compiled artifact is either a constant, a pure function of the
//! [`EvaluationContext`], or a stream factory. Composition always yields the
//! widest nature among its parts (constant < pure < stream).

use std::fmt;
use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::context::EvaluationContext;
use crate::reactive::combine_latest;
use crate::value::Value;

pub type PureFn<T> = Arc<dyn Fn(&EvaluationContext) -> T + Send + Sync>;
pub type StreamFn<T> = Arc<dyn Fn(&EvaluationContext) -> BoxStream<'static, T> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Nature {
    Value,
    Pure,
    Stream,
}

impl Nature {
    pub fn widest(natures: impl IntoIterator<Item = Nature>) -> Nature {
        natures.into_iter().max().unwrap_or(Nature::Value)
    }
}

#[derive(Clone)]
pub enum Compiled<T> {
    /// Fully evaluated at compile time.
    Constant(T),
    /// Deterministic function of the evaluation context.
    Pure(PureFn<T>),
    /// Cancelable sequence of results over time.
    Stream(StreamFn<T>),
}

/// A compiled expression producing values.
pub type CompiledExpression = Compiled<Value>;

impl<T> fmt::Debug for Compiled<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Self::Pure(_) => f.write_str("Pure(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl<T> Compiled<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn pure<F>(function: F) -> Self
    where
        F: Fn(&EvaluationContext) -> T + Send + Sync + 'static,
    {
        Self::Pure(Arc::new(function))
    }

    pub fn stream<F>(factory: F) -> Self
    where
        F: Fn(&EvaluationContext) -> BoxStream<'static, T> + Send + Sync + 'static,
    {
        Self::Stream(Arc::new(factory))
    }

    #[must_use]
    pub fn nature(&self) -> Nature {
        match self {
            Self::Constant(_) => Nature::Value,
            Self::Pure(_) => Nature::Pure,
            Self::Stream(_) => Nature::Stream,
        }
    }

    #[must_use]
    pub fn as_constant(&self) -> Option<&T> {
        match self {
            Self::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Synchronous result for constant and pure artifacts; `None` for streams.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Option<T> {
        match self {
            Self::Constant(value) => Some(value.clone()),
            Self::Pure(function) => Some(function(ctx)),
            Self::Stream(_) => None,
        }
    }

    /// Any nature as a stream. Constants and pure results emit once.
    pub fn to_stream(&self, ctx: &EvaluationContext) -> BoxStream<'static, T> {
        match self {
            Self::Constant(value) => stream::once(future::ready(value.clone())).boxed(),
            Self::Pure(function) => stream::once(future::ready(function(ctx))).boxed(),
            Self::Stream(factory) => factory(ctx),
        }
    }

    /// Transforms every result, keeping the nature.
    pub fn map<U, F>(self, transform: F) -> Compiled<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        match self {
            Self::Constant(value) => Compiled::Constant(transform(value)),
            Self::Pure(function) => Compiled::pure(move |ctx| transform(function(ctx))),
            Self::Stream(factory) => {
                let transform = Arc::new(transform);
                Compiled::stream(move |ctx| {
                    let transform = transform.clone();
                    factory(ctx).map(move |value| transform(value)).boxed()
                })
            }
        }
    }

    /// Eager combination of all parts with the widest nature among them.
    ///
    /// Streams are combined with latest-value semantics, so the result is
    /// recomputed whenever any part emits.
    pub fn combine<U, F>(parts: Vec<Compiled<T>>, combiner: F) -> Compiled<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(Vec<T>) -> U + Send + Sync + 'static,
    {
        let nature = Nature::widest(parts.iter().map(Compiled::nature));
        match nature {
            Nature::Value => {
                let values = parts
                    .into_iter()
                    .filter_map(|part| match part {
                        Compiled::Constant(value) => Some(value),
                        _ => None,
                    })
                    .collect();
                Compiled::Constant(combiner(values))
            }
            Nature::Pure => {
                let parts = Arc::new(parts);
                Compiled::pure(move |ctx| {
                    let values = parts.iter().filter_map(|part| part.evaluate(ctx)).collect();
                    combiner(values)
                })
            }
            Nature::Stream => {
                let parts = Arc::new(parts);
                let combiner = Arc::new(combiner);
                Compiled::stream(move |ctx| {
                    let sources = parts.iter().map(|part| part.to_stream(ctx)).collect();
                    let combiner = combiner.clone();
                    combine_latest(sources)
                        .map(move |values| combiner(values))
                        .boxed()
                })
            }
        }
    }

    /// Like [`Compiled::combine`], but the combiner needs the evaluation
    /// context, so the result is at least pure.
    pub fn combine_with<U, F>(parts: Vec<Compiled<T>>, combiner: F) -> Compiled<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&EvaluationContext, Vec<T>) -> U + Send + Sync + 'static,
    {
        let parts = Arc::new(parts);
        if parts.iter().all(|part| part.nature() != Nature::Stream) {
            return Compiled::pure(move |ctx| {
                let values = parts.iter().filter_map(|part| part.evaluate(ctx)).collect();
                combiner(ctx, values)
            });
        }
        let combiner = Arc::new(combiner);
        Compiled::stream(move |ctx| {
            let sources = parts.iter().map(|part| part.to_stream(ctx)).collect();
            let combiner = combiner.clone();
            let ctx = ctx.clone();
            combine_latest(sources)
                .map(move |values| combiner(&ctx, values))
                .boxed()
        })
    }
}

impl Compiled<Value> {
    /// True for a constant error value.
    #[must_use]
    pub fn is_constant_error(&self) -> bool {
        matches!(self, Self::Constant(value) if value.is_error())
    }
}

impl<T> From<T> for Compiled<T> {
    fn from(value: T) -> Self {
        Self::Constant(value)
    }
}

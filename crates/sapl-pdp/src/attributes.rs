//! Attribute broker backed by policy information points.
//!
//! A PIP answers one lookup at a time. The broker turns that into the
//! attribute stream an invocation expects: initial timeout, retries with
//! exponential backoff, periodic re-polling and an optional shared cache of
//! the last known value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use sapl_core::{AttributeBroker, AttributeFinderInvocation, AttributeFinderOptions, Value};
use tracing::{debug, warn};

/// One external attribute source.
#[async_trait]
pub trait PolicyInformationPoint: Send + Sync {
    /// A single lookup. Failures are retried by the broker.
    async fn fetch(&self, invocation: &AttributeFinderInvocation) -> Result<Value, String>;
}

#[derive(Default)]
pub struct PipAttributeBroker {
    pips: DashMap<String, Arc<dyn PolicyInformationPoint>>,
    cache: Arc<DashMap<String, Value>>,
}

impl PipAttributeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `pip` under a fully qualified attribute name such as
    /// `time.now`, replacing any earlier registration.
    pub fn register(&self, attribute_name: impl Into<String>, pip: Arc<dyn PolicyInformationPoint>) {
        self.pips.insert(attribute_name.into(), pip);
    }

    #[must_use]
    pub fn with_pip(self, attribute_name: impl Into<String>, pip: Arc<dyn PolicyInformationPoint>) -> Self {
        self.register(attribute_name, pip);
        self
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

impl AttributeBroker for PipAttributeBroker {
    fn attribute_stream(&self, invocation: Arc<AttributeFinderInvocation>) -> BoxStream<'static, Value> {
        let Some(pip) = self.pips.get(&invocation.attribute_name).map(|pip| pip.value().clone()) else {
            let error = Value::error(format!(
                "No policy information point registered for '{}'.",
                invocation.attribute_name
            ));
            return stream::once(async move { error }).boxed();
        };
        poll_attribute(pip, invocation, self.cache.clone())
    }
}

fn poll_attribute(
    pip: Arc<dyn PolicyInformationPoint>,
    invocation: Arc<AttributeFinderInvocation>,
    cache: Arc<DashMap<String, Value>>,
) -> BoxStream<'static, Value> {
    let options = invocation.options;
    let key = invocation.cache_key();
    async_stream::stream! {
        let cached = if options.fresh {
            None
        } else {
            cache.get(&key).map(|entry| entry.value().clone())
        };
        if let Some(cached) = cached {
            debug!(attribute = %invocation.attribute_name, "Serving cached attribute value");
            yield cached;
        }

        let first = fetch_with_retries(pip.as_ref(), &invocation, options);
        tokio::pin!(first);
        let raced = tokio::select! {
            outcome = &mut first => Some(outcome),
            _ = tokio::time::sleep(options.initial_timeout) => None,
        };
        let mut outcome = match raced {
            Some(outcome) => outcome,
            None => {
                yield Value::error(format!(
                    "Attribute '{}' did not answer within {} ms.",
                    invocation.attribute_name,
                    options.initial_timeout.as_millis()
                ));
                first.await
            }
        };

        loop {
            match outcome {
                Ok(value) => {
                    if !options.fresh {
                        cache.insert(key.clone(), value.clone());
                    }
                    yield value;
                }
                Err(error) => {
                    yield Value::error(format!(
                        "Attribute '{}' failed after {} attempts: {error}",
                        invocation.attribute_name,
                        options.retries + 1
                    ));
                    break;
                }
            }
            tokio::time::sleep(options.poll_interval).await;
            outcome = fetch_with_retries(pip.as_ref(), &invocation, options).await;
        }
    }
    .boxed()
}

/// One lookup plus up to `retries` further attempts, doubling the backoff
/// after each failure.
async fn fetch_with_retries(
    pip: &dyn PolicyInformationPoint,
    invocation: &AttributeFinderInvocation,
    options: AttributeFinderOptions,
) -> Result<Value, String> {
    let mut backoff = options.backoff;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match pip.fetch(invocation).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt <= options.retries => {
                warn!(
                    attribute = %invocation.attribute_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Attribute lookup failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(Duration::from_secs(3600));
            }
            Err(error) => {
                warn!(
                    attribute = %invocation.attribute_name,
                    attempts = attempt,
                    error = %error,
                    "Attribute lookup exhausted its retries"
                );
                return Err(error);
            }
        }
    }
}

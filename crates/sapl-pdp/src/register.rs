//! Live register of compiled configurations.
//!
//! Every pdp id owns one slot: an atomically swappable pointer to the current
//! [`CompiledPdpVoter`] for one-shot reads, and a broadcast channel for change
//! notification. Readers never wait for writers and never see a partially
//! compiled configuration. A slot with neither a configuration nor a
//! subscriber is evicted.

use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use sapl_core::reactive::distinct_until_changed;
use sapl_core::{AttributeBroker, FunctionBroker, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::voter::{CompiledPdpVoter, PdpConfiguration};

pub type ConfigurationUpdate = Option<Arc<CompiledPdpVoter>>;

struct Slot {
    current: ArcSwapOption<CompiledPdpVoter>,
    changes: broadcast::Sender<ConfigurationUpdate>,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            current: ArcSwapOption::empty(),
            changes,
        }
    }

    fn publish(&self, update: ConfigurationUpdate) {
        self.current.store(update.clone());
        // Nobody listening is fine.
        let _ = self.changes.send(update);
    }

    fn is_idle(&self) -> bool {
        self.current.load().is_none() && self.changes.receiver_count() == 0
    }
}

type Slots = DashMap<String, Arc<Slot>>;

fn evict_if_idle(slots: &Slots, pdp_id: &str) {
    if slots.remove_if(pdp_id, |_, slot| slot.is_idle()).is_some() {
        debug!(pdp_id = %pdp_id, "Evicted idle configuration slot");
    }
}

/// Change feed of one slot. Dropping it releases the receiver and evicts
/// the slot if that left it idle.
struct Subscription {
    changes: Option<broadcast::Receiver<ConfigurationUpdate>>,
    slots: Weak<Slots>,
    pdp_id: String,
}

impl Subscription {
    async fn recv(&mut self) -> std::result::Result<ConfigurationUpdate, RecvError> {
        match self.changes.as_mut() {
            Some(changes) => changes.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver must be gone before the idle check.
        drop(self.changes.take());
        if let Some(slots) = self.slots.upgrade() {
            evict_if_idle(&slots, &self.pdp_id);
        }
    }
}

pub struct ConfigurationRegister {
    slots: Arc<Slots>,
    function_broker: Arc<dyn FunctionBroker>,
    attribute_broker: Arc<dyn AttributeBroker>,
    attribute_defaults: Value,
    capacity: usize,
}

impl ConfigurationRegister {
    pub fn new(function_broker: Arc<dyn FunctionBroker>, attribute_broker: Arc<dyn AttributeBroker>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            function_broker,
            attribute_broker,
            attribute_defaults: Value::UNDEFINED,
            capacity: 64,
        }
    }

    /// Global attribute-finder options for configurations that set none.
    #[must_use]
    pub fn with_attribute_defaults(mut self, defaults: Value) -> Self {
        self.attribute_defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Publishes under the slot's entry lock so eviction cannot orphan the
    /// update.
    fn publish(&self, pdp_id: &str, update: ConfigurationUpdate) {
        let clearing = update.is_none();
        self.slots
            .entry(pdp_id.to_string())
            .or_insert_with(|| Arc::new(Slot::new(self.capacity)))
            .publish(update);
        if clearing {
            evict_if_idle(&self.slots, pdp_id);
        }
    }

    /// Compiles and publishes `configuration`.
    ///
    /// On failure the previous configuration stays in place when
    /// `keep_old_on_error` is set, otherwise the slot is cleared. The error is
    /// returned either way.
    pub fn load_configuration(&self, configuration: &PdpConfiguration, keep_old_on_error: bool) -> Result<()> {
        match CompiledPdpVoter::compile(
            configuration,
            self.function_broker.clone(),
            self.attribute_broker.clone(),
            &self.attribute_defaults,
        ) {
            Ok(compiled) => {
                info!(
                    pdp_id = %configuration.pdp_id,
                    configuration_id = %configuration.configuration_id,
                    algorithm = %configuration.algorithm,
                    documents = compiled.documents.len(),
                    "Loaded PDP configuration"
                );
                self.publish(&configuration.pdp_id, Some(Arc::new(compiled)));
                Ok(())
            }
            Err(error) => {
                if keep_old_on_error {
                    warn!(
                        pdp_id = %configuration.pdp_id,
                        configuration_id = %configuration.configuration_id,
                        error = %error,
                        "Rejected PDP configuration, keeping the previous one"
                    );
                } else {
                    warn!(
                        pdp_id = %configuration.pdp_id,
                        configuration_id = %configuration.configuration_id,
                        error = %error,
                        "Rejected PDP configuration, clearing the slot"
                    );
                    self.publish(&configuration.pdp_id, None);
                }
                Err(error)
            }
        }
    }

    /// Non-blocking read of the current configuration.
    pub fn get_current_configuration(&self, pdp_id: &str) -> ConfigurationUpdate {
        self.slots.get(pdp_id).and_then(|slot| slot.current.load_full())
    }

    /// The current configuration followed by every change. Consecutive
    /// updates carrying the same configuration are emitted once.
    pub fn get_pdp_configurations(&self, pdp_id: &str) -> BoxStream<'static, ConfigurationUpdate> {
        // Subscribe before reading so no publication falls in between, and
        // under the entry lock so the slot cannot be evicted meanwhile.
        let (slot, changes) = {
            let entry = self
                .slots
                .entry(pdp_id.to_string())
                .or_insert_with(|| Arc::new(Slot::new(self.capacity)));
            let changes = entry.changes.subscribe();
            (entry.value().clone(), changes)
        };
        let mut subscription = Subscription {
            changes: Some(changes),
            slots: Arc::downgrade(&self.slots),
            pdp_id: pdp_id.to_string(),
        };
        let pdp_id = pdp_id.to_string();
        let updates = async_stream::stream! {
            yield slot.current.load_full();
            loop {
                match subscription.recv().await {
                    Ok(update) => yield update,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(pdp_id = %pdp_id, skipped, "Configuration subscriber lagged, resynchronising");
                        yield slot.current.load_full();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        distinct_until_changed(Box::pin(updates), same_configuration)
    }

    /// Clears the slot of `pdp_id`; subscribers receive `None`. A slot
    /// nobody subscribes to is dropped.
    pub fn remove_configuration(&self, pdp_id: &str) {
        if self.slots.contains_key(pdp_id) {
            info!(pdp_id = %pdp_id, "Removed PDP configuration");
            self.publish(pdp_id, None);
        }
    }

    pub fn pdp_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| slot.current.load().is_some())
            .map(|slot| slot.key().clone())
            .collect()
    }
}

fn same_configuration(a: &ConfigurationUpdate, b: &ConfigurationUpdate) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

//! Explicit detector-type registry.
//!
//! Handler lookup is a plain map owned by whoever constructs the process
//! (no process-wide singleton): build a [`DetectorRegistry`] at startup,
//! pass it by reference, and construct a fresh one per test.

use std::collections::HashMap;
use std::sync::Arc;

use sieve_store::KeyValueStore;

use crate::handler::{DetectorConfig, StatefulDetectorHandler};

/// Detector type tags. Each variant carries a registered factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    /// Threshold detector over a numeric metric stream.
    MetricThreshold,
}

type HandlerFactory =
    Box<dyn Fn(DetectorConfig, Arc<dyn KeyValueStore>) -> StatefulDetectorHandler + Send + Sync>;

/// Maps detector kinds to handler factories.
#[derive(Default)]
pub struct DetectorRegistry {
    factories: HashMap<DetectorKind, HandlerFactory>,
}

impl DetectorRegistry {
    /// An empty registry; register kinds explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            DetectorKind::MetricThreshold,
            Box::new(StatefulDetectorHandler::new),
        );
        registry
    }

    /// Register (or replace) the factory for a kind.
    pub fn register(&mut self, kind: DetectorKind, factory: HandlerFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn is_registered(&self, kind: DetectorKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Build a handler for a kind, or `None` when the kind is unregistered.
    pub fn build(
        &self,
        kind: DetectorKind,
        config: DetectorConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Option<StatefulDetectorHandler> {
        let factory = self.factories.get(&kind)?;
        Some(factory(config, store))
    }
}

//! Control-plane event bus for the sampling / detector engine.
//!
//! The engine never talks to the ingestion layer or the occurrence
//! pipeline directly; it publishes [`ControlEvent`]s on the in-process
//! [`ControlBus`] and the surrounding platform forwards them wherever
//! they need to go (relay config fetch, message bus, ...).

pub mod bus;

pub use bus::{ControlBus, ControlEvent};

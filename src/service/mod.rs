//! Managed services.
//!
//! A `ComposedService` wraps one configured command: it spawns the
//! process, waits for it to become ready, and stops it on request. Events
//! and output lines go to subscribed observers.

pub mod composed;
pub mod events;

pub use composed::{ComposedService, ServiceState};
pub use events::{ServiceError, ServiceEvent, ServiceObserver};

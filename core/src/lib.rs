//! Storefront resilience - fault breakers and domain event dispatch
//!
//! This crate provides the two in-process building blocks shared by the
//! storefront services:
//! - `FaultBreaker`: a circuit breaker per downstream dependency
//!   (Closed → Open → HalfOpen) with monotonic recovery deadlines and
//!   single-probe recovery
//! - `EventChannel`: ordered, synchronous publish/subscribe keyed by event
//!   name, with per-topic subscriber caps and isolated handler failures
//!
//! # Example
//!
//! ```rust
//! use storefront_resilience::{EventChannel, EventName, FaultBreaker};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let events = Arc::new(EventChannel::new());
//! let gateway = FaultBreaker::builder("payment_gateway")
//!     .failure_threshold(5)
//!     .recovery_timeout_secs(60.0)
//!     .on_open(|name| eprintln!("{} is unhealthy", name))
//!     .build()
//!     .unwrap();
//!
//! let charge = gateway.call(|| Ok::<_, String>("ch_123"));
//! if let Ok(id) = charge {
//!     events
//!         .publish(EventName::PaymentSucceeded, json!({ "charge": id }))
//!         .unwrap();
//! }
//! ```

pub mod breaker;
pub mod builder;
pub mod callbacks;
pub mod catalog;
pub mod channel;
pub mod clock;
pub mod errors;
pub mod settings;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, FaultBreaker};
pub use builder::BreakerBuilder;
pub use catalog::{EventName, UnknownEventName};
pub use channel::{ChannelConfig, Event, EventChannel, Handler};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::{
    BreakerError, ConfigError, HandlerError, HandlerFailure, PublishError, SubscribeError,
};
pub use settings::Settings;

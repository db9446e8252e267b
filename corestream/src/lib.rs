//! Adaptive two-stream scientific-data transfer engine.
//!
//! A sender host streams a mandatory, always-complete "reduced" payload and
//! an optional, dynamically-truncated "augmentation" payload to a receiver
//! host, one simulation step at a time. A bandwidth predictor watches the
//! augmentation stream's transmission rate and adjusts how much of each
//! augmentation file gets sent so that per-step wall-clock stays bounded
//! even when cross-traffic eats into the link. See [`session`] for the two
//! entry points, [`SessionConfig`] for configuration.

pub mod config;
pub mod error;
pub mod invoker;
pub mod predictor;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod step_table;
pub mod telemetry;
pub mod transport;

pub use config::SessionConfig;
pub use error::{PipelineError, Result};
pub use session::{ReceiverSession, SenderSession};

//! Domain types shared by every oxpulse crate.
//!
//! Rules, alerts, notification attempts and analysis results are defined
//! here together with the typed per-channel configuration
//! ([`channel::ChannelConfig`]) so that storage, notification and evaluation
//! code agree on a single decoded representation.

pub mod channel;
pub mod error;
pub mod id;
pub mod types;

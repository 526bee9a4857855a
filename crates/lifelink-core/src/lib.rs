//! # LifeLink Core
//!
//! Core types, collaborator traits, and errors for the LifeLink alert relay.
//!
//! This crate holds what every other layer agrees on: the alert envelope
//! and its wire format, the channel taxonomy, the interfaces the relay
//! consumes from its host (connectivity, location, authorization), and the
//! events it publishes back.
//!
//! ## Key Types
//!
//! - [`AlertEnvelope`]: One emergency alert with relay metadata
//! - [`ChannelKind`]: The independent transports an alert can travel over
//! - [`RelayEvent`]: Fire-and-forget notifications for UI/notification code
//!
//! ## Key Traits
//!
//! - [`ConnectivityProbe`]: Is the uplink reachable right now?
//! - [`LocationProvider`]: Last known coordinates of the device
//! - [`AuthorizationProbe`]: Are the permissions for a channel granted?

pub mod channel;
pub mod envelope;
pub mod error;
pub mod event;
pub mod traits;

// Re-export main types
pub use channel::*;
pub use envelope::*;
pub use error::*;
pub use event::*;
pub use traits::*;

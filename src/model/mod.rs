//! Data model: events, kinds, tags, filters and wire-protocol frames (§3, §4.1, §4.4).

pub mod event;
pub mod filter;
pub mod kind;
pub mod message;
pub mod tag;

pub use event::{CodecError, Event, EventId, PublicKey};
pub use filter::Filter;
pub use kind::Kind;
pub use message::{ClientMessage, FrameError, RelayMessage, SubscriptionId};
pub use tag::Tag;

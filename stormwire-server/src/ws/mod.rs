//! WebSocket broadcast layer

pub mod frames;
pub mod hub;

pub use frames::{DisconnectReason, Frame, FrameKind, Inbound, SubscriptionFilter};
pub use hub::{BroadcastHub, SUBSCRIBER_QUEUE_CAPACITY};

//! Chat-transport adapters for promptfold.
//!
//! Adapters are pure I/O: they convert platform messages to/from
//! `InboundMessage` / `OutboundMessage`. Aggregation, timers, and key
//! rotation all live in the engine; nothing here mutates engine state.

mod telegram;
mod traits;
mod types;

pub use telegram::TelegramAdapter;
pub use traits::ChannelAdapter;
pub use types::{ChannelId, InboundMessage, MessageId, OutboundMessage, SenderId};

//! IM (instant messaging) layer: Discord and Telegram adapters, per-channel send daemon,
//! inbound worker with per-channel lanes, and the in-memory session store.
//! Log fields: channel=<platform> chat_id=... direction=incoming|reply|send content=...

pub mod channels;
pub mod daemon;
pub mod log;
pub mod session;
pub mod spec;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use channels::{discord, telegram};
pub use spec::ImChannelKind;

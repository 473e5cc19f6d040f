pub mod channel;
pub mod conversation;
pub mod message;
pub mod queue;
pub mod trigger;

pub mod config;
pub mod domain;
pub mod errors;
pub mod filters;
pub mod hours;
pub mod providers;

pub use chrono;

pub use domain::channel::{Channel, ChannelId, ChannelStatus};
pub use domain::conversation::{
    Conversation, ConversationId, ConversationOutcome, ConversationStatus, NewConversation,
};
pub use domain::message::{Message, MessageDirection, MessageId, MessageStatus, SenderType};
pub use domain::queue::{QueueEntry, QueueEntryId, QueueEntryStatus, QueueType};
pub use domain::trigger::{ProviderType, Trigger, TriggerId};
pub use errors::DomainError;
pub use filters::{evaluate, resolve_path, FilterVerdict, MatchMode};
pub use hours::{is_open, DayHours, HoursVerdict, WeeklySchedule};
pub use providers::{extract_contact, normalize_phone, ContactDetails};

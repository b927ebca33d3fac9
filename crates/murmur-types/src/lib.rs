pub mod api;
pub mod events;
pub mod models;
pub mod reactions;

pub use models::{Attachment, ContentType, DeliveryStatus, Draft, Message};
pub use reactions::Reactions;

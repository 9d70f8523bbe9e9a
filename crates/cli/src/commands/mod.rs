pub mod inbox;
pub mod messages;
pub mod outbox;

pub mod message;
pub mod conversation_store;

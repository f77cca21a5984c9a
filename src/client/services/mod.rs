pub mod rest_gateway;
pub mod push_channel;
pub mod chat_session;

pub mod session_store;
pub mod jwt;
pub mod time;

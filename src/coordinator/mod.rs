pub mod roster;
pub mod scheduler;
pub mod upload_server;

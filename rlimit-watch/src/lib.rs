pub mod backend;
pub mod channel;
pub mod collector;
pub mod config;
pub mod core_logic;
pub mod lifecycle;
pub mod logger;
pub mod record;
pub mod signal_handler;

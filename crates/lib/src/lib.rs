//! Logrelay core library: tails a log file to Telegram and relays authorized
//! chat commands into a terminal-multiplexer session.

pub mod channels;
pub mod config;
pub mod inject;
pub mod policy;
pub mod relay;
pub mod tail;

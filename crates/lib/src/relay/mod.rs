//! Relay: the event loop joining the log tail, the Telegram inbox and the session injector.

mod dispatcher;
mod runtime;

pub use dispatcher::{Dispatcher, Exit};
pub use runtime::{run_relay, run_relay_with};

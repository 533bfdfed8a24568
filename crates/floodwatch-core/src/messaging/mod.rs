//! Outbound reply channel decorators and the logging channel.

pub mod logged;
pub mod throttled;

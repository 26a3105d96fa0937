//! Command bus subsystem

pub mod client;
pub mod dispatcher;
pub mod matcher;

pub use client::{BusClient, BusHandle};
pub use dispatcher::{Dispatcher, HandlerFn};
pub use matcher::topic_matches;

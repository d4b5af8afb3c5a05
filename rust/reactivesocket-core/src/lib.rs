#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

mod channel_responder;
mod config;
mod connection;
mod error;
mod flags;
mod flow_control;
mod frame;
mod shared;
mod subscriber;
#[cfg(test)]
mod test_support;

pub use channel_responder::*;
pub use config::*;
pub use connection::*;
pub use error::*;
pub use flags::*;
pub use flow_control::*;
pub use frame::*;
pub use shared::*;
pub use subscriber::*;

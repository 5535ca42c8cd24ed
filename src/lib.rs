//! A message bridge that lets a host drive an isolated, asynchronously loaded
//! Forth interpreter: load once, then serve one command at a time, in order.

pub mod bridge;
pub mod config;
pub mod consts;
pub mod engine;
pub mod error;
pub mod events;
pub mod transport;

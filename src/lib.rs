//! mailcast — relays inbound mail to live interactive clients, annotates
//! each message with a spam verdict, and acknowledges the sender.

pub mod annotate;
pub mod classify;
pub mod config;
pub mod error;
pub mod message;
pub mod parse;
pub mod registry;
pub mod reply;
pub mod route;
pub mod smtp;
pub mod ws;

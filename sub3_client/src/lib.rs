//! `sub3_client`
//!
//! Client-side systems:
//! - Framed TCP connection to the server
//! - Local mirror of the ocean, updated by replicated messages
//! - Steering of the vessel the server assigned

pub mod client;

pub use client::SubClient;

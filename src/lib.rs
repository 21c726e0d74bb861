//! Spider Arena Server Library
//!
//! Authoritative simulation for a toroidal arena where player spiders and
//! wandering flies eat each other, served to browsers over WebTransport.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;

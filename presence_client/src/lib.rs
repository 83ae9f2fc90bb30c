//! `presence_client`
//!
//! Client-side systems for a shared 2D presence field:
//! - Field session connection with optional reconnect
//! - Inbound event processing into a copy-on-write world store
//! - Throttled outbound position reporting over an event bus
//! - Local avatar and remote actor interpolation
//! - Viewport culling and display/world coordinate mapping
//! - A single-task event loop tying it together

pub mod client;
pub mod connection;
pub mod cull;
pub mod inbound;
pub mod input;
pub mod interp;
pub mod reporter;
pub mod scheduler;
pub mod store;

pub use client::{ClientCommand, ClientState, FieldClient};
pub use store::{Changed, WorldSnapshot, WorldStore};

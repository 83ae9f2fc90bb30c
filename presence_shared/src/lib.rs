//! `presence_shared`
//!
//! Shared libraries for the field presence client and its test server.
//!
//! Design goals:
//! - Plain data types for the world, with wire decoding kept at the edge.
//! - Clear separation of concerns (math, model, net, events, config).
//! - No `unsafe`.

pub mod config;
pub mod event;
pub mod math;
pub mod model;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::model::*;
    pub use crate::net::*;
}

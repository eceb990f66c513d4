//! `scenelink_shared`
//!
//! Libraries used by both the bridge server and its clients.
//!
//! - `wire`: binary codec for requests, replies, and published messages.
//! - `net`: length-prefixed TCP framing.
//! - `math`: vectors, affine transforms, camera-space conversion.
//! - `config`: bridge configuration.

pub mod config;
pub mod math;
pub mod net;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::wire::{Command, PubMessage, StatusCode, WireError};
}

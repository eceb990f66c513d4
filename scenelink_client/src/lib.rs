//! `scenelink_client`
//!
//! Client-side pieces:
//! - Connection to both bridge endpoints with typed requests
//! - Stream of published position/rename/delete messages
//! - Location tracks built from render-location data

pub mod client;
pub mod track;

pub use client::{BridgeClient, ClientError, ClientResult, UpdateStream};
pub use track::LocationTrack;

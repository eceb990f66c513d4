//! `scenelink_server`
//!
//! Bridge between a live 3D scene and external client processes.
//!
//! - `scene`: the query/notify surface consumed from the host scene
//! - `memory_scene`: a self-contained scene for the standalone binary and tests
//! - `identity` / `registry`: stable object ids that survive renames and undo
//! - `render_cache`: memoized per-frame locations for render sessions
//! - `events`: queue of messages waiting to be published
//! - `dispatch`: request handling, one reply per request
//! - `transport` / `server`: channels and the tick loop
//!
//! Networking model:
//! - request/reply endpoint: clients send commands, each gets one reply
//! - publish endpoint: position, rename and delete messages for everyone

pub mod bridge;
pub mod console;
pub mod dispatch;
pub mod events;
pub mod identity;
pub mod memory_scene;
pub mod registry;
pub mod render_cache;
pub mod scene;
pub mod server;
pub mod transport;

pub use bridge::{Bridge, Mode};
pub use server::{bind_ephemeral, BridgeServer, StopHandle, TcpBridgeServer, TickOutcome};

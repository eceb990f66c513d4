//! Request dispatcher.
//!
//! Turns one request into one reply. Every input, including empty and
//! malformed ones, produces a reply with a status byte; nothing propagates
//! out as an error or a panic.

use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use tracing::{debug, error, warn};

use scenelink_shared::wire::{
    self, AnimationInfo, Command, RenderDataRequest, StatusCode, WireError,
};

use crate::bridge::Bridge;
use crate::registry::RegistryError;
use crate::scene::Scene;

/// Why a request failed. Each variant maps to one status code.
#[derive(Debug)]
enum DispatchError {
    NotFound,
    InvalidRequest(String),
    Internal(String),
}

impl DispatchError {
    fn status(&self) -> StatusCode {
        match self {
            DispatchError::NotFound => StatusCode::ObjectNotFound,
            DispatchError::InvalidRequest(_) => StatusCode::InvalidRequestData,
            DispatchError::Internal(_) => StatusCode::InternalError,
        }
    }
}

impl From<WireError> for DispatchError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Truncated { .. } | WireError::InvalidUtf8 => {
                DispatchError::InvalidRequest(e.to_string())
            }
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

type HandlerResult = Result<Bytes, DispatchError>;

/// Handles one request and returns the encoded reply.
pub fn dispatch<S: Scene>(bridge: &mut Bridge<S>, request: &[u8]) -> Bytes {
    let Some((&first, payload)) = request.split_first() else {
        debug!("empty request");
        return wire::encode_reply(StatusCode::UnknownCommand, &[]);
    };
    let Some(command) = Command::from_u8(first) else {
        debug!(command = first, "unknown command");
        return wire::encode_reply(StatusCode::UnknownCommand, &[]);
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handle(bridge, command, payload)));
    match outcome {
        Ok(Ok(body)) => wire::encode_reply(StatusCode::Success, &body),
        Ok(Err(e)) => {
            match &e {
                DispatchError::NotFound => debug!(?command, "object not found"),
                DispatchError::InvalidRequest(why) => warn!(?command, %why, "invalid request"),
                DispatchError::Internal(why) => error!(?command, %why, "request failed"),
            }
            wire::encode_reply(e.status(), &[])
        }
        Err(_) => {
            error!(?command, "request handler panicked");
            wire::encode_reply(StatusCode::InternalError, &[])
        }
    }
}

fn handle<S: Scene>(bridge: &mut Bridge<S>, command: Command, payload: &[u8]) -> HandlerResult {
    match command {
        Command::ObjList => obj_list(bridge),
        Command::ObjSub => obj_sub(bridge, payload),
        Command::ObjUnsub => obj_unsub(bridge, payload),
        Command::PrepareToRender => {
            bridge.enter_render_mode();
            Ok(Bytes::new())
        }
        Command::InformRenderFinished => {
            bridge.exit_render_mode();
            Ok(Bytes::new())
        }
        Command::GetRenderingLocationData => rendering_location_data(bridge, payload),
        Command::GetAnimationInfo => Ok(animation_info(bridge.scene())),
        Command::Ping => Ok(Bytes::new()),
    }
}

fn obj_list<S: Scene>(bridge: &Bridge<S>) -> HandlerResult {
    let names = bridge.scene().object_names();
    Ok(wire::encode_name_list(names.iter().map(String::as_str))?)
}

fn obj_sub<S: Scene>(bridge: &mut Bridge<S>, mut payload: &[u8]) -> HandlerResult {
    let name = wire::get_name(&mut payload)?;
    let (scene, registry) = bridge.scene_and_registry();
    match registry.register_sub(scene, &name) {
        Ok(id) => Ok(Bytes::copy_from_slice(&id.to_le_bytes())),
        Err(RegistryError::ObjectNotFound(_)) => Err(DispatchError::NotFound),
        Err(e @ RegistryError::IdsExhausted) => Err(DispatchError::Internal(e.to_string())),
    }
}

fn obj_unsub<S: Scene>(bridge: &mut Bridge<S>, mut payload: &[u8]) -> HandlerResult {
    let id = wire::get_id(&mut payload)?;
    let (scene, registry) = bridge.scene_and_registry();
    if registry.unregister_sub(scene, id) {
        Ok(Bytes::new())
    } else {
        Err(DispatchError::NotFound)
    }
}

fn rendering_location_data<S: Scene>(bridge: &mut Bridge<S>, mut payload: &[u8]) -> HandlerResult {
    let req = RenderDataRequest::decode(&mut payload)?;
    let (scene, registry, cache) = bridge.parts_mut();
    let table = cache
        .get_or_compute(scene, registry, req.start_frame, req.end_frame)
        .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
    let positions = table.get(&req.id).ok_or(DispatchError::NotFound)?;
    Ok(wire::encode_positions(positions))
}

fn animation_info<S: Scene>(scene: &S) -> Bytes {
    let timeline = scene.timeline();
    AnimationInfo {
        frame_count: timeline.frame_count(),
        fps: timeline.effective_fps(),
    }
    .encode()
}

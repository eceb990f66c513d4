//! Operator console for the standalone server.
//!
//! Lines typed on stdin drive the in-memory scene the way an artist would
//! drive a host application: renaming, deleting and undoing. Useful for
//! watching rename/delete events reach connected clients.

use scenelink_shared::math::Vec3;
use tracing::info;

use crate::bridge::Bridge;
use crate::memory_scene::InMemoryScene;
use crate::scene::Scene;
use crate::server::StopHandle;

pub const HELP: &str = "commands: status, objects, frame <n>, add <name> [x y z], \
rename <name> <new>, delete <name>, duplicate <name>, snapshot, undo, quit";

/// Executes one console line and returns the lines to print.
pub fn exec_console(bridge: &mut Bridge<InMemoryScene>, stop: &StopHandle, line: &str) -> Vec<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = tokens.split_first() else {
        return Vec::new();
    };

    match (command, args) {
        ("help", _) => vec![HELP.to_string()],
        ("status", _) => {
            let registry = bridge.registry();
            let mut out = vec![
                format!("Mode: {:?}", bridge.mode()),
                format!("Frame: {}", bridge.scene().current_frame()),
                format!("Registered: {}", registry.len()),
            ];
            for id in registry.ids() {
                if let Some(entry) = registry.get(id) {
                    out.push(format!(
                        "  {id}: {} ({} subscribers)",
                        entry.identity.display_name(),
                        entry.subscriber_count
                    ));
                }
            }
            out.push(format!("Cached render ranges: {}", bridge.cache().len()));
            out
        }
        ("objects", _) => bridge.scene().object_names(),
        ("frame", [n]) => match n.parse::<i64>() {
            Ok(frame) => {
                bridge.scene_mut().set_frame(frame);
                vec![format!("Frame set to {frame}")]
            }
            Err(_) => vec!["Usage: frame <n>".to_string()],
        },
        ("add", [name, coords @ ..]) => {
            let parsed: Result<Vec<f32>, _> = coords.iter().map(|c| c.parse::<f32>()).collect();
            let location = match parsed.as_deref() {
                Ok([]) => Vec3::ZERO,
                Ok(&[x, y, z]) => Vec3::new(x, y, z),
                _ => return vec!["Usage: add <name> [x y z]".to_string()],
            };
            let scene = bridge.scene_mut();
            scene.push_undo();
            let key = scene.add_object(name, location);
            vec![format!("Added '{}'", scene.name_of(key).unwrap_or_default())]
        }
        ("rename", [name, new_name]) => {
            let scene = bridge.scene_mut();
            let Some(key) = scene.find_by_name(name) else {
                return vec![format!("No object named '{name}'")];
            };
            scene.push_undo();
            match scene.rename(key, new_name) {
                Some(actual) => vec![format!("Renamed '{name}' to '{actual}'")],
                None => vec![format!("No object named '{name}'")],
            }
        }
        ("delete", [name]) => {
            let scene = bridge.scene_mut();
            let Some(key) = scene.find_by_name(name) else {
                return vec![format!("No object named '{name}'")];
            };
            scene.push_undo();
            scene.remove(key);
            vec![format!("Deleted '{name}'")]
        }
        ("duplicate", [name]) => {
            let scene = bridge.scene_mut();
            let Some(key) = scene.find_by_name(name) else {
                return vec![format!("No object named '{name}'")];
            };
            scene.push_undo();
            match scene.duplicate(key).and_then(|copy| scene.name_of(copy)) {
                Some(copy) => vec![format!("Duplicated '{name}' as '{copy}'")],
                None => vec![format!("No object named '{name}'")],
            }
        }
        ("snapshot", _) => {
            bridge.scene_mut().push_undo();
            vec!["Undo step recorded".to_string()]
        }
        ("undo", _) => {
            if bridge.scene_mut().undo() {
                vec!["Undone".to_string()]
            } else {
                vec!["Nothing to undo".to_string()]
            }
        }
        ("quit" | "exit", _) => {
            info!("shutdown requested from console");
            stop.stop();
            vec!["Shutting down".to_string()]
        }
        _ => vec![format!("Unknown command '{line}'. {HELP}")],
    }
}

//! Standalone bridge server.
//!
//! Usage:
//!   cargo run -p scenelink_server -- [--config bridge.json] [--scene scene.json]
//!       [--reqrep-addr 127.0.0.1:47810] [--pub-addr 127.0.0.1:47811] [--tick-hz 30]
//!
//! Serves an in-memory scene loaded from a JSON scene description, or a small
//! built-in demo scene when none is given. Type `help` at the prompt for the
//! console commands that edit the scene while clients are connected.

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use scenelink_server::console::{exec_console, HELP};
use scenelink_server::memory_scene::{InMemoryScene, SceneDescription};
use scenelink_server::scene::Timeline;
use scenelink_server::server::{bind, tick_interval, TickOutcome};
use scenelink_shared::config::BridgeConfig;
use scenelink_shared::math::{Mat4, Vec3};
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<BridgeConfig> {
    let args: Vec<String> = env::args().collect();

    // --config first, so explicit flags override the file.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => BridgeConfig::from_json_file(Path::new(&args[i + 1]))?,
        _ => BridgeConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--reqrep-addr" if i + 1 < args.len() => {
                cfg.reqrep_addr = args[i + 1].clone();
                i += 2;
            }
            "--pub-addr" if i + 1 < args.len() => {
                cfg.pub_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1]
                    .parse()
                    .with_context(|| format!("parse --tick-hz {}", args[i + 1]))?;
                i += 2;
            }
            "--scene" if i + 1 < args.len() => {
                cfg.scene_path = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// A camera ten units back from the origin looking down -Z, a light and an
/// animated ball.
fn demo_scene() -> InMemoryScene {
    let mut scene = InMemoryScene::new(Timeline {
        frame_start: 1,
        frame_end: 120,
        ..Default::default()
    });
    scene.set_camera(Some(Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0))));
    scene.add_object("Light", Vec3::new(2.0, 3.0, 0.0));
    let ball = scene.add_object("Ball", Vec3::ZERO);
    scene.insert_keyframe(ball, 1, Vec3::new(-4.0, 0.0, 0.0));
    scene.insert_keyframe(ball, 60, Vec3::new(4.0, 0.0, 0.0));
    scene.insert_keyframe(ball, 120, Vec3::new(-4.0, 0.0, 0.0));
    scene
}

fn load_scene(cfg: &BridgeConfig) -> anyhow::Result<InMemoryScene> {
    match &cfg.scene_path {
        Some(path) => {
            let desc = SceneDescription::from_json_file(Path::new(path))?;
            info!(%path, objects = desc.objects.len(), "scene loaded");
            Ok(InMemoryScene::from_description(&desc))
        }
        None => {
            info!("no scene given; serving the demo scene");
            Ok(demo_scene())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    let tick_hz = cfg.clamped_tick_hz();
    if tick_hz != cfg.tick_hz {
        warn!(requested = cfg.tick_hz, used = tick_hz, "tick rate clamped");
    }
    info!(reqrep = %cfg.reqrep_addr, publish = %cfg.pub_addr, tick_hz, "Starting bridge");

    let scene = load_scene(&cfg).context("load scene")?;
    let mut server = bind(scene, &cfg).await.context("bind bridge")?;
    let stop = server.stop_handle();

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            ctrl_c_stop.stop();
        }
    });

    // Console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Bridge ready. {HELP}");
    println!();

    let interval = tick_interval(tick_hz);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            for out in exec_console(server.bridge_mut(), &stop, &line) {
                println!("{out}");
            }
        }

        if server.step().await == TickOutcome::Stopped {
            break;
        }

        next_tick += interval;
        tokio::time::sleep_until(next_tick).await;
    }

    info!(ticks = server.tick(), "Bridge exited");
    Ok(())
}

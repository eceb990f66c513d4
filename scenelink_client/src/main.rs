//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p scenelink_client -- [--config bridge.json]
//!       [--reqrep-addr 127.0.0.1:47810] [--pub-addr 127.0.0.1:47811]
//!       [--object Light] [--render]
//!
//! Lists the scene's objects, then subscribes to `--object` (the first object
//! if not given) and prints every published message until interrupted. With
//! `--render`, fetches the object's whole render track instead and prints it.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use scenelink_client::{BridgeClient, LocationTrack};
use scenelink_shared::config::BridgeConfig;
use scenelink_shared::wire::PubMessage;
use tracing::{info, warn};

struct Args {
    cfg: BridgeConfig,
    object: Option<String>,
    render: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => BridgeConfig::from_json_file(Path::new(&args[i + 1]))?,
        _ => BridgeConfig::default(),
    };
    let mut object = None;
    let mut render = false;

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
            "--object" if i + 1 < args.len() => {
                object = Some(args[i + 1].clone());
                i += 2;
            }
            "--render" => {
                render = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args {
        cfg,
        object,
        render,
    })
}

async fn print_render_track(client: &mut BridgeClient, id: u16, name: &str) -> anyhow::Result<()> {
    let anim = client.animation_info().await?;
    if anim.frame_count == 0 {
        println!("Scene has no frames");
        return Ok(());
    }
    client.prepare_to_render().await?;
    let locations = client
        .rendering_locations(id, 0, anim.frame_count - 1)
        .await
        .with_context(|| format!("render locations for '{name}'"))?;
    client.render_finished().await?;

    let track = LocationTrack::new(locations, anim.fps);
    println!(
        "'{name}': {} frames at {} fps ({:.2}s)",
        track.len(),
        track.fps(),
        track.duration()
    );
    for (frame, loc) in track.locations().iter().enumerate() {
        println!("  {frame:>5}: {:>9.3} {:>9.3} {:>9.3}", loc.x, loc.y, loc.z);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    let mut client = BridgeClient::connect(&args.cfg).await.context("connect")?;
    let rtt = client.ping().await?;
    info!(server = %client.server_peer()?, ?rtt, "Connected to bridge");

    let names = client.list_objects().await?;
    println!("Objects:");
    for name in &names {
        println!("  {name}");
    }

    let Some(name) = args.object.or_else(|| names.first().cloned()) else {
        println!("Scene is empty.");
        return Ok(());
    };
    let id = client
        .subscribe(&name)
        .await
        .with_context(|| format!("subscribe '{name}'"))?;
    info!(%name, id, "Subscribed");

    if args.render {
        print_render_track(&mut client, id, &name).await?;
        client.unsubscribe(id).await?;
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = client.recv_update(Duration::from_millis(500)) => match update {
                Ok(Some(PubMessage::PositionUpdated { id, position })) => {
                    println!("{id}: {:.3} {:.3} {:.3}", position.x, position.y, position.z);
                }
                Ok(Some(PubMessage::Renamed { id, new_name })) => println!("{id}: renamed to '{new_name}'"),
                Ok(Some(PubMessage::Deleted { id })) => println!("{id}: deleted"),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Update stream failed");
                    break;
                }
            },
        }
    }

    if let Err(e) = client.unsubscribe(id).await {
        warn!(error = %e, "Unsubscribe failed");
    }
    Ok(())
}

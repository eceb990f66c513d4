use scenelink_server::server::{bind_ephemeral, TickOutcome};
use scenelink_tests::{demo_scene, BridgeHarness};

/// Smoke test: the bridge can run a few ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(demo_scene(), 64).await?;
    assert_eq!(server.run_for_ticks(3, 64).await, TickOutcome::Continue);
    assert_eq!(server.tick(), 3);
    Ok(())
}

/// Setting the stop flag ends the loop at the next tick.
#[tokio::test]
async fn stop_flag_ends_the_loop() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(demo_scene(), 64).await?;
    server.stop_handle().stop();
    assert_eq!(server.step().await, TickOutcome::Stopped);
    assert_eq!(server.tick(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_bridge_shuts_down() -> anyhow::Result<()> {
    let bridge = BridgeHarness::start(demo_scene()).await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let ticks = bridge.shutdown().await?;
    assert!(ticks > 0);
    Ok(())
}

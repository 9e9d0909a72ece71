//! Boot pipeline and HTTP hand-off, end to end with a fake launcher.

use std::sync::Arc;

use serde_json::Value;

use craft_panel::lifecycle::{
    boot, boot_pipeline, launch, PanelContext, StageEvent, StageStatus, StartupError,
};
use craft_panel::supervisor::{ExitReason, ReportOnly, ServerStatus, SupervisorEvent};

mod common;
use common::{next_event, test_config, write_asset, FakeLauncher};

fn context(config: craft_panel::PanelConfig, launcher: &Arc<FakeLauncher>) -> PanelContext {
    PanelContext::with_launcher(config, launcher.clone(), Arc::new(ReportOnly))
}

#[tokio::test]
async fn test_first_run_serves_setup_and_does_not_start() {
    let dir = tempfile::tempdir().unwrap();
    write_asset(&dir.path().join("setup"), "index.html", "setup page");
    write_asset(&dir.path().join("dashboard"), "index.html", "dashboard page");
    let launcher = FakeLauncher::new();
    let ctx = context(test_config(dir.path(), true), &launcher);

    let pipeline = boot_pipeline();
    let mut events = pipeline.subscribe();
    let panel = launch(pipeline, ctx).await.ok().expect("boot failed");
    let base = format!("http://{}", panel.local_addr());
    let client = reqwest::Client::new();

    let body = client.get(format!("{base}/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "setup page");

    let res = client.get(format!("{base}/api/setup/apikey")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["api_key"], panel.supervisor().api_key());

    assert_eq!(launcher.launch_count(), 0);
    assert_eq!(panel.supervisor().status(), ServerStatus::Stopped);

    let order: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| match event {
            StageEvent::Started { stage } => format!("started:{}", stage.name),
            StageEvent::Finished { stage, .. } => format!("finished:{}", stage.name),
            StageEvent::Failed { stage, .. } => format!("failed:{}", stage.name),
        })
        .collect();
    assert_eq!(
        order,
        vec![
            "started:preinit",
            "finished:preinit",
            "started:http::construct",
            "finished:http::construct",
            "started:http::launch",
            "finished:http::launch",
        ]
    );

    drop(client);
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_configured_run_starts_server_with_port_and_key() {
    let dir = tempfile::tempdir().unwrap();
    write_asset(&dir.path().join("dashboard"), "index.html", "dashboard page");
    let launcher = FakeLauncher::new();
    let mut config = test_config(dir.path(), false);
    config.server.port = 25565;
    config.panel.api_key = "abc123".to_string();

    let panel = boot(context(config, &launcher)).await.ok().expect("boot failed");

    let supervisor = panel.supervisor();
    assert_eq!(supervisor.status(), ServerStatus::Running);
    assert_eq!(supervisor.handle().unwrap().port, 25565);
    assert_eq!(supervisor.api_key(), "abc123");
    assert_eq!(launcher.launches()[0].port, 25565);
    assert_eq!(launcher.launches()[0].api_key, "abc123");
    assert!(panel
        .stages()
        .snapshot()
        .iter()
        .all(|stage| stage.status == StageStatus::Finished));

    let base = format!("http://{}", panel.local_addr());
    let client = reqwest::Client::new();
    let body = client.get(format!("{base}/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "dashboard page");

    // Setup endpoints are gone once configured.
    let res = client.get(format!("{base}/api/setup/apikey")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    drop(client);
    panel.shutdown().await.unwrap();
    assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn test_control_api_requires_key() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let mut config = test_config(dir.path(), false);
    config.panel.api_key = "abc123".to_string();
    let panel = boot(context(config, &launcher)).await.ok().expect("boot failed");
    let base = format!("http://{}", panel.local_addr());
    let client = reqwest::Client::new();

    let res = client.get(format!("{base}/api/status")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["success"], false);

    let res = client
        .get(format!("{base}/api/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("{base}/api/status"))
        .bearer_auth("abc123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["server"]["status"], "running");

    drop(client);
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_control_api_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let mut config = test_config(dir.path(), false);
    config.panel.api_key = "abc123".to_string();
    let panel = boot(context(config, &launcher)).await.ok().expect("boot failed");
    let base = format!("http://{}", panel.local_addr());
    let client = reqwest::Client::new();
    let post = |path: &str| {
        client
            .post(format!("{base}{path}"))
            .bearer_auth("abc123")
            .send()
    };

    let res = post("/api/server/start").await.unwrap();
    assert_eq!(res.status(), 409);
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("already running"));

    let res = post("/api/server/restart").await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(launcher.launch_count(), 2);
    assert_eq!(launcher.max_live(), 1);

    let res = post("/api/server/stop").await.unwrap();
    assert_eq!(res.status(), 200);
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["data"]["status"], "stopped");
    assert_eq!(launcher.live(), 0);

    let res = post("/api/server/start").await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(panel.supervisor().status(), ServerStatus::Running);

    drop(client);
    panel.shutdown().await.unwrap();
    assert_eq!(launcher.live(), 0);
}

#[tokio::test]
async fn test_requests_are_access_logged() {
    let dir = tempfile::tempdir().unwrap();
    write_asset(&dir.path().join("setup"), "index.html", "setup page");
    let launcher = FakeLauncher::new();
    let panel = boot(context(test_config(dir.path(), true), &launcher))
        .await
        .ok()
        .expect("boot failed");
    let base = format!("http://{}", panel.local_addr());

    let client = reqwest::Client::new();
    client.get(format!("{base}/")).send().await.unwrap();
    drop(client);
    panel.shutdown().await.unwrap();

    let mut entries = std::fs::read_dir(dir.path().join("logs")).unwrap();
    let log = entries.next().unwrap().unwrap();
    let name = log.file_name().into_string().unwrap();
    assert!(name.starts_with("access-") && name.ends_with(".log"));
    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert!(contents.contains("\"GET / HTTP/1.1\" 200"));
}

#[tokio::test]
async fn test_log_directory_failure_aborts_before_listener() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let launcher = FakeLauncher::new();
    let mut config = test_config(dir.path(), false);
    config.panel.log_directory = blocker.join("logs");

    let pipeline = boot_pipeline();
    let board = pipeline.board();
    let Err(err) = launch(pipeline, context(config, &launcher)).await else {
        panic!("boot should fail");
    };

    assert_eq!(err.index, 0);
    assert_eq!(err.name, "preinit");
    assert!(matches!(
        err.source.downcast_ref::<StartupError>(),
        Some(StartupError::LogDirectory { .. })
    ));
    assert_eq!(board.status(0), Some(StageStatus::Failed));
    assert_eq!(board.status(1), Some(StageStatus::Pending));
    assert_eq!(board.status(2), Some(StageStatus::Pending));
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_bind_failure_fails_launch_stage() {
    let dir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let launcher = FakeLauncher::new();
    let mut config = test_config(dir.path(), false);
    config.panel.port = taken.local_addr().unwrap().port();

    let pipeline = boot_pipeline();
    let board = pipeline.board();
    let Err(err) = launch(pipeline, context(config, &launcher)).await else {
        panic!("boot should fail");
    };

    assert_eq!(err.index, 2);
    assert!(matches!(
        err.source.downcast_ref::<StartupError>(),
        Some(StartupError::Bind { .. })
    ));
    assert_eq!(board.status(0), Some(StageStatus::Finished));
    assert_eq!(board.status(1), Some(StageStatus::Finished));
    assert_eq!(board.status(2), Some(StageStatus::Failed));
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_dropping_panel_kills_server_and_stops_http() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    launcher.ignore_interrupt(true);
    let mut config = test_config(dir.path(), false);
    config.panel.api_key = "abc123".to_string();
    let panel = boot(context(config, &launcher)).await.ok().expect("boot failed");
    let addr = panel.local_addr();
    let mut events = panel.supervisor().subscribe();
    assert_eq!(launcher.live(), 1);

    drop(panel);

    match next_event(&mut events).await {
        SupervisorEvent::Exited { reason, .. } => {
            assert!(matches!(reason, ExitReason::Requested { .. }));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(launcher.live(), 0);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

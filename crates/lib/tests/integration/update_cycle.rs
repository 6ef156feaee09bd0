//! Full update cycles driven through the update client.

use hotpatch_lib::channel::ServerEvent;
use hotpatch_lib::client::{ClientExit, HmrError, UpdateState};
use hotpatch_lib::config::ClientConfig;
use hotpatch_lib::types::{BuildId, ModuleId};
use mlua::prelude::*;
use tokio::sync::mpsc;

use super::common::*;

fn announce(build: &str) -> ServerEvent {
  ServerEvent::IdentifierUpdate(BuildId::new(build))
}

async fn connect_to(client: &mut TestClient, running: &str) {
  client.handle_event(ServerEvent::ConnectionEstablished).await.unwrap();
  client.handle_event(announce(running)).await.unwrap();
}

mod scenarios {
  use super::*;

  #[tokio::test]
  async fn applies_announced_build() {
    let (mut client, source, reloads) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["main"]));
    source.insert(
      "main.def456.update-unit.js",
      unit_script("main", &[("widget", r#"exports.version = 2; exports.theme = require("theme")"#)]),
    );

    connect_to(&mut client, "abc123").await;
    assert!(source.requests().is_empty(), "the running build is never fetched");

    client.handle_event(announce("def456")).await.unwrap();
    let report = client.handle_event(ServerEvent::BuildReady).await.unwrap().unwrap();

    assert_eq!(
      source.requests(),
      vec!["abc123.update-manifest.json", "main.def456.update-unit.js"]
    );
    assert_eq!(report.applied, vec![BuildId::new("def456")]);
    assert_eq!(client.applied_build(), Some(&BuildId::new("def456")));
    assert_eq!(client.state(), UpdateState::Idle);
    assert_eq!(widget_version(&client), 2);
    assert_eq!(accepted(&client), vec!["widget"]);
    assert!(reloads.borrow().is_empty());
  }

  #[tokio::test]
  async fn manifest_error_reloads_without_fetching_units() {
    let (mut client, source, reloads) = hot_client();
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let err = client.handle_event(ServerEvent::BuildReady).await.unwrap_err();

    assert!(matches!(err, HmrError::ManifestFetch { .. }));
    assert_eq!(source.requests(), vec!["abc123.update-manifest.json"]);
    assert_eq!(client.state(), UpdateState::Reloading);
    assert_eq!(reloads.borrow().len(), 1);
  }

  #[tokio::test]
  async fn empty_manifest_fetches_no_units() {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &[]));
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let report = client.handle_event(ServerEvent::BuildReady).await.unwrap().unwrap();

    assert_eq!(source.requests(), vec!["abc123.update-manifest.json"]);
    assert!(report.installs.is_empty());
    assert!(accepted(&client).is_empty());
    assert_eq!(client.applied_build(), Some(&BuildId::new("def456")));
    assert_eq!(client.state(), UpdateState::Idle);
  }

  #[tokio::test]
  async fn changed_units_are_all_installed() {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["main", "vendor"]));
    source.insert(
      "main.def456.update-unit.js",
      unit_script("main", &[("widget", r#"exports.version = 2; exports.theme = require("theme")"#)]),
    );
    source.insert(
      "vendor.def456.update-unit.js",
      unit_script("vendor", &[("theme", r#"exports.color = "red""#)]),
    );
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let report = client.handle_event(ServerEvent::BuildReady).await.unwrap().unwrap();

    let mut fetched: Vec<&str> = report.fetched.iter().map(|unit| unit.as_str()).collect();
    fetched.sort();
    assert_eq!(fetched, vec!["main", "vendor"]);
    assert_eq!(report.installs.len(), 2);
    assert_eq!(widget_version(&client), 2);
    let theme = client.exports(&ModuleId::new("theme")).unwrap().unwrap();
    assert_eq!(theme.as_table().unwrap().get::<String>("color").unwrap(), "red");
  }

  #[tokio::test]
  async fn accept_callback_runs_once_per_update() {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["main"]));
    source.insert("def456.update-manifest.json", manifest("ghi789", &["main"]));
    source.insert("main.def456.update-unit.js", unit_script("main", &[("widget", "exports.version = 2")]));
    source.insert("main.ghi789.update-unit.js", unit_script("main", &[("widget", "exports.version = 3")]));
    connect_to(&mut client, "abc123").await;

    client.handle_event(announce("def456")).await.unwrap();
    client.handle_event(ServerEvent::BuildReady).await.unwrap();
    assert_eq!(accepted(&client), vec!["widget"]);

    client.handle_event(announce("ghi789")).await.unwrap();
    client.handle_event(ServerEvent::BuildReady).await.unwrap();
    assert_eq!(accepted(&client), vec!["widget", "widget"]);
    assert_eq!(widget_version(&client), 3);
  }

  #[tokio::test]
  async fn grand_dependency_update_does_not_reach_app() {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["vendor"]));
    source.insert(
      "vendor.def456.update-unit.js",
      unit_script("vendor", &[("theme", r#"exports.color = "red""#)]),
    );
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let report = client.handle_event(ServerEvent::BuildReady).await.unwrap().unwrap();

    assert_eq!(report.accepted().count(), 0);
    assert!(accepted(&client).is_empty());
    assert_eq!(widget_version(&client), 1);
  }
}

mod failures {
  use super::*;

  #[tokio::test]
  async fn throwing_factory_reloads_and_keeps_unit_siblings() {
    let (mut client, source, reloads) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["main"]));
    source.insert(
      "main.def456.update-unit.js",
      unit_script(
        "main",
        &[("theme", r#"exports.color = "red""#), ("widget", r#"error("broken widget")"#)],
      ),
    );
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let err = client.handle_event(ServerEvent::BuildReady).await.unwrap_err();

    assert!(matches!(err, HmrError::FactoryExecution { ref module, .. } if module.as_str() == "widget"));
    assert_eq!(client.state(), UpdateState::Reloading);
    assert_eq!(client.applied_build(), Some(&BuildId::new("abc123")));
    assert_eq!(reloads.borrow().len(), 1);
    assert!(reloads.borrow()[0].contains("broken widget"));

    let theme = client.exports(&ModuleId::new("theme")).unwrap().unwrap();
    assert_eq!(theme.as_table().unwrap().get::<String>("color").unwrap(), "blue");
    assert_eq!(widget_version(&client), 1);
    assert!(accepted(&client).is_empty());
  }

  #[tokio::test]
  async fn missing_unit_reloads() {
    let (mut client, source, reloads) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["main"]));
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let err = client.handle_event(ServerEvent::BuildReady).await.unwrap_err();

    assert!(matches!(err, HmrError::UnitFetch { ref unit, .. } if unit.as_str() == "main"));
    assert_eq!(reloads.borrow().len(), 1);
  }

  #[tokio::test]
  async fn unit_for_unknown_module_only_defines_it() {
    let (mut client, source, reloads) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["lazy"]));
    source.insert(
      "lazy.def456.update-unit.js",
      unit_script("lazy", &[("settings", "exports.loaded_lazily = true")]),
    );
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let report = client.handle_event(ServerEvent::BuildReady).await.unwrap().unwrap();

    assert_eq!(report.installs[0].added, vec![ModuleId::new("settings")]);
    assert!(client.exports(&ModuleId::new("settings")).unwrap().is_none());
    assert!(reloads.borrow().is_empty());
  }

  #[tokio::test]
  async fn live_reload_when_hot_updates_are_off() {
    let config = ClientConfig {
      hot: false,
      ..Default::default()
    };
    let (mut client, source, reloads) = booted_client(&config);
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let err = client.handle_event(ServerEvent::BuildReady).await.unwrap_err();

    assert!(matches!(err, HmrError::LiveReload { .. }));
    assert!(source.requests().is_empty());
    assert_eq!(reloads.borrow().len(), 1);
  }
}

mod coalescing {
  use super::*;

  #[tokio::test]
  async fn burst_of_builds_ends_on_latest() {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["main"]));
    source.insert("def456.update-manifest.json", manifest("ghi789", &["main"]));
    source.insert("main.def456.update-unit.js", unit_script("main", &[("widget", "exports.version = 2")]));
    source.insert("main.ghi789.update-unit.js", unit_script("main", &[("widget", "exports.version = 3")]));

    let (tx, rx) = mpsc::channel(16);
    for event in [
      ServerEvent::ConnectionEstablished,
      announce("abc123"),
      announce("def456"),
      ServerEvent::BuildReady,
      announce("ghi789"),
      ServerEvent::BuildReady,
    ] {
      tx.send(event).await.unwrap();
    }
    drop(tx);

    let exit = client.run(rx).await;

    assert_eq!(exit, ClientExit::Disconnected);
    assert_eq!(client.applied_build(), Some(&BuildId::new("ghi789")));
    assert_eq!(client.pending_build(), None);
    assert_eq!(widget_version(&client), 3);
    assert_eq!(
      source.requests(),
      vec![
        "abc123.update-manifest.json",
        "main.def456.update-unit.js",
        "def456.update-manifest.json",
        "main.ghi789.update-unit.js",
      ]
    );
  }

  #[tokio::test]
  async fn newest_manifest_supersedes_pending_build() {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("ghi789", &["main"]));
    source.insert("main.ghi789.update-unit.js", unit_script("main", &[("widget", "exports.version = 3")]));
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();
    client.handle_event(announce("ghi789")).await.unwrap();

    let report = client.handle_event(ServerEvent::BuildReady).await.unwrap().unwrap();

    assert_eq!(report.applied, vec![BuildId::new("ghi789")]);
    assert_eq!(client.pending_build(), None);
    assert_eq!(source.requests().len(), 2);
  }

  #[tokio::test]
  async fn manifest_past_pending_build_ends_the_cycle() {
    let (mut client, source, reloads) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("ghi789", &["main"]));
    source.insert("main.ghi789.update-unit.js", unit_script("main", &[("widget", "exports.version = 3")]));
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    let report = client.handle_event(ServerEvent::BuildReady).await.unwrap().unwrap();

    assert_eq!(report.applied, vec![BuildId::new("ghi789")]);
    assert_eq!(
      source.requests(),
      vec!["abc123.update-manifest.json", "main.ghi789.update-unit.js"]
    );
    assert_eq!(client.applied_build(), Some(&BuildId::new("ghi789")));
    assert_eq!(client.pending_build(), None);
    assert_eq!(client.state(), UpdateState::Idle);
    assert_eq!(widget_version(&client), 3);
    assert!(reloads.borrow().is_empty());

    // The announcement of the build already running changes nothing.
    client.handle_event(announce("ghi789")).await.unwrap();
    let outcome = client.handle_event(ServerEvent::BuildReady).await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(source.requests().len(), 2);
    assert_eq!(client.state(), UpdateState::Idle);
  }

  #[tokio::test]
  async fn applied_build_is_never_fetched_again() {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &[]));
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();
    client.handle_event(ServerEvent::BuildReady).await.unwrap();

    client.handle_event(announce("abc123")).await.unwrap();
    client.handle_event(announce("def456")).await.unwrap();
    let outcome = client.handle_event(ServerEvent::BuildReady).await.unwrap();

    assert!(outcome.is_none());
    assert_eq!(source.requests().len(), 1);
    assert_eq!(client.state(), UpdateState::Idle);
  }

  #[tokio::test]
  async fn run_stops_after_reload() {
    let (mut client, _source, reloads) = hot_client();
    let (tx, rx) = mpsc::channel(16);
    tx.send(announce("abc123")).await.unwrap();
    tx.send(announce("def456")).await.unwrap();
    tx.send(ServerEvent::BuildReady).await.unwrap();

    let exit = client.run(rx).await;

    assert_eq!(exit, ClientExit::Reloaded);
    assert_eq!(reloads.borrow().len(), 1);
    drop(tx);
  }
}

mod manual_check {
  use super::*;

  fn request_check(client: &TestClient) -> LuaResult<()> {
    let app = client.runtime().require(&ModuleId::new("app"))?;
    let check: LuaFunction = app.as_table().unwrap().get("check")?;
    check.call::<()>(())
  }

  fn check_result(client: &TestClient) -> Option<(bool, Option<String>)> {
    let result: Option<LuaTable> = client.runtime().lua().globals().get("check_result").unwrap();
    result.map(|table| (table.get("ok").unwrap(), table.get("reason").unwrap()))
  }

  #[tokio::test]
  async fn check_applies_pending_build() -> LuaResult<()> {
    let (mut client, source, _) = hot_client();
    source.insert("abc123.update-manifest.json", manifest("def456", &["main"]));
    source.insert("main.def456.update-unit.js", unit_script("main", &[("widget", "exports.version = 2")]));
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    request_check(&client)?;
    assert_eq!(client.serve_checks().await, 1);

    assert_eq!(check_result(&client), Some((true, None)));
    assert_eq!(client.applied_build(), Some(&BuildId::new("def456")));
    assert_eq!(widget_version(&client), 2);
    Ok(())
  }

  #[tokio::test]
  async fn check_without_pending_build_resolves() -> LuaResult<()> {
    let (mut client, source, _) = hot_client();
    connect_to(&mut client, "abc123").await;

    request_check(&client)?;
    client.serve_checks().await;

    assert_eq!(check_result(&client), Some((true, None)));
    assert!(source.requests().is_empty());
    Ok(())
  }

  #[tokio::test]
  async fn failed_check_rejects_and_reloads() -> LuaResult<()> {
    let (mut client, _source, reloads) = hot_client();
    connect_to(&mut client, "abc123").await;
    client.handle_event(announce("def456")).await.unwrap();

    request_check(&client)?;
    client.serve_checks().await;

    let (ok, reason) = check_result(&client).unwrap();
    assert!(!ok);
    assert!(reason.unwrap().contains("update manifest"));
    assert_eq!(client.state(), UpdateState::Reloading);
    assert_eq!(reloads.borrow().len(), 1);
    Ok(())
  }
}

//! End-to-end scenarios across controller, relay, receiver and enforcer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use policy::{ActionKind, Capability, PresetCatalog};
use runtime::{
    BufferConfig, CapabilityCall, ChannelConfig, ChannelError, Controller, DenialSurface, Envelope,
    Host, LogBuffer, Mailbox, PolicyCache, PolicyReceiver, Reason, Relay, Request, RuntimeConfig,
};
use storage::{Decision, Store};
use tokio::sync::{broadcast, mpsc};

fn start(config: RuntimeConfig) -> (Host, Arc<Store>) {
    let store = Arc::new(Store::in_memory().unwrap());
    let host = Host::start(store.clone(), &config, PresetCatalog::empty()).unwrap();
    (host, store)
}

fn now() -> DateTime<Utc> {
    "2026-06-01T12:00:00Z".parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn blocked_geolocation_logs_exactly_once() {
    let (host, store) = start(RuntimeConfig::default());
    host.synced().await;
    let mut events = host.subscribe();

    let effective = host.controller().resolve("https://example.test");
    assert!(!effective.allows(Capability::Geolocation));

    let enforcer = host.enforcer("https://example.test");
    let verdict = enforcer.check(CapabilityCall::Geolocation { watch: false });
    assert_eq!(verdict.decision, Decision::Blocked);
    assert!(matches!(verdict.surface, Some(DenialSurface::AsyncError { code: 1, .. })));

    let event = events.recv().await.unwrap();
    assert_eq!(event.capability, "geolocation");

    tokio::time::sleep(Duration::from_millis(600)).await;
    let logs = store.load_logs(None, None).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].capability, "geolocation");
    assert_eq!(logs[0].decision, Decision::Blocked);
    assert_eq!(logs[0].origin, "https://example.test");

    host.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_persists_decisions_still_in_flight() {
    let (host, store) = start(RuntimeConfig::default());
    host.synced().await;

    let enforcer = host.enforcer("https://example.test");
    for _ in 0..3 {
        enforcer.check(CapabilityCall::Geolocation { watch: false });
    }
    host.shutdown().await;

    assert_eq!(store.load_logs(None, None).unwrap().len(), 3);
    assert!(
        enforcer
            .check(CapabilityCall::Geolocation { watch: false })
            .record
            .is_some()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_persists_decisions_on_multi_thread_runtime() {
    let (host, store) = start(RuntimeConfig::default());
    host.synced().await;

    let enforcer = host.enforcer("https://example.test");
    for _ in 0..20 {
        enforcer.check(CapabilityCall::Notification);
    }
    host.shutdown().await;

    assert_eq!(store.load_logs(None, None).unwrap().len(), 20);
}

#[tokio::test(start_paused = true)]
async fn preset_and_temporary_override_reach_enforcer() {
    let (host, _) = start(RuntimeConfig::default());
    host.synced().await;

    host.controller()
        .apply_preset("https://example.test", "permissive")
        .unwrap();
    host.controller()
        .set_temporary_override_at("https://other.test", 5, now())
        .unwrap();
    host.wait_for_version(3).await;

    let eval = || CapabilityCall::Eval { source_bytes: 12 };
    let example = host.enforcer("https://example.test");
    assert!(example.check(eval()).is_allowed());

    let other = host.enforcer("https://other.test");
    let inside = other.check_at(eval().into(), None, None, now() + chrono::Duration::minutes(4));
    assert!(inside.is_allowed());
    assert_eq!(inside.reason, Reason::TemporaryOverride);

    let after = other.check_at(eval().into(), None, None, now() + chrono::Duration::minutes(6));
    assert_eq!(after.decision, Decision::Blocked);
    assert!(matches!(after.surface, Some(DenialSurface::Throw { ref name, .. }) if name == "EvalError"));

    host.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn overflowing_buffer_keeps_newest() {
    let config = RuntimeConfig {
        buffer: BufferConfig {
            flush_interval_ms: 10_000,
            queue_capacity: 3,
            ..BufferConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let (host, store) = start(config);
    host.synced().await;
    let mut events = host.subscribe();

    let enforcer = host.enforcer("https://example.test");
    for n in 0..5 {
        enforcer.check(CapabilityCall::Image {
            url: format!("https://cdn.test/{n}.png"),
        });
    }
    for _ in 0..5 {
        events.recv().await.unwrap();
    }
    assert_eq!(host.buffer().pending(), 3);
    assert_eq!(host.buffer().dropped(), 2);

    host.shutdown().await;
    let logs = store.load_logs(None, None).unwrap();
    let urls: Vec<_> = logs
        .iter()
        .map(|r| r.detail["call"]["url"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://cdn.test/4.png",
            "https://cdn.test/3.png",
            "https://cdn.test/2.png"
        ]
    );
}

/// Drops the first `lose` envelopes, forwards the rest.
struct Lossy {
    lose: AtomicUsize,
    inner: mpsc::UnboundedSender<Envelope>,
}

impl Mailbox for Lossy {
    fn post(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let remaining = self.lose.load(Ordering::SeqCst);
        if remaining > 0 {
            self.lose.store(remaining - 1, Ordering::SeqCst);
            return Ok(());
        }
        self.inner.post(envelope)
    }
}

#[tokio::test(start_paused = true)]
async fn receiver_resyncs_after_missed_push() {
    let store = Arc::new(Store::in_memory().unwrap());
    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    let (content_tx, content_rx) = mpsc::unbounded_channel();

    let controller = Arc::new(
        Controller::open(store.clone(), Arc::new(relay_tx.clone()), PresetCatalog::empty()).unwrap(),
    );
    let (events, _) = broadcast::channel(8);
    let relay = Relay::new(
        controller.clone(),
        Arc::new(Lossy {
            lose: AtomicUsize::new(2),
            inner: content_tx,
        }),
        LogBuffer::new(store, BufferConfig::default()),
        events,
    );
    let _relay = relay.spawn(relay_rx);

    // The push for this mutation is lost in transit.
    controller.apply_preset("https://example.test", "permissive").unwrap();

    let cache = PolicyCache::new();
    let config = ChannelConfig {
        resync_timeout_ms: 200,
        ..ChannelConfig::default()
    };
    let _receiver = PolicyReceiver::new(cache.clone(), Arc::new(relay_tx), config).spawn(content_rx);

    // So is the answer to the first sync request.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!cache.is_synced());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.version(), Some(2));
    assert!(cache.resolve("https://example.test", Utc::now()).allows(Capability::Camera));
}

#[tokio::test(start_paused = true)]
async fn undo_unblocks_artifact() {
    let (host, _) = start(RuntimeConfig::default());
    host.synced().await;
    let enforcer = host.enforcer("https://shop.test");
    let write = || CapabilityCall::CookieWrite { name: "_ga".into() };

    host.controller()
        .record_artifact_action(ActionKind::Block, "_ga", "https://shop.test")
        .unwrap();
    host.wait_for_version(2).await;
    let blocked = enforcer.check(write());
    assert_eq!(blocked.reason, Reason::BlockedArtifact);
    assert_eq!(enforcer.filter_cookie_header("_ga=1; cart=2"), "cart=2");

    let undone = host.controller().undo_artifact_action().unwrap();
    assert_eq!(undone.artifact_name, "_ga");
    host.wait_for_version(3).await;
    assert!(enforcer.check(write()).is_allowed());

    host.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn command_surface_round_trip() {
    let (host, _) = start(RuntimeConfig::default());

    let request: Request = serde_json::from_str(
        r#"{"id": 1, "type": "setTemporaryOverride", "origin": "https://a.test", "minutes": 5}"#,
    )
    .unwrap();
    let response = serde_json::to_value(host.controller().handle_request(request)).unwrap();
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["type"], "temporaryOverride");
    assert!(response["result"]["data"]["expiresAt"].is_string());

    let request: Request =
        serde_json::from_str(r#"{"id": "p", "type": "applyPreset", "origin": "https://a.test", "preset": "nope"}"#)
            .unwrap();
    let response = serde_json::to_value(host.controller().handle_request(request)).unwrap();
    assert_eq!(response["error"]["code"], "unknownPreset");

    let request: Request = serde_json::from_str(r#"{"id": 2, "type": "listPresets"}"#).unwrap();
    let response = serde_json::to_value(host.controller().handle_request(request)).unwrap();
    assert_eq!(response["result"]["data"].as_array().unwrap().len(), 4);

    host.shutdown().await;
}

use async_trait::async_trait;
use dms_storage::{MemoryStore, Store};
use dms_sync::{Outbox, SyncConfig, SyncError, SyncResult, Transport, create_sync_engine};
use dms_types::{NewSyncItem, SyncOperation, SyncQueueItem};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Default)]
struct CountingTransport {
    calls: AtomicU32,
    failing: bool,
}

impl CountingTransport {
    fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn deliver(&self, _item: &SyncQueueItem) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(SyncError::Transient("503 Service Unavailable".into()));
        }
        Ok(())
    }
}

async fn setup(config: SyncConfig) -> (Arc<Outbox>, Arc<CountingTransport>) {
    setup_with(config, CountingTransport::default()).await
}

async fn setup_with(
    config: SyncConfig,
    transport: CountingTransport,
) -> (Arc<Outbox>, Arc<CountingTransport>) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let transport = Arc::new(transport);
    let outbox = Arc::new(Outbox::new(store, transport.clone(), config));
    outbox
        .enqueue(NewSyncItem::new(
            "vouchers",
            1,
            SyncOperation::Insert,
            serde_json::json!({ "id": 1 }),
        ))
        .await
        .unwrap();
    (outbox, transport)
}

async fn wait_for_calls(transport: &CountingTransport, n: u32) {
    for _ in 0..200 {
        if transport.calls.load(Ordering::SeqCst) >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transport never reached {n} calls");
}

fn slow_interval() -> SyncConfig {
    SyncConfig {
        sync_interval_secs: 3600,
        ..Default::default()
    }
}

// ── Commands ─────────────────────────────────────────────────────

#[tokio::test]
async fn force_sync_drains_immediately() {
    let (outbox, transport) = setup(slow_interval()).await;
    let (handle, engine) = create_sync_engine(Arc::clone(&outbox));
    let task = tokio::spawn(engine.run());

    handle.force_sync().await.unwrap();
    wait_for_calls(&transport, 1).await;
    assert_eq!(outbox.status().await.unwrap().pending_items, 0);

    handle.stop().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn back_to_back_force_syncs_drain_once() {
    // No backoff, so a second queued drain would attempt the item again.
    let config = SyncConfig {
        retry_backoff_secs: 0,
        ..slow_interval()
    };
    let (outbox, transport) = setup_with(config, CountingTransport::failing()).await;
    let (handle, engine) = create_sync_engine(Arc::clone(&outbox));
    let task = tokio::spawn(engine.run());

    handle.force_sync().await.unwrap();
    handle.force_sync().await.unwrap();
    wait_for_calls(&transport, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    // Once the queued request is claimed, a new one goes through.
    handle.force_sync().await.unwrap();
    wait_for_calls(&transport, 2).await;

    handle.stop().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn reconnecting_triggers_a_drain() {
    let (outbox, transport) = setup(slow_interval()).await;
    let (handle, engine) = create_sync_engine(Arc::clone(&outbox));
    let task = tokio::spawn(engine.run());

    handle.set_online(false).await.unwrap();
    handle.force_sync().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

    handle.set_online(true).await.unwrap();
    wait_for_calls(&transport, 1).await;

    handle.stop().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn interval_tick_drains_while_online() {
    let config = SyncConfig {
        sync_interval_secs: 1,
        ..Default::default()
    };
    let (outbox, transport) = setup(config).await;
    let (handle, engine) = create_sync_engine(outbox);
    let task = tokio::spawn(engine.run());

    tokio::time::timeout(Duration::from_secs(5), wait_for_calls(&transport, 1))
        .await
        .unwrap();

    handle.stop().await.unwrap();
    task.await.unwrap();
}

/// Fails every delivery. The first one takes `first_busy`.
struct SlowFailingTransport {
    first_busy: Duration,
    starts: std::sync::Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl Transport for SlowFailingTransport {
    async fn deliver(&self, _item: &SyncQueueItem) -> SyncResult<()> {
        let first = {
            let mut starts = self.starts.lock().unwrap();
            starts.push(tokio::time::Instant::now());
            starts.len() == 1
        };
        if first {
            tokio::time::sleep(self.first_busy).await;
        }
        Err(SyncError::Transient("upstream slow".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn overrunning_drain_does_not_trigger_catch_up_ticks() {
    let config = SyncConfig {
        sync_interval_secs: 1,
        retry_backoff_secs: 0,
        max_retry_attempts: 100,
        ..Default::default()
    };
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let transport = Arc::new(SlowFailingTransport {
        first_busy: Duration::from_millis(3500),
        starts: std::sync::Mutex::new(Vec::new()),
    });
    let outbox = Arc::new(Outbox::new(store, transport.clone(), config));
    outbox
        .enqueue(NewSyncItem::new(
            "vouchers",
            1,
            SyncOperation::Insert,
            serde_json::json!({ "id": 1 }),
        ))
        .await
        .unwrap();
    let (handle, engine) = create_sync_engine(outbox);
    let task = tokio::spawn(engine.run());

    for _ in 0..200 {
        if transport.starts.lock().unwrap().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let starts = transport.starts.lock().unwrap().clone();
    assert!(starts.len() >= 3, "only {} drains ran", starts.len());

    // The first drain spans three ticks. One overdue tick fires when it
    // ends; the rest are dropped, so the next drain waits for a boundary.
    assert!(starts[2] - starts[1] >= Duration::from_millis(400));

    handle.stop().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn dropping_every_handle_stops_the_engine() {
    let (outbox, _) = setup(slow_interval()).await;
    let (handle, engine) = create_sync_engine(outbox);
    let task = tokio::spawn(engine.run());

    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn commands_after_stop_report_a_closed_channel() {
    let (outbox, _) = setup(slow_interval()).await;
    let (handle, engine) = create_sync_engine(outbox);
    let task = tokio::spawn(engine.run());

    handle.stop().await.unwrap();
    task.await.unwrap();

    let err = handle.set_online(true).await.unwrap_err();
    assert!(matches!(err, SyncError::ChannelClosed));
}

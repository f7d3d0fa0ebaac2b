//! Delivery queue durability, ordering and retry ceiling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use ferry::config::SettingsHandle;
use ferry::forward::queue::{DeliveryQueue, JsonFileStore, QueueError, QueueStore};
use ferry::forward::{spawn_flush, ForwardError};
use ferry::types::CanonicalPayload;

use crate::support::{
    file_queue, settle, test_config, MemoryStore, RecordingDestination, Reply, DESTINATION,
};

async fn memory_queue(settings: SettingsHandle) -> (Arc<DeliveryQueue>, Arc<MemoryStore>) {
    let store = MemoryStore::new();
    let queue = DeliveryQueue::open(store.clone(), settings)
        .await
        .expect("open queue");
    (Arc::new(queue), store)
}

async fn enqueue_texts(queue: &DeliveryQueue, texts: &[&str]) {
    for text in texts {
        queue
            .enqueue(DESTINATION, CanonicalPayload::text(*text))
            .await
            .expect("enqueue");
    }
}

#[tokio::test]
async fn entries_survive_reopen_with_zero_retries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = SettingsHandle::new(test_config());

    let first = file_queue(dir.path(), settings.clone()).await;
    enqueue_texts(&first, &["one", "two"]).await;
    let before = first.entries().await;
    drop(first);

    let reopened = file_queue(dir.path(), settings).await;
    let after = reopened.entries().await;
    assert_eq!(after, before);
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|e| e.retries == 0));
    assert_eq!(after[0].payload.text, "one");
    assert_eq!(after[1].destination, DESTINATION);
    assert_ne!(after[0].id, after[1].id);
}

#[tokio::test]
async fn missing_or_blank_store_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path().join("absent.json"));
    assert!(store.load().await.expect("load").is_empty());

    let blank = dir.path().join("blank.json");
    std::fs::write(&blank, "  \n").expect("write");
    assert!(JsonFileStore::new(&blank).load().await.expect("load").is_empty());
}

#[tokio::test]
async fn corrupt_store_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("queue.json");
    std::fs::write(&path, "{not json").expect("write");
    let err = JsonFileStore::new(&path).load().await.expect_err("corrupt");
    assert!(matches!(err, QueueError::Serde(_)), "got: {err:?}");
}

#[tokio::test]
async fn save_creates_parent_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("queue.json");
    let store = JsonFileStore::new(&path);
    store.save(&[]).await.expect("save");
    assert!(path.exists());
    assert_eq!(store.path(), path.as_path());
}

#[tokio::test(start_paused = true)]
async fn flush_delivers_in_fifo_order_and_empties_store() {
    let settings = SettingsHandle::new(test_config());
    let (queue, store) = memory_queue(settings).await;
    let destination = RecordingDestination::new();
    enqueue_texts(&queue, &["a", "b", "c"]).await;
    assert_eq!(store.persisted().len(), 3);

    let report = spawn_flush(Arc::clone(&queue), destination.clone())
        .await
        .expect("join");

    assert_eq!(report.delivered, 3);
    assert_eq!(destination.delivered_texts(), vec!["a", "b", "c"]);
    assert!(queue.is_empty().await);
    assert!(store.persisted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_abandons_after_exactly_max_attempts() {
    let settings = SettingsHandle::new(test_config());
    let (queue, store) = memory_queue(settings).await;
    let destination = RecordingDestination::new();
    destination.script(&[Reply::Transient; 10]);
    enqueue_texts(&queue, &["doomed"]).await;

    let report = spawn_flush(Arc::clone(&queue), destination.clone())
        .await
        .expect("join");

    assert_eq!(destination.attempt_count(), 3);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.retried, 2);
    assert!(queue.is_empty().await);
    assert!(store.persisted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let settings = SettingsHandle::new(test_config());
    let (queue, _) = memory_queue(settings).await;
    let destination = RecordingDestination::new();
    destination.script(&[Reply::Transient, Reply::Transient]);
    enqueue_texts(&queue, &["slow"]).await;

    spawn_flush(Arc::clone(&queue), destination.clone())
        .await
        .expect("join");

    let times = destination.attempt_times();
    assert_eq!(times.len(), 3);
    let (first_gap, second_gap) = (times[1] - times[0], times[2] - times[1]);
    assert!(first_gap >= Duration::from_millis(10), "got {first_gap:?}");
    assert!(first_gap < Duration::from_millis(20), "got {first_gap:?}");
    assert!(second_gap >= Duration::from_millis(20), "got {second_gap:?}");
    assert_eq!(destination.delivered_texts(), vec!["slow"]);
}

#[tokio::test(start_paused = true)]
async fn failing_head_blocks_the_rest() {
    let settings = SettingsHandle::new(test_config());
    let (queue, _) = memory_queue(settings).await;
    let destination = RecordingDestination::new();
    destination.script(&[Reply::Transient, Reply::Transient]);
    enqueue_texts(&queue, &["first", "second"]).await;

    spawn_flush(Arc::clone(&queue), destination.clone())
        .await
        .expect("join");

    assert_eq!(destination.attempt_count(), 4);
    assert_eq!(destination.delivered_texts(), vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn rejected_payload_is_dropped_without_retry() {
    let settings = SettingsHandle::new(test_config());
    let (queue, _) = memory_queue(settings).await;
    let destination = RecordingDestination::new();
    destination.script(&[Reply::Permanent]);
    enqueue_texts(&queue, &["bad", "good"]).await;

    let report = spawn_flush(Arc::clone(&queue), destination.clone())
        .await
        .expect("join");

    assert_eq!(report.dropped, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(destination.attempt_count(), 2);
    assert_eq!(destination.delivered_texts(), vec!["good"]);
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_is_persisted_before_backoff() {
    let settings = SettingsHandle::new(test_config());
    let (queue, store) = memory_queue(settings).await;
    enqueue_texts(&queue, &["x"]).await;

    let flushing = Arc::clone(&queue);
    let task = tokio::spawn(async move {
        flushing
            .flush(|_| async { Err::<(), _>(ForwardError::TransientSendFailure("offline".to_owned())) })
            .await
    });
    settle().await;

    let persisted = store.persisted();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].retries, 1);
    assert!(queue.is_flushing());

    let report = task.await.expect("join");
    assert_eq!(report.abandoned, 1);
    assert!(!queue.is_flushing());
}

#[tokio::test(start_paused = true)]
async fn concurrent_flush_is_refused() {
    let settings = SettingsHandle::new(test_config());
    let (queue, _) = memory_queue(settings).await;
    enqueue_texts(&queue, &["held"]).await;

    let gate = Arc::new(Notify::new());
    let flushing = Arc::clone(&queue);
    let held = Arc::clone(&gate);
    let first = tokio::spawn(async move {
        flushing
            .flush(move |_| {
                let held = Arc::clone(&held);
                async move {
                    held.notified().await;
                    Ok::<(), ForwardError>(())
                }
            })
            .await
    });
    settle().await;
    assert!(queue.is_flushing());

    let second = queue.flush(|_| async { Ok::<(), ForwardError>(()) }).await;
    assert!(second.already_running);
    assert_eq!(second.delivered, 0);

    gate.notify_one();
    let report = first.await.expect("join");
    assert!(!report.already_running);
    assert_eq!(report.delivered, 1);
}

#[tokio::test(start_paused = true)]
async fn entries_enqueued_during_flush_are_drained_by_it() {
    let settings = SettingsHandle::new(test_config());
    let (queue, _) = memory_queue(settings).await;
    enqueue_texts(&queue, &["early"]).await;

    let gate = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let flushing = Arc::clone(&queue);
    let (held, counter) = (Arc::clone(&gate), Arc::clone(&calls));
    let task = tokio::spawn(async move {
        flushing
            .flush(move |_| {
                let held = Arc::clone(&held);
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        held.notified().await;
                    }
                    Ok::<(), ForwardError>(())
                }
            })
            .await
    });
    settle().await;

    enqueue_texts(&queue, &["late"]).await;
    gate.notify_one();

    let report = task.await.expect("join");
    assert_eq!(report.delivered, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(queue.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_follows_config_reload() {
    let settings = SettingsHandle::new(test_config());
    let (queue, _) = memory_queue(settings.clone()).await;
    let destination = RecordingDestination::new();
    destination.script(&[Reply::Transient; 10]);
    enqueue_texts(&queue, &["x"]).await;

    let mut config = test_config();
    config.queue.max_retries = 1;
    settings.replace(config);

    spawn_flush(Arc::clone(&queue), destination.clone())
        .await
        .expect("join");
    assert_eq!(destination.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_enqueue_leaves_nothing_queued() {
    let settings = SettingsHandle::new(test_config());
    let (queue, store) = memory_queue(settings).await;
    let destination = RecordingDestination::new();

    store.fail_next_save();
    let err = queue
        .enqueue(DESTINATION, CanonicalPayload::text("lost"))
        .await
        .expect_err("save should fail");
    assert!(matches!(err, QueueError::Io { .. }), "got: {err:?}");
    assert!(queue.is_empty().await);

    enqueue_texts(&queue, &["second"]).await;
    let persisted: Vec<String> = store
        .persisted()
        .into_iter()
        .map(|e| e.payload.text)
        .collect();
    assert_eq!(persisted, vec!["second"]);

    let report = spawn_flush(Arc::clone(&queue), destination.clone())
        .await
        .expect("join");
    assert_eq!(report.delivered, 1);
    assert_eq!(destination.delivered_texts(), vec!["second"]);
}

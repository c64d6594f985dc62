//! End-to-end behavior of history truncation and archival.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dalibot_context::{
    ArchiveError, ArchiveSink, Archiver, HistoryBuffer, HistorySettings, SessionDefaults,
    SessionStore, TokenCounter,
};
use dalibot_types::{ChatMessage, ModelSelection, Role, SessionId, WireMessage};

const SYSTEM: &str = "You are a helpful assistant.";

fn counter() -> TokenCounter {
    TokenCounter::for_model("gpt-4o")
}

/// Content costing roughly fifty tokens as a message.
fn fifty_token_text(i: usize) -> String {
    format!("turn {i} {}", "lorem ".repeat(40))
}

fn turn(i: usize) -> ChatMessage {
    let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
    ChatMessage::text(role, "someone", fifty_token_text(i))
}

fn non_system_cost(window: &[WireMessage], counter: &TokenCounter) -> u32 {
    window
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| counter.count_message(&ChatMessage::text(m.role, "", m.content.clone())))
        .sum()
}

#[derive(Default)]
struct RecordingSink {
    puts: Mutex<Vec<(String, Vec<u8>)>>,
    notify: Mutex<Option<mpsc::Sender<String>>>,
}

impl RecordingSink {
    fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

impl ArchiveSink for RecordingSink {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        Ok(self
            .puts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, bytes)| bytes.clone()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), bytes.to_vec()));
        if let Some(tx) = self.notify.lock().unwrap().as_ref() {
            let _ = tx.send(key.to_string());
        }
        Ok(())
    }
}

struct FailingSink;

impl ArchiveSink for FailingSink {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        Err(ArchiveError::Unavailable("no credentials".to_string()))
    }

    fn put(&self, _key: &str, _bytes: &[u8]) -> Result<(), ArchiveError> {
        Err(ArchiveError::Unavailable("no credentials".to_string()))
    }
}

fn store(settings: HistorySettings, sink: Arc<dyn ArchiveSink>) -> SessionStore {
    SessionStore::new(SessionDefaults {
        system_prompt: SYSTEM.to_string(),
        models: ModelSelection::new("gpt-4o".into(), "dall-e-3".into()),
        history: settings,
    })
    .with_archiver(Arc::new(Archiver::new(sink, "dalibot")))
}

#[test]
fn thirty_pairs_keep_only_the_most_recent_within_budget() {
    let counter = counter();
    let mut history = HistoryBuffer::new(SYSTEM, HistorySettings::new(30, 500, 1000));
    let originals: Vec<ChatMessage> = (0..60).map(turn).collect();
    let per_message = counter.count_message(&originals[59]);
    assert!(
        (30..=80).contains(&per_message),
        "fixture should cost about fifty tokens, got {per_message}"
    );

    let mut expected_kept = 0;
    let mut total = 0;
    for message in originals.iter().rev() {
        total += counter.count_message(message);
        if total > 500 || expected_kept + 1 >= 30 {
            break;
        }
        expected_kept += 1;
    }
    assert!((6..=16).contains(&expected_kept));

    for message in originals.iter().cloned() {
        let _ = history.insert(message, &counter);
    }
    let window = history.truncate(500, &counter);

    assert_eq!(window[0], WireMessage::new(Role::System, SYSTEM));
    assert_eq!(window.len(), 1 + expected_kept);

    let tail: Vec<&str> = originals[60 - expected_kept..]
        .iter()
        .map(ChatMessage::content)
        .collect();
    let kept: Vec<&str> = window[1..].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(kept, tail);
    assert!(non_system_cost(&window, &counter) <= 500);
}

#[test]
fn single_oversized_message_yields_only_system_prompt() {
    let counter = counter();
    let mut history = HistoryBuffer::new(SYSTEM, HistorySettings::default());
    let _ = history.insert(
        ChatMessage::text(Role::User, "someone", "lorem ".repeat(2000)),
        &counter,
    );

    let window = history.truncate(500, &counter);

    assert_eq!(window, vec![WireMessage::new(Role::System, SYSTEM)]);
}

#[test]
fn reset_then_truncate_yields_only_system_prompt() {
    let counter = counter();
    let mut history = HistoryBuffer::new(SYSTEM, HistorySettings::default());
    for i in 0..5 {
        let _ = history.insert(turn(i), &counter);
    }

    let _ = history.reset();
    let window = history.truncate(2048, &counter);

    assert_eq!(window, vec![WireMessage::new(Role::System, SYSTEM)]);
}

#[test]
fn truncation_invariants_hold_across_budgets() {
    let counter = counter();
    for capacity_count in [1, 2, 5, 30] {
        for max_tokens in [0, 60, 200, 500, 5000] {
            let mut history =
                HistoryBuffer::new(SYSTEM, HistorySettings::new(capacity_count, 100_000, 1000));
            let mut originals = Vec::new();
            for i in 0..12 {
                let message = if i == 4 {
                    ChatMessage::system("mid-conversation note")
                } else {
                    turn(i)
                };
                originals.push(message.content().to_string());
                let _ = history.insert(message, &counter);
            }

            let window = history.truncate(max_tokens, &counter);

            assert_eq!(window[0].role, Role::System);
            assert_eq!(window[0].content, SYSTEM);
            assert!(non_system_cost(&window, &counter) <= max_tokens);
            let non_system = window.iter().filter(|m| m.role != Role::System).count();
            assert!(non_system < capacity_count.max(1));

            // Survivors appear in their original relative order.
            let positions: Vec<usize> = window[1..]
                .iter()
                .map(|m| originals.iter().position(|c| *c == m.content).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));

            // Truncating again without inserts changes nothing.
            assert_eq!(history.truncate(max_tokens, &counter), window);
        }
    }
}

#[test]
fn mid_conversation_system_turn_survives_in_place() {
    let counter = counter();
    let mut history = HistoryBuffer::new(SYSTEM, HistorySettings::new(1000, 100_000, 1000));
    let _ = history.insert(turn(0), &counter);
    let _ = history.insert(ChatMessage::system("remember the user likes cats"), &counter);
    let _ = history.insert(turn(1), &counter);

    let per_message = counter.count_message(&history.entries()[2]);
    let window = history.truncate(per_message, &counter);

    assert_eq!(window.len(), 3);
    assert_eq!(window[0].content, SYSTEM);
    assert_eq!(window[1].content, "remember the user likes cats");
    assert_eq!(window[2].content, fifty_token_text(1));
}

#[test]
fn archive_threshold_pushes_batch_once_and_keeps_entries() {
    let sink = Arc::new(RecordingSink::default());
    let store = store(HistorySettings::new(1000, 100_000, 5), sink.clone());
    let id = SessionId::new(42);

    for i in 0..4 {
        store.insert(id, turn(i));
    }
    assert_eq!(sink.put_count(), 0);

    store.insert(id, turn(4));

    assert_eq!(sink.put_count(), 1);
    let (key, bytes) = sink.puts.lock().unwrap()[0].clone();
    assert!(key.starts_with("dalibot/"));
    let records: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[4]["content"], fifty_token_text(4));
    assert_eq!(store.entries(id).len(), 5);

    for i in 5..9 {
        store.insert(id, turn(i));
    }
    assert_eq!(sink.put_count(), 1);
}

#[test]
fn archive_batches_for_same_day_are_merged() {
    let sink = Arc::new(RecordingSink::default());
    let store = store(HistorySettings::new(1000, 100_000, 2), sink.clone());
    let id = SessionId::new(1);

    for i in 0..4 {
        store.insert(id, turn(i));
    }

    let puts = sink.puts.lock().unwrap();
    assert_eq!(puts.len(), 2);
    let merged: Vec<serde_json::Value> = serde_json::from_slice(&puts[1].1).unwrap();
    assert_eq!(merged.len(), 4);
}

#[test]
fn failing_archive_does_not_disturb_the_conversation() {
    let store = store(HistorySettings::new(1000, 100_000, 1), Arc::new(FailingSink));
    let id = SessionId::new(5);

    store.insert(id, turn(0));
    let window = store.record_and_window(id, turn(1));

    let entries = store.entries(id);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].content(), fifty_token_text(1));
    assert_eq!(window.len(), 3);
}

#[test]
fn reset_flushes_unarchived_turns() {
    let sink = Arc::new(RecordingSink::default());
    let store = store(HistorySettings::new(1000, 100_000, 50), sink.clone());
    let id = SessionId::new(6);

    store.insert(id, turn(0));
    store.insert(id, turn(1));
    store.reset(id);

    assert_eq!(sink.put_count(), 1);
    assert!(store.entries(id).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_push_runs_off_the_async_path() {
    let (tx, rx) = mpsc::channel();
    let sink = Arc::new(RecordingSink::default());
    *sink.notify.lock().unwrap() = Some(tx);
    let store = store(HistorySettings::new(1000, 100_000, 1), sink.clone());

    store.insert(SessionId::new(8), turn(0));

    let key = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("archive push");
    assert!(key.ends_with(".json"));
    assert_eq!(sink.put_count(), 1);
}

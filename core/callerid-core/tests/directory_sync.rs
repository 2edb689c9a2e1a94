//! Integration tests for phone-book persistence and directory publication.

use callerid_core::testing::{RecordingDirectorySink, SinkCall};
use callerid_core::{
    load_payload, publish, save_payload_json, synchronize, PublishReport, RequestMode,
    StorageConfig,
};
use callerid_protocol::PhoneBookEntry;
use tempfile::TempDir;

fn storage() -> (TempDir, StorageConfig) {
    let temp = TempDir::new().unwrap();
    let storage = StorageConfig::with_root(temp.path().join("shared"));
    (temp, storage)
}

#[test]
fn saved_phone_book_publishes_in_ascending_order() {
    let (_temp, storage) = storage();
    save_payload_json(
        &storage,
        r#"{
            "entries": [
                {"number": "０９０-１２３４-５６７８", "label": "Tanaka"},
                {"number": "+81 3 1111 2222", "label": "Office"},
                {"number": "090 1234 5678", "label": "Tanaka (mobile)"},
                {"number": "n/a", "label": "Broken"},
                {"number": "0120-444-444", "label": "Support"}
            ],
            "updated_at": "2024-05-01T09:30:00+09:00"
        }"#,
    )
    .unwrap();

    let payload = load_payload(&storage);
    let snapshot = synchronize(&payload.entries, "81");
    let sink = RecordingDirectorySink::new();
    let report = publish(&snapshot, sink.as_ref(), RequestMode::Incremental);

    assert_eq!(report, PublishReport { applied: 3, rejected: 0 });
    assert_eq!(
        sink.calls(),
        vec![
            SinkCall::RemoveAll,
            SinkCall::Add(81120444444, "Support".to_string()),
            SinkCall::Add(81311112222, "Office".to_string()),
            SinkCall::Add(819012345678, "Tanaka (mobile)".to_string()),
            SinkCall::Complete(report),
        ]
    );
}

#[test]
fn published_numbers_are_strictly_ascending() {
    let raw: Vec<PhoneBookEntry> = (0..200u64)
        .map(|i| {
            let n = (i * 7_919) % 1_000;
            PhoneBookEntry::new(format!("090-{:04}-{:04}", n, i % 17), format!("#{}", i))
        })
        .collect();

    let snapshot = synchronize(&raw, "81");
    let sink = RecordingDirectorySink::new();
    publish(&snapshot, sink.as_ref(), RequestMode::Full);

    let added = sink.added_numbers();
    assert_eq!(added.len(), snapshot.len());
    assert!(added.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn repeated_incremental_runs_replace_the_data_set() {
    let (_temp, storage) = storage();
    let sink = RecordingDirectorySink::new();

    save_payload_json(
        &storage,
        r#"{"entries":[{"number":"090-1","label":"a"},{"number":"090-2","label":"b"}]}"#,
    )
    .unwrap();
    let first = synchronize(&load_payload(&storage).entries, "81");
    publish(&first, sink.as_ref(), RequestMode::Incremental);

    save_payload_json(&storage, r#"{"entries":[{"number":"090-3","label":"c"}]}"#).unwrap();
    let second = synchronize(&load_payload(&storage).entries, "81");
    publish(&second, sink.as_ref(), RequestMode::Incremental);

    let calls = sink.calls();
    let last_clear = calls
        .iter()
        .rposition(|call| *call == SinkCall::RemoveAll)
        .unwrap();
    let after_clear: Vec<_> = calls[last_clear + 1..]
        .iter()
        .filter_map(|call| match call {
            SinkCall::Add(number, _) => Some(*number),
            _ => None,
        })
        .collect();
    assert_eq!(after_clear, vec![81903]);
    assert_eq!(
        calls.iter().filter(|c| matches!(c, SinkCall::Complete(_))).count(),
        2
    );
}

#[test]
fn corrupt_phone_book_publishes_empty_directory() {
    let (_temp, storage) = storage();
    storage.ensure_root().unwrap();
    std::fs::write(storage.phone_book_file(), r#"{"entries":[{"number":"#).unwrap();

    let snapshot = synchronize(&load_payload(&storage).entries, "81");
    let sink = RecordingDirectorySink::new();
    let report = publish(&snapshot, sink.as_ref(), RequestMode::Full);

    assert_eq!(report, PublishReport::default());
    assert_eq!(sink.calls(), vec![SinkCall::Complete(report)]);
}

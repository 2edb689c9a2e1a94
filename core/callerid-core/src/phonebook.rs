//! Persisted phone-book payload shared with the directory provider.
//!
//! The app writes, the provider reads, possibly in another process at the
//! same moment. Writes go through [`write_atomic`]; reads are defensive:
//! a missing, empty, or corrupt file yields an empty payload rather than an
//! error, so a provider run never fails because of the file.

use fs_err as fs;

use callerid_protocol::{parse_payload, PhoneBookPayload};

use crate::error::{CallerIdError, Result};
use crate::storage::{write_atomic, StorageConfig};

/// Validates a JSON payload from the app and stores it.
pub fn save_payload_json(storage: &StorageConfig, json: &str) -> Result<PhoneBookPayload> {
    let payload = parse_payload(json)?;
    save_payload(storage, &payload)?;
    Ok(payload)
}

pub fn save_payload(storage: &StorageConfig, payload: &PhoneBookPayload) -> Result<()> {
    let content = serde_json::to_vec(payload).map_err(|source| CallerIdError::Json {
        context: "Failed to serialize phone-book payload".to_string(),
        source,
    })?;
    let path = storage.phone_book_file();
    write_atomic(&path, &content)?;
    tracing::info!(
        entries = payload.entries.len(),
        bytes = content.len(),
        path = %path.display(),
        "Phone-book payload saved"
    );
    Ok(())
}

pub fn load_payload(storage: &StorageConfig) -> PhoneBookPayload {
    let path = storage.phone_book_file();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Phone-book payload not found");
            return PhoneBookPayload::default();
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read phone-book payload");
            return PhoneBookPayload::default();
        }
    };

    if content.trim().is_empty() {
        tracing::warn!("Empty phone-book payload, treating as no entries");
        return PhoneBookPayload::default();
    }

    match parse_payload(&content) {
        Ok(payload) => payload,
        Err(info) => {
            tracing::warn!(
                code = %info.code,
                message = %info.message,
                "Failed to decode phone-book payload, treating as no entries"
            );
            PhoneBookPayload::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callerid_protocol::PhoneBookEntry;
    use tempfile::TempDir;

    fn storage() -> (TempDir, StorageConfig) {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().join("group"));
        (temp, storage)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_temp, storage) = storage();
        assert_eq!(load_payload(&storage), PhoneBookPayload::default());
    }

    #[test]
    fn test_save_json_then_load() {
        let (_temp, storage) = storage();
        let saved = save_payload_json(
            &storage,
            r#"{"entries":[{"number":"090-1234-5678","label":"Tanaka"}]}"#,
        )
        .unwrap();

        let loaded = load_payload(&storage);
        assert_eq!(loaded, saved);
        assert_eq!(loaded.entries, vec![PhoneBookEntry::new("090-1234-5678", "Tanaka")]);
    }

    #[test]
    fn test_invalid_json_is_rejected_and_not_written() {
        let (_temp, storage) = storage();
        let err = save_payload_json(&storage, "{\"entries\":").unwrap_err();
        assert!(matches!(err, CallerIdError::InvalidPayload { ref code, .. } if code == "bad_args"));
        assert!(!storage.phone_book_file().exists());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let (_temp, storage) = storage();
        storage.ensure_root().unwrap();
        std::fs::write(storage.phone_book_file(), "{ broken").unwrap();
        assert!(load_payload(&storage).entries.is_empty());
    }

    #[test]
    fn test_blank_file_is_empty() {
        let (_temp, storage) = storage();
        storage.ensure_root().unwrap();
        std::fs::write(storage.phone_book_file(), "  \n").unwrap();
        assert!(load_payload(&storage).entries.is_empty());
    }

    #[test]
    fn test_save_replaces_previous_payload() {
        let (_temp, storage) = storage();
        save_payload(
            &storage,
            &PhoneBookPayload {
                entries: vec![PhoneBookEntry::new("1", "a"), PhoneBookEntry::new("2", "b")],
                updated_at: None,
            },
        )
        .unwrap();
        save_payload(
            &storage,
            &PhoneBookPayload {
                entries: vec![PhoneBookEntry::new("3", "c")],
                updated_at: None,
            },
        )
        .unwrap();

        assert_eq!(load_payload(&storage).entries, vec![PhoneBookEntry::new("3", "c")]);
    }
}

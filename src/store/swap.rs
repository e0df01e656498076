//! Buffer swap for upload
//!
//! The buffer file is the durable marker of an unfinished delivery. While it
//! exists it is re-sent as-is and the active and overflow files are left
//! alone, so a crashed or failed upload is retried with exactly the same
//! records before anything newer goes out.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use super::ChannelStore;
use crate::error::{Result, TelemetryError};

impl ChannelStore {
    /// Snapshot the channel for upload and return the snapshot's content
    ///
    /// Returns `None` when there is nothing to send. Calling this again before
    /// [`confirm_delivered`](Self::confirm_delivered) returns the same content.
    pub fn prepare_for_upload(&self) -> Result<Option<String>> {
        let _io = self.lock_io();
        let paths = &self.paths;

        if let Some(pending) = read_pending(&paths.buffer)? {
            if !pending.trim().is_empty() {
                debug!(channel = %self.channel, "Resending pending buffer");
                return Ok(Some(pending));
            }
            remove_if_exists(&paths.buffer)?;
        }

        let Some(active) = read_if_readable(&paths.active) else {
            return Ok(None);
        };

        let content = match read_if_readable(&paths.overflow) {
            Some(overflow) => {
                let mut merged = overflow;
                merged.push_str(&active);
                replace_contents(&paths.active, &merged)?;
                remove_if_exists(&paths.overflow)?;
                merged
            }
            None => active,
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        std::fs::rename(&paths.active, &paths.buffer)
            .map_err(|e| TelemetryError::storage(&paths.buffer, e))?;
        Ok(Some(content))
    }

    /// Drop the buffer after the collector accepted it
    pub fn confirm_delivered(&self) -> Result<()> {
        let _io = self.lock_io();
        remove_if_exists(&self.paths.buffer)
    }
}

/// Read the buffer left by an earlier swap
///
/// Unlike the other slots an unreadable buffer is an error: swapping over it
/// would destroy the undelivered batch.
fn read_pending(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TelemetryError::storage(path, e)),
    }
}

/// Read a file, treating absent and unreadable files alike
///
/// Invalid UTF-8 (a torn multi-byte write) is replaced rather than rejected so
/// the remaining records still get delivered.
fn read_if_readable(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Channel file unreadable, skipping");
            None
        }
    }
}

/// Atomically replace the active file's contents
fn replace_contents(active: &Path, content: &str) -> Result<()> {
    let staging = active.with_extension("log.tmp");
    std::fs::write(&staging, content).map_err(|e| TelemetryError::storage(&staging, e))?;
    std::fs::rename(&staging, active).map_err(|e| TelemetryError::storage(active, e))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TelemetryError::storage(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Channel, ChannelStore};
    use crate::error::TelemetryError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Append `per_writer` numbered records from each writer thread while
    /// another thread keeps swapping and confirming; returns what was swapped out
    fn swap_while_appending(
        store: Arc<ChannelStore>,
        writers: usize,
        per_writer: usize,
    ) -> Vec<String> {
        let done = Arc::new(AtomicBool::new(false));
        let collector = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut delivered = Vec::new();
                loop {
                    let finished = done.load(Ordering::SeqCst);
                    match store.prepare_for_upload().unwrap() {
                        Some(content) => {
                            delivered.extend(messages(&content));
                            store.confirm_delivered().unwrap();
                        }
                        None if finished => break,
                        None => std::thread::yield_now(),
                    }
                }
                delivered
            })
        };

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..per_writer {
                        store.append(&record(&format!("w{w}-{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        collector.join().unwrap()
    }

    /// Sequence numbers delivered for one writer, in delivery order
    fn sequence(delivered: &[String], writer: usize) -> Vec<usize> {
        let prefix = format!("w{writer}-");
        delivered
            .iter()
            .filter_map(|m| m.strip_prefix(&prefix))
            .map(|i| i.parse().unwrap())
            .collect()
    }

    #[test]
    fn test_nothing_to_send_on_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        assert_eq!(store.prepare_for_upload().unwrap(), None);
        assert!(!store.paths().buffer.exists());
    }

    #[test]
    fn test_swap_moves_active_into_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        store.append(&record("one")).unwrap();
        store.append(&record("two")).unwrap();

        let content = store.prepare_for_upload().unwrap().unwrap();
        assert_eq!(messages(&content), vec!["one", "two"]);
        assert!(!store.paths().active.exists());
        assert_eq!(read_messages(&store.paths().buffer), vec!["one", "two"]);
    }

    #[test]
    fn test_swap_is_idempotent_until_confirmed() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        store.append(&record("one")).unwrap();

        let first = store.prepare_for_upload().unwrap();
        let second = store.prepare_for_upload().unwrap();
        assert_eq!(first, second);

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["courier.log.send".to_string()]);
    }

    #[test]
    fn test_records_written_during_upload_wait_for_next_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        store.append(&record("old")).unwrap();

        let in_flight = store.prepare_for_upload().unwrap().unwrap();
        store.append(&record("new")).unwrap();

        // Undelivered snapshot comes back untouched, new record not interleaved
        let retry = store.prepare_for_upload().unwrap().unwrap();
        assert_eq!(retry, in_flight);
        assert_eq!(messages(&retry), vec!["old"]);

        store.confirm_delivered().unwrap();
        let next = store.prepare_for_upload().unwrap().unwrap();
        assert_eq!(messages(&next), vec!["new"]);
    }

    #[test]
    fn test_overflow_precedes_active_in_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 0);
        store.append(&record("older")).unwrap();
        store.append(&record("newer")).unwrap();
        assert!(store.paths().overflow.exists());

        let content = store.prepare_for_upload().unwrap().unwrap();
        assert_eq!(messages(&content), vec!["older", "newer"]);
        assert!(!store.paths().overflow.exists());
        assert!(!store.paths().active.exists());
    }

    #[test]
    fn test_overflow_alone_is_not_sent_without_active() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        std::fs::write(
            &store.paths().overflow,
            format!("{}\n", record("stranded").to_json_line().unwrap()),
        )
        .unwrap();

        assert_eq!(store.prepare_for_upload().unwrap(), None);
        assert!(store.paths().overflow.exists());

        // Merged back in once the channel is written to again
        store.append(&record("fresh")).unwrap();
        let content = store.prepare_for_upload().unwrap().unwrap();
        assert_eq!(messages(&content), vec!["stranded", "fresh"]);
    }

    #[test]
    fn test_confirm_removes_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Analytics, temp_dir.path(), 10_000);
        store.append(&record("event")).unwrap();
        store.prepare_for_upload().unwrap();
        assert!(store.paths().buffer.exists());

        store.confirm_delivered().unwrap();
        assert!(!store.paths().buffer.exists());
        assert_eq!(store.prepare_for_upload().unwrap(), None);

        // Confirming twice is harmless
        store.confirm_delivered().unwrap();
    }

    #[test]
    fn test_buffer_left_by_previous_process_is_resent_first() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
            store.append(&record("before crash")).unwrap();
            store.prepare_for_upload().unwrap();
        }

        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        store.append(&record("after restart")).unwrap();
        let content = store.prepare_for_upload().unwrap().unwrap();
        assert_eq!(messages(&content), vec!["before crash"]);
    }

    #[test]
    fn test_concurrent_swap_delivers_each_record_once_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(store_with_quota(Channel::Logs, temp_dir.path(), 100_000_000));

        let delivered = swap_while_appending(store, 3, 200);
        assert_eq!(delivered.len(), 600);
        for writer in 0..3 {
            assert_eq!(sequence(&delivered, writer), (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_concurrent_swap_and_rotation_never_duplicate_or_reorder() {
        let temp_dir = TempDir::new().unwrap();
        // Small enough that writers rotate between swaps
        let store = Arc::new(store_with_quota(Channel::Logs, temp_dir.path(), 2_000));

        let delivered = swap_while_appending(store, 3, 200);
        assert!(!delivered.is_empty());
        for writer in 0..3 {
            let seq = sequence(&delivered, writer);
            assert!(
                seq.windows(2).all(|pair| pair[0] < pair[1]),
                "writer {writer} delivered out of order or twice: {seq:?}"
            );
        }
    }

    #[test]
    fn test_unreadable_buffer_is_not_swapped_over() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        // A directory in the buffer slot cannot be read as a file
        std::fs::create_dir(&store.paths().buffer).unwrap();
        store.append(&record("waiting")).unwrap();

        let err = store.prepare_for_upload().unwrap_err();
        assert!(matches!(err, TelemetryError::StorageUnavailable { .. }));
        assert!(store.paths().buffer.is_dir());
        assert_eq!(read_messages(&store.paths().active), vec!["waiting"]);
    }

    #[test]
    fn test_empty_buffer_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with_quota(Channel::Logs, temp_dir.path(), 10_000);
        std::fs::write(&store.paths().buffer, "").unwrap();
        store.append(&record("real")).unwrap();

        let content = store.prepare_for_upload().unwrap().unwrap();
        assert_eq!(messages(&content), vec!["real"]);
    }
}

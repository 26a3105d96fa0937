//! Chunked upload protocol
//!
//! Large binary payloads (audio files) are moved through the command bus,
//! which caps individual message sizes, as a stop-and-wait sequence:
//!
//! ```text
//! uploader                                gateway
//!   | REQUEST_FREE_SPACE ───────────────────▶ |
//!   | ◀─────────────── FREE:<free>:<current>  |
//!   | START:<size>[:<id>] ───────────────────▶|  open destination
//!   | CHUNK:<0>:<total>:<raw> ───────────────▶|  write, then
//!   | ◀──────────────────────────── ACK:0     |  uploader may proceed
//!   |   ...                                   |
//!   | END ───────────────────────────────────▶|  flush + close
//!   | ◀────────────────────── UPLOAD_COMPLETE |
//! ```
//!
//! All transfer state lives in one `UploadReceiver`; a chunk arriving while
//! no session is open is a protocol violation that mutates nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bus::BusHandle;
use crate::constants::DEFAULT_UPLOAD_FILE;
use crate::storage::{Storage, StorageWriter};

/// Topics the receiver publishes on
#[derive(Debug, Clone)]
pub struct TransferTopics {
    /// `FREE:<free>:<current>` replies
    pub response: String,
    /// `ACK:<index>` flow-control signals
    pub ack: String,
    /// `UPLOAD_COMPLETE` / `download_failed:<reason>`
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadStatus {
    Idle,
    Receiving,
}

/// Receiving side of the chunked upload protocol
pub struct UploadReceiver {
    storage: Arc<dyn Storage>,
    topics: TransferTopics,
    timeout: Duration,

    filename: String,
    expected: usize,
    received: usize,
    last_activity: Instant,
    status: UploadStatus,
    writer: Option<Box<dyn StorageWriter>>,
}

impl UploadReceiver {
    pub fn new(storage: Arc<dyn Storage>, topics: TransferTopics, timeout: Duration) -> Self {
        Self {
            storage,
            topics,
            timeout,
            filename: DEFAULT_UPLOAD_FILE.to_string(),
            expected: 0,
            received: 0,
            last_activity: Instant::now(),
            status: UploadStatus::Idle,
            writer: None,
        }
    }

    /// Handle the free-space query topic. Claims only the exact
    /// `REQUEST_FREE_SPACE` literal.
    pub fn handle_request(&self, bus: &BusHandle, payload: &[u8]) -> bool {
        if payload != b"REQUEST_FREE_SPACE" {
            return false;
        }

        let free = self.storage.free_bytes();
        let current = self.storage.file_size(&self.filename);
        bus.publish(&self.topics.response, format!("FREE:{}:{}", free, current));

        tracing::info!(
            "Free space query: {} bytes free, current file {} bytes",
            free,
            current
        );
        true
    }

    /// Handle one message on the chunk topic. Claims `START:`, `CHUNK:` and
    /// `END`; anything else falls through to later handlers.
    pub fn handle_chunk(&mut self, bus: &BusHandle, payload: &[u8]) -> bool {
        if let Some(rest) = payload.strip_prefix(b"START:") {
            self.on_start(bus, rest);
            return true;
        }

        if payload.starts_with(b"CHUNK:") {
            self.on_chunk(bus, payload);
            return true;
        }

        if payload == b"END" {
            self.on_end(bus);
            return true;
        }

        false
    }

    fn on_start(&mut self, bus: &BusHandle, rest: &[u8]) {
        // A new START supersedes any partial transfer
        if self.writer.take().is_some() {
            tracing::warn!(
                "START superseding unfinished upload of '{}' ({}/{} bytes)",
                self.filename,
                self.received,
                self.expected
            );
        }
        self.status = UploadStatus::Idle;

        let text = String::from_utf8_lossy(rest);
        let mut fields = text.split(':');

        let Some(expected) = fields.next().and_then(|s| s.trim().parse::<usize>().ok()) else {
            tracing::warn!("Malformed START header: '{}'", text);
            return;
        };

        self.filename = match fields.next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => DEFAULT_UPLOAD_FILE.to_string(),
        };
        self.expected = expected;
        self.received = 0;
        self.last_activity = Instant::now();

        tracing::info!(
            "Upload started: '{}', expecting {} bytes",
            self.filename,
            self.expected
        );

        self.storage.remove(&self.filename);

        match self.storage.open_write(&self.filename) {
            Ok(writer) => {
                self.writer = Some(writer);
                self.status = UploadStatus::Receiving;
            }
            Err(e) => {
                tracing::warn!("Could not open '{}' for upload: {}", self.filename, e);
                bus.publish(&self.topics.status, format!("download_failed:{}", e));
            }
        }
    }

    fn on_chunk(&mut self, bus: &BusHandle, payload: &[u8]) {
        if self.status != UploadStatus::Receiving {
            tracing::warn!("Received chunk but no upload is open; ignoring");
            return;
        }

        // CHUNK:<index>:<total>:<raw bytes> -- scan for the two header
        // colons after the prefix; everything past the second is payload
        let mut first_colon = None;
        let mut second_colon = None;
        for (i, &b) in payload.iter().enumerate().skip(6) {
            if b == b':' {
                if first_colon.is_none() {
                    first_colon = Some(i);
                } else {
                    second_colon = Some(i);
                    break;
                }
            }
        }

        let (Some(first), Some(second)) = (first_colon, second_colon) else {
            tracing::warn!("Malformed chunk header; ignoring");
            return;
        };

        let index: i64 = String::from_utf8_lossy(&payload[6..first])
            .parse()
            .unwrap_or(0);
        let raw = &payload[second + 1..];

        if raw.is_empty() {
            return;
        }

        if self.received + raw.len() > self.expected {
            tracing::warn!(
                "Chunk {} would exceed declared size ({} + {} > {}); rejecting",
                index,
                self.received,
                raw.len(),
                self.expected
            );
            return;
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        match writer.write_chunk(raw) {
            Ok(()) => {
                self.received += raw.len();
                self.last_activity = Instant::now();

                tracing::debug!(
                    "Chunk {}: {} bytes | total {}/{} ({:.1}%)",
                    index,
                    raw.len(),
                    self.received,
                    self.expected,
                    (self.received as f64 * 100.0) / self.expected.max(1) as f64
                );

                bus.publish(&self.topics.ack, format!("ACK:{}", index));
            }
            Err(e) => {
                tracing::warn!("Chunk {} write failed: {}", index, e);
                self.writer = None;
                self.status = UploadStatus::Idle;
                bus.publish(&self.topics.status, format!("download_failed:{}", e));
            }
        }
    }

    fn on_end(&mut self, bus: &BusHandle) {
        if self.status != UploadStatus::Receiving {
            tracing::warn!("Received END but no upload is open; ignoring");
            return;
        }

        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                tracing::warn!("Finalize of '{}' failed: {}", self.filename, e);
                self.status = UploadStatus::Idle;
                bus.publish(&self.topics.status, format!("download_failed:{}", e));
                return;
            }
        }
        self.status = UploadStatus::Idle;

        if self.received != self.expected {
            tracing::warn!(
                "Upload size mismatch: received {} bytes, expected {}",
                self.received,
                self.expected
            );
        }
        tracing::info!(
            "Upload complete: '{}', {} bytes (expected {})",
            self.filename,
            self.received,
            self.expected
        );

        bus.publish(&self.topics.status, "UPLOAD_COMPLETE");
    }

    /// Abandon the session when no chunk has arrived for the configured
    /// timeout. Called periodically by the watchdog task.
    pub fn check_timeout(&mut self, now: Instant) {
        if self.status == UploadStatus::Receiving
            && now.duration_since(self.last_activity) > self.timeout
        {
            tracing::warn!(
                "Upload of '{}' timed out after {}/{} bytes; abandoning",
                self.filename,
                self.received,
                self.expected
            );
            self.writer = None;
            self.status = UploadStatus::Idle;
        }
    }

    /// True while a transfer is open (used to pause sensor publishing)
    pub fn is_receiving(&self) -> bool {
        self.status == UploadStatus::Receiving
    }

    pub fn received_bytes(&self) -> usize {
        self.received
    }

    pub fn expected_bytes(&self) -> usize {
        self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirStorage;
    use std::io::Read;

    fn temp_storage() -> (Arc<DirStorage>, std::path::PathBuf) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);

        let dir = std::env::temp_dir().join(format!(
            "smartalarm-transfer-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let storage = Arc::new(DirStorage::new(dir.clone(), 1024 * 1024, 32 * 1024).unwrap());
        (storage, dir)
    }

    fn receiver_with_bus() -> (
        UploadReceiver,
        BusHandle,
        tokio::sync::mpsc::UnboundedReceiver<crate::bus::client::Outbound>,
        std::path::PathBuf,
    ) {
        let (storage, dir) = temp_storage();
        let topics = TransferTopics {
            response: "esp32/audio_response".to_string(),
            ack: "esp32/audio_ack".to_string(),
            status: "esp32/audio_status".to_string(),
        };
        let receiver = UploadReceiver::new(storage, topics, Duration::from_secs(30));
        let (bus, rx) = BusHandle::test_pair();
        (receiver, bus, rx, dir)
    }

    fn drain(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<crate::bus::client::Outbound>,
    ) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push((msg.topic, String::from_utf8_lossy(&msg.payload).to_string()));
        }
        out
    }

    #[test]
    fn test_full_upload_end_to_end() {
        let (mut receiver, bus, mut rx, dir) = receiver_with_bus();

        assert!(receiver.handle_chunk(&bus, b"START:1024"));
        assert!(receiver.is_receiving());

        // Ten chunks of 102 bytes, then a final 4 to reach exactly 1024
        for i in 0..10 {
            let mut msg = format!("CHUNK:{}:10:", i).into_bytes();
            let fill = if i == 9 { 106 } else { 102 };
            msg.extend(std::iter::repeat(i as u8).take(fill));
            assert!(receiver.handle_chunk(&bus, &msg));
        }
        assert!(receiver.handle_chunk(&bus, b"END"));

        assert_eq!(receiver.received_bytes(), 1024);
        assert_eq!(receiver.expected_bytes(), 1024);
        assert!(!receiver.is_receiving());

        let messages = drain(&mut rx);
        let acks: Vec<&str> = messages
            .iter()
            .filter(|(topic, _)| topic == "esp32/audio_ack")
            .map(|(_, payload)| payload.as_str())
            .collect();
        assert_eq!(
            acks,
            (0..10).map(|i| format!("ACK:{}", i)).collect::<Vec<_>>()
        );
        assert_eq!(
            messages.last().map(|(_, p)| p.as_str()),
            Some("UPLOAD_COMPLETE")
        );

        let mut contents = Vec::new();
        std::fs::File::open(dir.join("sound.mp3"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents.len(), 1024);
    }

    #[test]
    fn test_chunk_before_start_is_rejected() {
        let (mut receiver, bus, mut rx, dir) = receiver_with_bus();

        // Claimed (it is a chunk message) but mutates nothing
        assert!(receiver.handle_chunk(&bus, b"CHUNK:0:10:abcdef"));
        assert!(!receiver.is_receiving());
        assert_eq!(receiver.received_bytes(), 0);
        assert!(drain(&mut rx).is_empty());
        assert!(!dir.join("sound.mp3").exists());
    }

    #[test]
    fn test_double_end_is_noop() {
        let (mut receiver, bus, mut rx, _dir) = receiver_with_bus();

        receiver.handle_chunk(&bus, b"START:3");
        receiver.handle_chunk(&bus, b"CHUNK:0:1:abc");
        receiver.handle_chunk(&bus, b"END");
        drain(&mut rx);

        receiver.handle_chunk(&bus, b"END");
        assert!(drain(&mut rx).is_empty());
        assert_eq!(receiver.received_bytes(), 3);
    }

    #[test]
    fn test_malformed_chunk_header_ignored() {
        let (mut receiver, bus, mut rx, _dir) = receiver_with_bus();

        receiver.handle_chunk(&bus, b"START:100");
        drain(&mut rx);

        // Only one colon after the prefix
        assert!(receiver.handle_chunk(&bus, b"CHUNK:5:payloadwithoutsecondcolon"));
        assert_eq!(receiver.received_bytes(), 0);
        assert!(drain(&mut rx).is_empty());
        assert!(receiver.is_receiving());
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let (mut receiver, bus, mut rx, _dir) = receiver_with_bus();

        receiver.handle_chunk(&bus, b"START:4");
        drain(&mut rx);

        receiver.handle_chunk(&bus, b"CHUNK:0:1:toolarge");
        assert_eq!(receiver.received_bytes(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_start_with_id_selects_destination() {
        let (mut receiver, bus, mut rx, dir) = receiver_with_bus();

        receiver.handle_chunk(&bus, b"START:2:alarm.mp3");
        receiver.handle_chunk(&bus, b"CHUNK:0:1:ok");
        receiver.handle_chunk(&bus, b"END");
        drain(&mut rx);

        assert!(dir.join("alarm.mp3").exists());
        assert_eq!(std::fs::metadata(dir.join("alarm.mp3")).unwrap().len(), 2);
    }

    #[test]
    fn test_new_start_supersedes_partial_upload() {
        let (mut receiver, bus, mut rx, _dir) = receiver_with_bus();

        receiver.handle_chunk(&bus, b"START:100");
        receiver.handle_chunk(&bus, b"CHUNK:0:2:part");
        assert_eq!(receiver.received_bytes(), 4);

        receiver.handle_chunk(&bus, b"START:8");
        assert_eq!(receiver.received_bytes(), 0);
        assert_eq!(receiver.expected_bytes(), 8);
        assert!(receiver.is_receiving());
        drain(&mut rx);
    }

    #[test]
    fn test_free_space_query() {
        let (receiver, bus, mut rx, _dir) = receiver_with_bus();

        assert!(!receiver.handle_request(&bus, b"something_else"));
        assert!(receiver.handle_request(&bus, b"REQUEST_FREE_SPACE"));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "esp32/audio_response");
        assert_eq!(messages[0].1, format!("FREE:{}:0", 1024 * 1024));
    }

    #[test]
    fn test_inactivity_timeout_abandons_session() {
        let (mut receiver, bus, mut rx, _dir) = receiver_with_bus();

        receiver.handle_chunk(&bus, b"START:100");
        assert!(receiver.is_receiving());

        // Not yet stale
        receiver.check_timeout(Instant::now());
        assert!(receiver.is_receiving());

        receiver.check_timeout(Instant::now() + Duration::from_secs(31));
        assert!(!receiver.is_receiving());

        // A chunk after abandonment is a protocol violation again
        receiver.handle_chunk(&bus, b"CHUNK:1:2:zz");
        assert_eq!(receiver.received_bytes(), 0);
        drain(&mut rx);
    }

    #[test]
    fn test_malformed_start_size_ignored() {
        let (mut receiver, bus, mut rx, _dir) = receiver_with_bus();

        assert!(receiver.handle_chunk(&bus, b"START:notanumber"));
        assert!(!receiver.is_receiving());
        assert!(drain(&mut rx).is_empty());
    }
}

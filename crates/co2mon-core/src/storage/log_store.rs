use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use log::{debug, error, info, warn};

extern crate alloc;
use alloc::vec::Vec;

use super::{LogBackend, Reading, StoreError};

/// Backend plus what the store knows about it, guarded together.
struct Guarded<B> {
    backend: B,
    /// Lines currently in the log, `None` after a failed write left it unknown
    line_count: Option<usize>,
}

/// Append-only reading log capped at `max_entries` records
///
/// Every public operation takes the same lock for its whole backend
/// interaction, so:
/// - two appends never interleave their writes,
/// - a prune (read, truncate, write back) is never observed half done,
/// - a reader always sees the log as left by some prefix of completed appends.
///
/// ## Usage
///
/// ```rust,ignore
/// static STORE: StaticCell<LogStore<CriticalSectionRawMutex, MemoryBackend>> = StaticCell::new();
/// let store = STORE.init(LogStore::new(MemoryBackend::new(), 100));
///
/// store.init().await?;
/// store.append(Reading::new(now, ppm)).await?;
/// let latest = store.read_recent(10).await?;
/// ```
pub struct LogStore<M: RawMutex, B: LogBackend> {
    guarded: Mutex<M, Guarded<B>>,
    max_entries: usize,
}

impl<M: RawMutex, B: LogBackend> LogStore<M, B> {
    pub const fn new(backend: B, max_entries: usize) -> Self {
        Self {
            guarded: Mutex::new(Guarded {
                backend,
                line_count: None,
            }),
            max_entries,
        }
    }

    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Prepare the log for use; safe to call on every boot.
    ///
    /// Creates the log if it is missing, drops a line torn by a power loss
    /// mid-append, and prunes if the log is over the cap (for example
    /// after `max_entries` was lowered). Returns the number of well-formed
    /// records.
    pub async fn init(&self) -> Result<usize, StoreError<B::Error>> {
        let mut guarded = self.guarded.lock().await;
        let backend = &mut guarded.backend;

        backend.ensure_exists().map_err(StoreError::Backend)?;

        let mut buf = Vec::new();
        backend.read_all(&mut buf).map_err(StoreError::Backend)?;

        if buf.last().is_some_and(|last| *last != b'\n') {
            // A torn tail may still parse, so it is never kept
            let complete = buf
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |last_newline| last_newline + 1);
            warn!(
                "Log ends in a partial record; dropping {} bytes",
                buf.len() - complete
            );
            buf.truncate(complete);
            backend.replace(&buf).map_err(StoreError::Backend)?;
        }

        let line_count = count_lines(&buf);
        guarded.line_count = Some(line_count);

        let records = if line_count > self.max_entries {
            self.prune_locked(&mut guarded)?
        } else {
            decode_records(&buf).len()
        };

        info!(
            "Log ready: {} records ({} lines, cap {})",
            records, line_count, self.max_entries
        );
        Ok(records)
    }

    /// Durably append one reading, then prune if the log is over the cap.
    ///
    /// An error means the reading was not stored. A failed prune after a
    /// successful write is logged and retried on the next append; the reading
    /// itself is kept.
    pub async fn append(&self, reading: Reading) -> Result<(), StoreError<B::Error>> {
        let mut guarded = self.guarded.lock().await;
        let line = reading.to_line();

        if let Err(e) = guarded.backend.append(line.as_bytes()) {
            guarded.line_count = None;
            return Err(StoreError::Backend(e));
        }

        let line_count = match guarded.line_count {
            Some(count) => count + 1,
            None => {
                let mut buf = Vec::new();
                if let Err(e) = guarded.backend.read_all(&mut buf) {
                    // The reading is stored; the count is recovered next time
                    warn!("Appended {} but could not recount log: {:?}", reading, e);
                    return Ok(());
                }
                count_lines(&buf)
            }
        };
        guarded.line_count = Some(line_count);
        debug!("Appended {} ({} lines)", reading, line_count);

        if line_count > self.max_entries {
            if let Err(e) = self.prune_locked(&mut guarded) {
                error!("Failed to prune log after append: {:?}", e);
                guarded.line_count = None;
            }
        }

        Ok(())
    }

    /// The last `min(n, len)` readings, oldest first.
    ///
    /// Malformed records are skipped. `n <= 0` returns nothing without
    /// touching the backend.
    pub async fn read_recent(&self, n: i32) -> Result<Vec<Reading>, StoreError<B::Error>> {
        if n <= 0 {
            return Ok(Vec::new());
        }

        let mut buf = Vec::new();
        {
            let mut guarded = self.guarded.lock().await;
            guarded
                .backend
                .read_all(&mut buf)
                .map_err(StoreError::Backend)?;
        }

        let mut records = decode_records(&buf);
        let excess = records.len().saturating_sub(n as usize);
        records.drain(..excess);
        Ok(records)
    }

    /// Number of well-formed records in the log.
    pub async fn len(&self) -> Result<usize, StoreError<B::Error>> {
        let mut buf = Vec::new();
        {
            let mut guarded = self.guarded.lock().await;
            guarded
                .backend
                .read_all(&mut buf)
                .map_err(StoreError::Backend)?;
        }
        Ok(decode_records(&buf).len())
    }

    /// Rewrite the log keeping only the newest `max_entries` well-formed
    /// records. Must be called with the lock held.
    fn prune_locked(&self, guarded: &mut Guarded<B>) -> Result<usize, StoreError<B::Error>> {
        let mut buf = Vec::new();
        guarded
            .backend
            .read_all(&mut buf)
            .map_err(StoreError::Backend)?;

        let records = decode_records(&buf);
        let keep_from = records.len().saturating_sub(self.max_entries);
        let kept = &records[keep_from..];

        let mut out = Vec::with_capacity(buf.len());
        for reading in kept {
            out.extend_from_slice(reading.to_line().as_bytes());
        }

        guarded.backend.replace(&out).map_err(StoreError::Backend)?;
        guarded.line_count = Some(kept.len());

        debug!(
            "Pruned log: {} lines -> {} records",
            count_lines(&buf),
            kept.len()
        );
        Ok(kept.len())
    }
}

fn count_lines(buf: &[u8]) -> usize {
    buf.split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .count()
}

/// Parse every line of the log, skipping the ones that do not parse.
pub fn decode_records(buf: &[u8]) -> Vec<Reading> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for line in buf.split(|b| *b == b'\n').filter(|line| !line.is_empty()) {
        let parsed = core::str::from_utf8(line)
            .ok()
            .and_then(|text| text.parse::<Reading>().ok());
        match parsed {
            Some(reading) => records.push(reading),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed log records", skipped);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Concentration, MemoryBackend};
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn reading(timestamp: u64, centi_ppm: i32) -> Reading {
        Reading::new(timestamp, Concentration::from_centi_ppm(centi_ppm))
    }

    #[test]
    fn test_init_creates_missing_log() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 5);
        assert_eq!(block_on(store.init()).unwrap(), 0);
        assert_eq!(block_on(store.init()).unwrap(), 0);
        assert!(block_on(store.read_recent(10)).unwrap().is_empty());
    }

    #[test]
    fn test_init_keeps_existing_records() {
        let backend = MemoryBackend::with_contents(b"1,400.0\n2,401.5\n");
        let store: LogStore<NoopRawMutex, _> = LogStore::new(backend, 5);
        assert_eq!(block_on(store.init()).unwrap(), 2);
        assert_eq!(
            block_on(store.read_recent(5)).unwrap(),
            [reading(1, 40_000), reading(2, 40_150)]
        );
    }

    #[test]
    fn test_init_drops_torn_line() {
        // "1700000002,4" would parse as 4.0 ppm if it were kept
        let backend = MemoryBackend::with_contents(b"1700000000,412.5\n1700000002,4");
        let store: LogStore<NoopRawMutex, _> = LogStore::new(backend, 5);
        assert_eq!(block_on(store.init()).unwrap(), 1);
        assert_eq!(
            block_on(store.read_recent(10)).unwrap(),
            [reading(1_700_000_000, 41_250)]
        );

        block_on(store.append(reading(1_700_000_004, 41_000))).unwrap();
        assert_eq!(
            block_on(store.read_recent(10)).unwrap(),
            [reading(1_700_000_000, 41_250), reading(1_700_000_004, 41_000)]
        );
    }

    #[test]
    fn test_init_drops_torn_only_line() {
        let backend = MemoryBackend::with_contents(b"1700000000,41");
        let store: LogStore<NoopRawMutex, _> = LogStore::new(backend, 5);
        assert_eq!(block_on(store.init()).unwrap(), 0);
        assert!(block_on(store.read_recent(10)).unwrap().is_empty());
        assert_eq!(block_on(store.len()).unwrap(), 0);
    }

    #[test]
    fn test_init_prunes_oversized_log() {
        let backend = MemoryBackend::with_contents(b"1,1.0\n2,2.0\n3,3.0\n4,4.0\n");
        let store: LogStore<NoopRawMutex, _> = LogStore::new(backend, 2);
        assert_eq!(block_on(store.init()).unwrap(), 2);
        assert_eq!(
            block_on(store.read_recent(10)).unwrap(),
            [reading(3, 300), reading(4, 400)]
        );
    }

    #[test]
    fn test_append_then_read_latest() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 5);
        block_on(store.init()).unwrap();
        block_on(store.append(reading(1_700_000_000, 41_250))).unwrap();
        assert_eq!(
            block_on(store.read_recent(1)).unwrap(),
            [reading(1_700_000_000, 41_250)]
        );
    }

    #[test]
    fn test_non_positive_count_returns_nothing() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 5);
        block_on(store.init()).unwrap();
        block_on(store.append(reading(1, 100))).unwrap();
        assert!(block_on(store.read_recent(0)).unwrap().is_empty());
        assert!(block_on(store.read_recent(-3)).unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_newest_in_order() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 3);
        block_on(store.init()).unwrap();
        for ts in 1..=7 {
            block_on(store.append(reading(ts, ts as i32 * 100))).unwrap();
        }

        assert_eq!(block_on(store.len()).unwrap(), 3);
        assert_eq!(
            block_on(store.read_recent(100)).unwrap(),
            [reading(5, 500), reading(6, 600), reading(7, 700)]
        );
    }

    #[test]
    fn test_prune_drops_malformed_lines() {
        let backend = MemoryBackend::with_contents(b"1,1.0\ngarbage\n2,2.0\n");
        let store: LogStore<NoopRawMutex, _> = LogStore::new(backend, 3);
        block_on(store.init()).unwrap();

        // Third valid record pushes the line count to 4 and triggers a rewrite
        block_on(store.append(reading(3, 300))).unwrap();
        assert_eq!(
            block_on(store.read_recent(10)).unwrap(),
            [reading(1, 100), reading(2, 200), reading(3, 300)]
        );
    }

    #[test]
    fn test_read_skips_malformed_records() {
        let backend =
            MemoryBackend::with_contents(b"1,1.0\n2\n3,abc\n\xff\xfe,1.0\n4,4.0,9\n5,5.0\n");
        let store: LogStore<NoopRawMutex, _> = LogStore::new(backend, 10);
        assert_eq!(
            block_on(store.read_recent(10)).unwrap(),
            [reading(1, 100), reading(5, 500)]
        );
    }

    #[test]
    fn test_read_before_init_reports_backend_error() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 10);
        assert!(matches!(
            block_on(store.read_recent(1)),
            Err(StoreError::Backend(_))
        ));
    }
}

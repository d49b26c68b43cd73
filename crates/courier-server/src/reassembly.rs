//! Server-wide reassembly table for chunked UDP file transfers.
//!
//! Transfers are keyed by `(sender username, file name)` so uploads from
//! different senders can never interleave. Two concurrent transfers from the
//! same sender under the same file name still share an entry; that is a
//! documented limitation of the addressing scheme.
//!
//! One lock guards the whole map, which is the mutual exclusion spec for
//! concurrent chunk arrivals. Entries left behind by abandoned transfers are
//! dropped by a background sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_types::ProtocolError;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub sender: String,
    pub file_name: String,
}

struct Transfer {
    chunk_total: u32,
    chunks: HashMap<u32, Vec<u8>>,
    last_activity: Instant,
}

pub enum ChunkOutcome {
    /// Chunk stored; more are outstanding.
    Incomplete,
    /// Final chunk arrived; the concatenated file bytes, entry cleared.
    Complete(Vec<u8>),
}

#[derive(Clone, Default)]
pub struct ReassemblyTable {
    inner: Arc<Mutex<HashMap<TransferKey, Transfer>>>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one chunk. Completion requires `chunk_total` distinct chunk
    /// numbers, each of `1..=chunk_total` resolvable; a duplicate chunk can
    /// therefore never complete a transfer early.
    pub async fn insert(
        &self,
        key: TransferKey,
        chunk_no: u32,
        chunk_total: u32,
        bytes: Vec<u8>,
    ) -> Result<ChunkOutcome, ProtocolError> {
        if chunk_no < 1 || chunk_no > chunk_total {
            return Err(ProtocolError::InvalidChunkRange);
        }

        let mut table = self.inner.lock().await;
        let mut transfer = table.remove(&key).unwrap_or_else(|| Transfer {
            chunk_total,
            chunks: HashMap::new(),
            last_activity: Instant::now(),
        });

        // A chunk announcing a different total belongs to a different
        // transfer; reject it rather than corrupt the entry.
        if transfer.chunk_total != chunk_total {
            table.insert(key, transfer);
            return Err(ProtocolError::InvalidChunkRange);
        }

        transfer.chunks.insert(chunk_no, bytes);
        transfer.last_activity = Instant::now();

        if (transfer.chunks.len() as u32) < transfer.chunk_total {
            table.insert(key, transfer);
            return Ok(ChunkOutcome::Incomplete);
        }

        // All slots claimed: concatenate in order. The entry stays removed
        // whether assembly succeeds or fails.
        let mut assembled = Vec::new();
        for i in 1..=transfer.chunk_total {
            match transfer.chunks.remove(&i) {
                Some(mut chunk) => assembled.append(&mut chunk),
                None => return Err(ProtocolError::MissingChunk(i)),
            }
        }
        Ok(ChunkOutcome::Complete(assembled))
    }

    /// Drop entries idle longer than `max_idle`. Returns how many were removed.
    pub async fn sweep(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut table = self.inner.lock().await;
        let before = table.len();
        table.retain(|key, transfer| {
            let alive = now.duration_since(transfer.last_activity) < max_idle;
            if !alive {
                debug!(
                    "reassembly: dropping stale transfer {} from {}",
                    key.file_name, key.sender
                );
            }
            alive
        });
        before - table.len()
    }

    /// Background task that sweeps stale transfers to bound memory held by
    /// abandoned uploads.
    pub fn spawn_sweeper(&self, max_idle: Duration) {
        let table = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(max_idle / 2);
            loop {
                interval.tick().await;
                let removed = table.sweep(max_idle).await;
                if removed > 0 {
                    info!("reassembly: dropped {removed} stale transfer(s)");
                }
            }
        });
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sender: &str, file: &str) -> TransferKey {
        TransferKey {
            sender: sender.into(),
            file_name: file.into(),
        }
    }

    #[tokio::test]
    async fn chunks_reassemble_in_order_regardless_of_arrival() {
        let table = ReassemblyTable::new();
        let k = key("alice", "a.bin");

        assert!(matches!(
            table.insert(k.clone(), 2, 3, b"BBB".to_vec()).await,
            Ok(ChunkOutcome::Incomplete)
        ));
        assert!(matches!(
            table.insert(k.clone(), 1, 3, b"AAA".to_vec()).await,
            Ok(ChunkOutcome::Incomplete)
        ));
        match table.insert(k.clone(), 3, 3, b"CCC".to_vec()).await {
            Ok(ChunkOutcome::Complete(bytes)) => assert_eq!(bytes, b"AAABBBCCC"),
            _ => panic!("expected completion"),
        }

        // Entry cleared on completion
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn duplicate_chunk_never_completes_early() {
        let table = ReassemblyTable::new();
        let k = key("alice", "a.bin");

        table.insert(k.clone(), 1, 3, b"A".to_vec()).await.unwrap();
        table.insert(k.clone(), 3, 3, b"C".to_vec()).await.unwrap();
        // Re-sending chunk 3 must not count as a third distinct chunk.
        assert!(matches!(
            table.insert(k.clone(), 3, 3, b"C".to_vec()).await,
            Ok(ChunkOutcome::Incomplete)
        ));

        match table.insert(k, 2, 3, b"B".to_vec()).await {
            Ok(ChunkOutcome::Complete(bytes)) => assert_eq!(bytes, b"ABC"),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn transfers_are_isolated_by_sender_and_file_name() {
        let table = ReassemblyTable::new();

        table
            .insert(key("alice", "same.bin"), 1, 2, b"a1".to_vec())
            .await
            .unwrap();
        table
            .insert(key("bob", "same.bin"), 1, 2, b"b1".to_vec())
            .await
            .unwrap();
        table
            .insert(key("alice", "other.bin"), 1, 2, b"o1".to_vec())
            .await
            .unwrap();

        match table
            .insert(key("bob", "same.bin"), 2, 2, b"b2".to_vec())
            .await
        {
            Ok(ChunkOutcome::Complete(bytes)) => assert_eq!(bytes, b"b1b2"),
            _ => panic!("expected completion"),
        }

        // Alice's two transfers are still pending and untouched.
        assert_eq!(table.len().await, 2);
    }

    #[tokio::test]
    async fn chunk_range_is_validated() {
        let table = ReassemblyTable::new();
        let k = key("alice", "a.bin");

        assert_eq!(
            table.insert(k.clone(), 0, 3, b"x".to_vec()).await.err(),
            Some(ProtocolError::InvalidChunkRange)
        );
        assert_eq!(
            table.insert(k.clone(), 4, 3, b"x".to_vec()).await.err(),
            Some(ProtocolError::InvalidChunkRange)
        );
        assert_eq!(
            table.insert(k.clone(), 1, 0, b"x".to_vec()).await.err(),
            Some(ProtocolError::InvalidChunkRange)
        );

        // Mismatched total against an existing entry
        table.insert(k.clone(), 1, 3, b"x".to_vec()).await.unwrap();
        assert_eq!(
            table.insert(k, 2, 5, b"y".to_vec()).await.err(),
            Some(ProtocolError::InvalidChunkRange)
        );
    }

    #[tokio::test]
    async fn sweep_drops_only_stale_entries() {
        let table = ReassemblyTable::new();
        table
            .insert(key("alice", "a.bin"), 1, 2, b"x".to_vec())
            .await
            .unwrap();

        assert_eq!(table.sweep(Duration::from_secs(60)).await, 0);
        assert_eq!(table.len().await, 1);

        assert_eq!(table.sweep(Duration::ZERO).await, 1);
        assert_eq!(table.len().await, 0);
    }
}

//! Durability contract: write-ahead log records and point-in-time
//! snapshots.
//!
//! Only the contract lives here; the byte format and the replication of
//! the log are pluggable. Records are handed to a [`wal::WalSink`] as typed
//! values, and recovery is replay-from-snapshot followed by applying WAL
//! records newer than the snapshot's upper timestamp.

pub mod snapshot;
pub mod wal;

pub use snapshot::{recover, ShardSnapshot, SnapshotEdge, SnapshotVertex};
pub use wal::{InMemoryWal, WalOp, WalRecord, WalSink};

//! Record sink, persisted sync state and the page fetcher for the bill tracker.

mod http;
mod sink;
mod state;

use sha2::{Digest, Sha256};

pub use http::{
    is_transient_status, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, RetryPolicy,
};
pub use sink::{backup_dir, restore_dir, BackupReport, InsertOutcome, RecordSink, SinkError};
pub use state::{StateStore, DESTINATION_SNAPSHOT_FILE, SYNC_STATE_FILE};

pub const CRATE_NAME: &str = "billtrack-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

//! Append-only directory of bill records, one JSON file per title.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use billtrack_core::BillRecord;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::sha256_hex;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing record {title}: {source}")]
    Encode {
        title: String,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(PathBuf),
    AlreadyPresent,
}

impl InsertOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Durable store of finalized bill records.
///
/// The title index is built once when the sink is opened and kept current by
/// [`RecordSink::insert_if_absent`]. Files are named by the SHA-256 of the title, and the final
/// file is published with a hard link so that two writers racing on the same title cannot both
/// succeed.
#[derive(Debug)]
pub struct RecordSink {
    root: PathBuf,
    titles: Mutex<HashMap<String, PathBuf>>,
}

impl RecordSink {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(io_err(&root))?;

        let mut titles = HashMap::new();
        for (path, record) in read_records(&root).await? {
            titles.entry(record.title).or_insert(path);
        }

        Ok(Self {
            root,
            titles: Mutex::new(titles),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, title: &str) -> PathBuf {
        self.root.join(format!("{}.json", sha256_hex(title.as_bytes())))
    }

    pub async fn contains(&self, title: &str) -> bool {
        self.titles.lock().await.contains_key(title)
    }

    pub async fn len(&self) -> usize {
        self.titles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Writes `record` unless a record with the same title already exists.
    pub async fn insert_if_absent(&self, record: &BillRecord) -> Result<InsertOutcome, SinkError> {
        let mut titles = self.titles.lock().await;
        if titles.contains_key(&record.title) {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let bytes = serde_json::to_vec_pretty(record).map_err(|source| SinkError::Encode {
            title: record.title.clone(),
            source,
        })?;
        let dest = self.record_path(&record.title);
        let temp_path = self.root.join(format!(".{}.tmp", Uuid::new_v4()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;
        file.write_all(&bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        drop(file);

        let linked = fs::hard_link(&temp_path, &dest).await;
        let outcome = match linked {
            Ok(()) => Ok(InsertOutcome::Inserted(dest.clone())),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                match read_record(&dest).await {
                    Some(existing) if existing.title == record.title => {
                        Ok(InsertOutcome::AlreadyPresent)
                    }
                    _ => {
                        warn!(path = %dest.display(), "replacing unreadable record file");
                        fs::rename(&temp_path, &dest)
                            .await
                            .map(|()| InsertOutcome::Inserted(dest.clone()))
                            .map_err(io_err(&dest))
                    }
                }
            }
            Err(err) => Err(io_err(&dest)(err)),
        };
        let _ = fs::remove_file(&temp_path).await;

        let outcome = outcome?;
        titles.insert(record.title.clone(), dest);
        Ok(outcome)
    }

    /// All records currently in the sink, ordered by title.
    pub async fn records(&self) -> Result<Vec<BillRecord>, SinkError> {
        let mut records: Vec<BillRecord> = read_records(&self.root)
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        records.sort_by(|a, b| a.title.cmp(&b.title));
        records.dedup_by(|a, b| a.title == b.title);
        Ok(records)
    }
}

async fn read_records(root: &Path) -> Result<Vec<(PathBuf, BillRecord)>, SinkError> {
    let mut out = Vec::new();
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(io_err(root)(err)),
    };

    while let Some(entry) = entries.next_entry().await.map_err(io_err(root))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(record) = read_record(&path).await {
            out.push((path, record));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

async fn read_record(path: &Path) -> Option<BillRecord> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "skipping unreadable record file");
            }
            return None;
        }
    };
    match serde_json::from_str::<BillRecord>(&text) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping unparseable record file");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackupReport {
    pub copied: usize,
    pub total: usize,
}

/// Copies record files into `backup_root`, skipping files whose backup copy is at least as new.
pub async fn backup_dir(sink_root: &Path, backup_root: &Path) -> Result<BackupReport, SinkError> {
    copy_dir_files(sink_root, backup_root, true).await
}

/// Copies every backed-up file back into the sink directory.
pub async fn restore_dir(backup_root: &Path, sink_root: &Path) -> Result<BackupReport, SinkError> {
    copy_dir_files(backup_root, sink_root, false).await
}

async fn copy_dir_files(
    from: &Path,
    to: &Path,
    only_newer: bool,
) -> Result<BackupReport, SinkError> {
    let mut report = BackupReport::default();
    let mut entries = match fs::read_dir(from).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(report),
        Err(err) => return Err(io_err(from)(err)),
    };
    fs::create_dir_all(to).await.map_err(io_err(to))?;

    while let Some(entry) = entries.next_entry().await.map_err(io_err(from))? {
        let source = entry.path();
        let file_type = entry.file_type().await.map_err(io_err(&source))?;
        if !file_type.is_file() {
            continue;
        }
        report.total += 1;
        let dest = to.join(entry.file_name());

        if only_newer && !is_newer(&source, &dest).await? {
            continue;
        }
        fs::copy(&source, &dest).await.map_err(io_err(&dest))?;
        report.copied += 1;
    }
    Ok(report)
}

async fn is_newer(source: &Path, dest: &Path) -> Result<bool, SinkError> {
    let dest_meta = match fs::metadata(dest).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(io_err(dest)(err)),
    };
    let source_meta = fs::metadata(source).await.map_err(io_err(source))?;
    match (source_meta.modified(), dest_meta.modified()) {
        (Ok(src), Ok(dst)) => Ok(src > dst),
        _ => Ok(true),
    }
}

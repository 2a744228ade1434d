use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use crate::alert;
use crate::enrich;
use crate::pipeline::AlertPipeline;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

enum Follow {
    Rotated,
    Closed,
}

/// Follows the daemon's append-only alert log and feeds every decodable
/// line into the pipeline. Creates the file (and missing parents) when the
/// daemon has not written yet, and reopens when the inode changes under us.
pub async fn tail_alerts(path: String, pipeline: Arc<AlertPipeline>) {
    // First attach skips the backlog; a reopen after rotation reads the new
    // file from the top so nothing written before the reopen is lost.
    let mut seek_end = true;
    loop {
        let mut reader = match open_log(&path, seek_end).await {
            Ok(reader) => reader,
            Err(e) => {
                println!("[TAILER] Cannot open {}: {}. Retrying.", path, e);
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };
        println!("[TAILER] Following {}", path);

        match follow(&mut reader, &path, &pipeline).await {
            Follow::Rotated => {
                println!("[TAILER] Log rotated, reopening {}", path);
                seek_end = false;
            }
            Follow::Closed => {
                println!("[TAILER] Pipeline closed, stopping tail of {}", path);
                return;
            }
        }
    }
}

async fn open_log(path: &str, seek_end: bool) -> std::io::Result<BufReader<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .await?;
    if seek_end {
        file.seek(SeekFrom::End(0)).await?;
    }
    Ok(BufReader::new(file))
}

async fn follow(reader: &mut BufReader<File>, path: &str, pipeline: &AlertPipeline) -> Follow {
    let mut line = String::new();
    let mut pending = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                if rotated(path, reader.get_ref()).await {
                    return Follow::Rotated;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Ok(_) => {
                pending.push_str(&line);
                if !pending.ends_with('\n') {
                    // mid-write line; wait for the daemon to finish it
                    continue;
                }
                let record = pending.trim();
                if !record.is_empty() {
                    // torn lines around rotation decode as garbage; drop them
                    if let Ok(raw) = serde_json::from_str::<Value>(record) {
                        let mut alert = alert::normalize(raw);
                        enrich::enrich(&mut alert);
                        if !pipeline.submit(alert) {
                            return Follow::Closed;
                        }
                    }
                }
                pending.clear();
            }
            Err(e) => {
                println!("[TAILER] Read error on {}: {}", path, e);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

async fn rotated(path: &str, file: &File) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(path).await, file.metadata().await) {
            (Ok(on_disk), Ok(open)) => on_disk.ino() != open.ino(),
            // path vanished; the reopen recreates it
            (Err(_), _) => true,
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (path, file);
        false
    }
}

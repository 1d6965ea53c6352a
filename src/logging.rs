//! File logging for the `sheet-agent` binary.
//!
//! Each run writes to a fresh `agent.log` in the log directory; the previous
//! runs are kept as `agent.log.1` (newest) through `agent.log.{KEPT_LOGS}`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "agent.log";

/// Previous runs retained on disk.
pub const KEPT_LOGS: u32 = 3;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "sheet_agent=info,warn";

/// Install the global subscriber writing to `<log_dir>/agent.log`.
///
/// Returns the path of the active log file.
pub fn init(log_dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate(&log_path, KEPT_LOGS);

    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(SyncedFile::new(file))
        .with_ansi(false)
        .with_target(true)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "logging: sheet-agent starting"
    );
    Ok(log_path)
}

/// `agent.log` with generation `n` appended (`agent.log.n`).
fn generation(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Shift every kept generation up by one and move `base` to generation 1.
/// Gaps in the chain are tolerated; the oldest generation is discarded.
fn rotate(base: &Path, keep: u32) {
    if keep == 0 {
        let _ = std::fs::remove_file(base);
        return;
    }
    let _ = std::fs::remove_file(generation(base, keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(generation(base, n), generation(base, n + 1));
    }
    if base.exists() {
        let _ = std::fs::rename(base, generation(base, 1));
    }
}

/// Shared log file that is flushed after every record, so the tail of the
/// log survives a killed process.
#[derive(Clone)]
struct SyncedFile {
    inner: Arc<Mutex<File>>,
}

impl SyncedFile {
    fn new(file: File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut file = self
            .inner
            .lock()
            .map_err(|e| io::Error::other(format!("log file lock poisoned: {e}")))?;
        f(&mut file)
    }
}

impl Write for SyncedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| {
            let n = file.write(buf)?;
            file.flush()?;
            Ok(n)
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

impl<'a> MakeWriter<'a> for SyncedFile {
    type Writer = SyncedFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_last_three() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE_NAME);

        for run in 0..5 {
            std::fs::write(&base, format!("run {run}")).unwrap();
            rotate(&base, KEPT_LOGS);
        }

        assert!(!base.exists());
        let read = |n| std::fs::read_to_string(generation(&base, n)).unwrap();
        assert_eq!(read(1), "run 4");
        assert_eq!(read(2), "run 3");
        assert_eq!(read(3), "run 2");
        assert!(!generation(&base, 4).exists());
    }

    #[test]
    fn rotation_tolerates_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE_NAME);
        std::fs::write(generation(&base, 2), "old").unwrap();
        std::fs::write(&base, "current").unwrap();

        rotate(&base, KEPT_LOGS);

        assert_eq!(std::fs::read_to_string(generation(&base, 1)).unwrap(), "current");
        assert_eq!(std::fs::read_to_string(generation(&base, 3)).unwrap(), "old");
    }

    #[test]
    fn writes_reach_disk_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let mut writer = SyncedFile::new(File::create(&path).unwrap());

        writer.write_all(b"coordinator: request completed\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "coordinator: request completed\n"
        );
    }

    #[test]
    fn clones_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let writer = SyncedFile::new(File::create(&path).unwrap());

        writer.make_writer().write_all(b"a\n").unwrap();
        writer.make_writer().write_all(b"b\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }
}

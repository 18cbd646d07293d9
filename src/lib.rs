pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod provider;
pub mod session;

#[cfg(test)]
mod testutil;

use std::path::{Path, PathBuf};

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "mcp_context_client=info,warn";

/// Log file name inside the data directory.
const LOG_FILE_NAME: &str = "client.log";

/// Rotated log files kept next to the current one.
const LOG_FILES_KEPT: u32 = 3;

/// Where diagnostics go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    /// Rotating `client.log` in the data directory.
    File,
    /// Standard error. Providers must use this; stdout carries protocol frames.
    Stderr,
}

/// Return the platform-standard data directory for the client.
///
/// - macOS: `~/Library/Application Support/mcp-context-client/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-context-client\`
/// - Linux: `$XDG_DATA_HOME/mcp-context-client/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-context-client/` if none of the above resolve.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-context-client");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-context-client")
}

/// Initialize the tracing subscriber.
///
/// With [`LogSink::File`], rotates existing logs (client.log → client.log.1 →
/// .2 → .3) and opens a fresh client.log behind a line-flushing writer. If
/// the file cannot be opened, logging falls back to stderr.
///
/// Returns the log file path when logging to a file.
pub fn init_tracing(sink: LogSink) -> Option<PathBuf> {
    use std::io::IsTerminal;
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let log_file = match sink {
        LogSink::File => open_log_file(&data_dir()),
        LogSink::Stderr => None,
    };

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let installed = match &log_file {
        Some((_, writer)) => builder
            .with_writer(writer.clone())
            .with_ansi(false)
            .try_init()
            .is_ok(),
        None => builder
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .try_init()
            .is_ok(),
    };

    let log_path = log_file.map(|(path, _)| path);
    if installed {
        let destination = match &log_path {
            Some(path) => path.display().to_string(),
            None => "stderr".to_string(),
        };
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = %destination,
            pid = std::process::id(),
            "=== mcp-context-client starting ==="
        );
    }
    log_path
}

fn open_log_file(log_dir: &Path) -> Option<(PathBuf, FlushingWriter)> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("warning: cannot create {}: {e}; logging to stderr", log_dir.display());
        return None;
    }

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, LOG_FILES_KEPT);

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => Some((log_path, FlushingWriter::new(file))),
        Err(e) => {
            eprintln!("warning: cannot open {}: {e}; logging to stderr", log_path.display());
            None
        }
    }
}

/// Rotate log files: `client.log` → `client.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// a crash mid-session still leaves every log line on disk.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self.file.lock().map_err(|e| {
            std::io::Error::other(format!("lock poisoned: {e}"))
        })?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self.file.lock().map_err(|e| {
            std::io::Error::other(format!("lock poisoned: {e}"))
        })?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_log_file_keeps_last_n() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE_NAME);
        for generation in 0..5 {
            std::fs::write(&base, format!("gen {generation}")).unwrap();
            rotate_log_file(&base, 3);
        }

        assert!(!base.exists());
        let read = |suffix: u32| std::fs::read_to_string(format!("{}.{suffix}", base.display())).unwrap();
        assert_eq!(read(1), "gen 4");
        assert_eq!(read(2), "gen 3");
        assert_eq!(read(3), "gen 2");
        assert!(!std::path::Path::new(&format!("{}.4", base.display())).exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let (path, mut writer) = open_log_file(dir.path()).unwrap();
        writer.write_all(b"line one\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "line one\n");
    }

    #[test]
    fn test_data_dir_is_namespaced() {
        assert!(data_dir().ends_with("mcp-context-client") || data_dir().ends_with(".mcp-context-client"));
    }
}

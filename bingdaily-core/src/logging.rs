//! env_logger setup writing to a size-rotated file.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use env_logger::{Env, Target};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};

pub const LOG_FILE_NAME: &str = "bing_wallpaper.log";
pub const MAX_LOG_BYTES: usize = 5 * 1024 * 1024;
pub const LOG_BACKUPS: usize = 2;

/// Append to `path`, moving it to `.1`, `.2`, ... once it has grown past
/// `max_bytes`. Records are never split across files.
pub fn rotating_file(
    path: &Path,
    max_bytes: usize,
    backups: usize,
) -> io::Result<FileRotate<AppendCount>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(FileRotate::new(
        path,
        AppendCount::new(backups),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

/// Where formatted records go: the log file, stderr, or both.
struct LogSink {
    file: Option<FileRotate<AppendCount>>,
    stderr: bool,
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        if self.stderr {
            io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn format_record(buf: &mut env_logger::fmt::Formatter, record: &log::Record) -> io::Result<()> {
    let thread = std::thread::current();
    writeln!(
        buf,
        "{} - {} - [{}] - {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
        record.level(),
        thread.name().unwrap_or("unnamed"),
        record.args()
    )
}

/// Install the global logger. `RUST_LOG` overrides the default `info`
/// filter. Without a log file everything goes to stderr.
pub fn init(log_file: Option<&Path>, echo_stderr: bool) -> Result<()> {
    let file = match log_file {
        Some(path) => Some(
            rotating_file(path, MAX_LOG_BYTES, LOG_BACKUPS)
                .with_context(|| format!("Failed to open log file {}", path.display()))?,
        ),
        None => None,
    };
    let stderr = echo_stderr || file.is_none();

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(format_record)
        .target(Target::Pipe(Box::new(LogSink { file, stderr })))
        .try_init()
        .context("Logger was already initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn full_log_moves_to_a_numbered_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join(LOG_FILE_NAME);
        let mut log = rotating_file(&path, 10, LOG_BACKUPS).unwrap();

        log.write_all(b"first record\n").unwrap();
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        let backup = dir.path().join("logs").join(format!("{}.1", LOG_FILE_NAME));
        assert_eq!(fs::read_to_string(backup).unwrap(), "first record\n");
    }

    #[test]
    fn sink_writes_to_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let mut sink = LogSink {
            file: Some(rotating_file(&path, MAX_LOG_BYTES, LOG_BACKUPS).unwrap()),
            stderr: false,
        };

        writeln!(sink, "2024-01-01 08:00:00,000 - INFO - [main] - hello").unwrap();
        sink.flush().unwrap();

        assert!(fs::read_to_string(&path).unwrap().ends_with("hello\n"));
    }
}

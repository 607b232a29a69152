//! Trace line sources
//!
//! A [`LineSource`] hands out one owned line at a time and blocks until a
//! line is available or the stream ends. [`TraceSource`] backs it with the
//! live `trace_pipe`, a replayed report file or stdin.
//!
//! The live pipe is opened non-blocking and polled by the runtime, so a
//! dropped `next_line` future stops waiting and dropping the source closes
//! the descriptor. Reads from files and stdin go through tokio's blocking
//! pool and cannot be interrupted once started.

use crate::error::{LatencyError, Result};
use std::{future::Future, path::Path};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    net::unix::pipe,
};

/// Producer of raw trace lines
///
/// Implementations must be cancel safe: if a pending `next_line` is
/// dropped, no line may be lost or split.
pub trait LineSource: Send {
    /// Next line without its terminator, `None` at end of stream
    fn next_line(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Line reader over any async byte stream
pub struct TraceSource {
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    buf: Vec<u8>,
}

impl TraceSource {
    /// Open a file or pipe (e.g. `trace_pipe` or a `trace-cmd report` dump)
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|source| {
            LatencyError::TraceSourceUnavailable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::from_reader(file))
    }

    /// Open a kernel trace pipe (or FIFO) for cancellable reading
    ///
    /// Must be called from within a tokio runtime. The file must support
    /// polling, which rules out regular files.
    pub fn open_pipe<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let receiver = pipe::OpenOptions::new()
            .unchecked(true)
            .open_receiver(path)
            .map_err(|source| LatencyError::TraceSourceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_reader(receiver))
    }

    /// Read lines from standard input
    pub fn stdin() -> Self {
        Self::from_reader(tokio::io::stdin())
    }

    pub fn from_reader<R: AsyncRead + Unpin + Send + 'static>(reader: R) -> Self {
        Self {
            reader: BufReader::new(Box::new(reader)),
            buf: Vec::with_capacity(512),
        }
    }
}

impl LineSource for TraceSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        // Partial data from a cancelled read stays in `buf`
        let n = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(LatencyError::TraceRead)?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();

        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::{sys::stat::Mode, unistd::mkfifo};
    use std::{
        fs::OpenOptions,
        io::{Cursor, Write},
        time::{Duration, Instant},
    };
    use tokio::time::sleep;

    fn fifo(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("trace_pipe");
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        path
    }

    #[tokio::test]
    async fn test_reads_lines_and_strips_terminators() {
        let data = b"first\r\nsecond\n\nlast-without-newline".to_vec();
        let mut source = TraceSource::from_reader(Cursor::new(data));

        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(
            source.next_line().await.unwrap().as_deref(),
            Some("last-without-newline")
        );
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let data = b"comm-\xff\xfe-1 [000]\n".to_vec();
        let mut source = TraceSource::from_reader(Cursor::new(data));

        let line = source.next_line().await.unwrap().unwrap();
        assert!(line.starts_with("comm-"));
        assert!(line.ends_with("-1 [000]"));
    }

    #[tokio::test]
    async fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a").unwrap();
        writeln!(file, "b").unwrap();

        let mut source = TraceSource::open(file.path()).await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(source.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        match TraceSource::open("/nonexistent/trace_pipe").await {
            Err(LatencyError::TraceSourceUnavailable { path, .. }) => {
                assert_eq!(path, Path::new("/nonexistent/trace_pipe"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_pipe_reads_written_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = fifo(&dir);

        let mut source = TraceSource::open_pipe(&path).unwrap();
        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"one\ntwo\n").unwrap();

        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_cancelled_pipe_read_does_not_block_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = fifo(&dir);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        // The writer stays open so the pipe never reports end of stream
        let writer = runtime.block_on(async {
            let mut source = TraceSource::open_pipe(&path).unwrap();
            let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
            writer.write_all(b"first\n").unwrap();
            assert_eq!(source.next_line().await.unwrap().as_deref(), Some("first"));

            tokio::select! {
                line = source.next_line() => panic!("idle pipe returned {:?}", line),
                _ = sleep(Duration::from_millis(100)) => {}
            }
            writer
        });

        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(writer);
    }

    #[tokio::test]
    async fn test_open_pipe_rejects_missing_path() {
        let result = TraceSource::open_pipe("/nonexistent/trace_pipe");
        assert!(matches!(
            result,
            Err(LatencyError::TraceSourceUnavailable { .. })
        ));
    }
}

//! Blocking line reader feeding a file's job channel.
//!
//! The reader runs on a blocking thread. Blank lines are skipped, invalid
//! UTF-8 is decoded lossily and a read error ends the stream after being
//! reported once.

use async_channel::Sender;
use snafu::prelude::*;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::emit;
use crate::error::{DecompressionSnafu, FileOpenSnafu, ReadLineSnafu, ReaderError};
use crate::metrics::events::LinesRead;

use super::compression::codec_for_path;

/// Iterator over the non-blank lines of one input file.
pub struct LineReader {
    path: String,
    inner: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
    line: usize,
    done: bool,
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("path", &self.path)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

/// Open `path` with the codec matching its extension.
///
/// The first block is decoded up front, so a file that is not in the format
/// its extension claims fails here rather than after the first line.
pub fn open_lines(path: &Path) -> Result<LineReader, ReaderError> {
    let name = path.display().to_string();
    let file = File::open(path).context(FileOpenSnafu { path: name.clone() })?;
    let codec = codec_for_path(path);
    let mut inner = codec.create_reader(file).context(DecompressionSnafu {
        codec: codec.name(),
        path: name.clone(),
    })?;
    inner.fill_buf().context(DecompressionSnafu {
        codec: codec.name(),
        path: name.clone(),
    })?;
    debug!("Opened {} ({})", name, codec.name());
    Ok(LineReader {
        path: name,
        inner,
        buf: Vec::with_capacity(256),
        line: 0,
        done: false,
    })
}

impl LineReader {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Iterator for LineReader {
    type Item = Result<String, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            let read = self.inner.read_until(b'\n', &mut self.buf);
            match read {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {
                    self.line += 1;
                    let text = String::from_utf8_lossy(&self.buf);
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Some(Ok(text.trim_end_matches(['\r', '\n']).to_string()));
                }
                Err(e) => {
                    self.done = true;
                    let line = self.line + 1;
                    return Some(Err(e).context(ReadLineSnafu {
                        path: self.path.clone(),
                        line,
                    }));
                }
            }
        }
    }
}

/// What the reader thread did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Lines handed to the executors.
    pub lines: usize,
    /// Read errors; at most one since the reader stops at the first.
    pub read_errors: usize,
    /// The executors went away or the token fired before end of file.
    pub stopped_early: bool,
}

/// Send every line of `lines` into `jobs`, blocking while the channel is full.
///
/// Dropping `jobs` on return closes the channel once no other sender is left,
/// which is how executors learn the file is exhausted.
pub fn pump_lines(
    lines: LineReader,
    jobs: Sender<String>,
    cancel: &CancellationToken,
) -> ReadSummary {
    let path = lines.path().to_string();
    let mut summary = ReadSummary::default();

    for line in lines {
        if cancel.is_cancelled() {
            debug!("Reader for {} cancelled", path);
            summary.stopped_early = true;
            break;
        }
        match line {
            Ok(line) => {
                if jobs.send_blocking(line).is_err() {
                    debug!("All executors for {} are gone, stopping reader", path);
                    summary.stopped_early = true;
                    break;
                }
                summary.lines += 1;
            }
            Err(e) => {
                error!("{}", e);
                summary.read_errors += 1;
                break;
            }
        }
    }

    emit!(LinesRead {
        count: summary.lines as u64
    });
    debug!("Reader for {} finished after {} lines", path, summary.lines);
    summary
}

//! Decoder collaborator seam.
//!
//! Bit-level STDF decoding lives outside this crate. A [`RecordDecoder`] reads a
//! byte stream and pushes one [`RawRecord`] per physical record, in file order,
//! into a [`RecordSink`]. [`ProgressReader`] instruments the stream so the job
//! manager can report how far a decode has got.
//!
//! [`JsonLinesDecoder`] is the decoder shipped with the crate: it reads records
//! that an upstream tool has already decoded and written one JSON object per
//! line, e.g. `{"kind":"PRR","fields":{"SITE_NUM":1,"HARD_BIN":1}}`.

use crate::collector::{Dataset, RecordCollector};
use crate::error::{AppResult, StdfError};
use crate::records::RawRecord;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

/// Receives decoded records.
pub trait RecordSink {
    /// Receives the next record in file order. An error stops the decode.
    fn accept(&mut self, record: RawRecord) -> AppResult<()>;
}

/// Turns a byte stream into raw records.
pub trait RecordDecoder: Send + Sync {
    /// Decodes the whole stream. Malformed or truncated input must surface as
    /// [`StdfError::Decode`].
    fn decode(&self, input: &mut dyn Read, sink: &mut dyn RecordSink) -> AppResult<()>;
}

/// `Read` wrapper reporting cumulative bytes consumed after every read.
pub struct ProgressReader<R, F> {
    inner: R,
    bytes_read: u64,
    on_progress: F,
}

impl<R: Read, F: FnMut(u64)> ProgressReader<R, F> {
    /// Wraps `inner`; `on_progress` receives the running byte total.
    pub fn new(inner: R, on_progress: F) -> Self {
        Self {
            inner,
            bytes_read: 0,
            on_progress,
        }
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: Read, F: FnMut(u64)> Read for ProgressReader<R, F> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.bytes_read += n as u64;
            (self.on_progress)(self.bytes_read);
        }
        Ok(n)
    }
}

/// Decodes a file into a [`Dataset`], optionally reporting bytes consumed.
pub fn collect_file(
    decoder: &dyn RecordDecoder,
    path: &Path,
    on_progress: Option<&mut dyn FnMut(u64)>,
) -> AppResult<Dataset> {
    let file = File::open(path)?;
    let mut collector = RecordCollector::new();
    match on_progress {
        Some(callback) => {
            let mut reader = ProgressReader::new(file, callback);
            decoder.decode(&mut reader, &mut collector)?;
        }
        None => {
            let mut reader = file;
            decoder.decode(&mut reader, &mut collector)?;
        }
    }
    Ok(collector.finish())
}

/// Reads newline-delimited JSON [`RawRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesDecoder;

impl RecordDecoder for JsonLinesDecoder {
    fn decode(&self, input: &mut dyn Read, sink: &mut dyn RecordSink) -> AppResult<()> {
        let reader = BufReader::new(input);
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| match e.kind() {
                ErrorKind::InvalidData => StdfError::Decode(format!("line {}: {}", index + 1, e)),
                _ => StdfError::Io(e),
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: RawRecord = serde_json::from_str(trimmed).map_err(|e| {
                StdfError::Decode(format!("line {}: {}", index + 1, e))
            })?;
            sink.accept(record)?;
        }
        Ok(())
    }
}

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

use crate::partition::LineRange;

/// Threshold in bytes above which we attempt to use mmap for reading.
/// Callers can override via API; this is a reasonable default.
pub const DEFAULT_MMAP_THRESHOLD_BYTES: u64 = 16 * 1024 * 1024; // 16 MiB

/// Lines are yielded as raw bytes without the trailing `\n` or `\r\n`.
pub type LineIter = Box<dyn Iterator<Item = io::Result<Vec<u8>>> + Send + 'static>;

/// Decide whether to use mmap based on file size and threshold.
pub fn should_use_mmap(file_size_bytes: u64, threshold_bytes: u64) -> bool {
    file_size_bytes >= threshold_bytes
}

/// Iterate lines from a file path using buffered reader (non-mmap).
pub fn iter_lines_bufread<P: AsRef<Path>>(path: P) -> Result<LineIter> {
    let file = File::open(&path).with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(Box::new(BufLines {
        reader: BufReader::new(file),
        buf: Vec::new(),
    }))
}

/// Iterate lines from a file path using mmap. This avoids read copies but
/// still allocates per returned line; it scans for '\n' boundaries.
pub fn iter_lines_mmap<P: AsRef<Path>>(path: P) -> Result<LineIter> {
    let file = File::open(&path).with_context(|| format!("open {}", path.as_ref().display()))?;
    let mmap =
        unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.as_ref().display()))?;
    Ok(Box::new(MmapLines { mmap, pos: 0 }))
}

/// Buffered line reader over raw bytes. `BufRead::lines` would turn a single
/// invalid UTF-8 byte into a read error and end the partition early.
struct BufLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> Iterator for BufLines<R> {
    type Item = io::Result<Vec<u8>>;
    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let bytes = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf[..]);
                Some(Ok(line_from_bytes(bytes)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

struct MmapLines {
    mmap: Mmap,
    pos: usize,
}

impl Iterator for MmapLines {
    type Item = io::Result<Vec<u8>>;
    fn next(&mut self) -> Option<Self::Item> {
        let data: &[u8] = &self.mmap;
        if self.pos >= data.len() {
            return None;
        }
        let start = self.pos;
        if let Some(off) = memchr::memchr(b'\n', &data[self.pos..]) {
            let end = self.pos + off;
            self.pos = end + 1;
            Some(Ok(line_from_bytes(&data[start..end])))
        } else {
            // Last line without trailing newline
            self.pos = data.len();
            Some(Ok(line_from_bytes(&data[start..])))
        }
    }
}

fn line_from_bytes(bytes: &[u8]) -> Vec<u8> {
    // Trim a trailing '\r' if present (handle Windows CRLF)
    bytes.strip_suffix(b"\r").unwrap_or(bytes).to_vec()
}

/// Choose mmap or bufread and return an iterator over lines.
pub fn iter_lines_auto<P: AsRef<Path>>(path: P, threshold_bytes: u64) -> Result<LineIter> {
    let meta =
        std::fs::metadata(&path).with_context(|| format!("stat {}", path.as_ref().display()))?;
    if meta.is_file() && meta.len() > 0 && should_use_mmap(meta.len(), threshold_bytes) {
        iter_lines_mmap(path)
    } else {
        iter_lines_bufread(path)
    }
}

/// Count physical lines the way the line iterators yield them: every '\n'
/// terminates a line, and trailing bytes without a newline form one more.
pub fn count_lines<P: AsRef<Path>>(path: P, threshold_bytes: u64) -> Result<u64> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    if meta.is_file() && meta.len() > 0 && should_use_mmap(meta.len(), threshold_bytes) {
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?;
        let newlines = memchr::memchr_iter(b'\n', &mmap).count() as u64;
        let unterminated = u64::from(mmap.last().is_some_and(|b| *b != b'\n'));
        return Ok(newlines + unterminated);
    }
    let mut reader = BufReader::new(file);
    let mut buf = vec![0u8; 64 * 1024];
    let mut lines = 0u64;
    let mut last = None;
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        lines += memchr::memchr_iter(b'\n', &buf[..n]).count() as u64;
        last = Some(buf[n - 1]);
    }
    Ok(lines + u64::from(last.is_some_and(|b| b != b'\n')))
}

/// Sequential reader over one partition of a file. Lines before
/// `range.start` are read and discarded, so the source also works on
/// non-seekable inputs; iteration stops at `range.end` or EOF.
pub struct LineSource {
    inner: LineIter,
    next_line: u64,
    end: u64,
}

impl LineSource {
    pub fn open<P: AsRef<Path>>(path: P, range: LineRange, threshold_bytes: u64) -> Result<Self> {
        let path = path.as_ref();
        let mut src = Self {
            inner: iter_lines_auto(path, threshold_bytes)?,
            next_line: 0,
            end: range.end,
        };
        let start = range.start.min(range.end);
        while src.next_line < start {
            match src.inner.next() {
                Some(Ok(_)) => src.next_line += 1,
                Some(Err(e)) => {
                    return Err(e).with_context(|| {
                        format!("read {} at line {}", path.display(), src.next_line)
                    });
                }
                None => {
                    src.end = src.next_line;
                    break;
                }
            }
        }
        Ok(src)
    }

    /// Zero-based index of the line the next call to `next` yields.
    pub fn position(&self) -> u64 {
        self.next_line
    }
}

impl Iterator for LineSource {
    type Item = io::Result<Vec<u8>>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.next_line >= self.end {
            return None;
        }
        let item = self.inner.next();
        match item {
            Some(_) => self.next_line += 1,
            None => self.end = self.next_line,
        }
        item
    }
}

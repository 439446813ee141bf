//! File-backed, keep-on-poll message store.
//!
//! One append-only file of frames: `u32` LE length, `u32` LE crc32c of the
//! payload, then the payload. Opening the file walks the length prefixes and
//! truncates a torn tail left behind by a crash; damage before the tail fails
//! the open instead.
//! Pollers never read past the committed length.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crc32c::crc32c;
use tracing::{debug, warn};

use crate::store::{Appender, AppendingContext, CommitTarget, MessageStore, Poller};
use crate::types::{PollResult, StoreError, StoreMode, StoreResult};

const FRAME_HEADER_LEN: usize = 8;
const NO_OFFSET: u64 = u64::MAX;

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// fsync after every committed message.
    pub sync_on_commit: bool,
    pub max_message_bytes: usize,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: false,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Durable log on a single file. Always [`StoreMode::KeepOnPoll`].
#[derive(Clone)]
pub struct FileStore {
    shared: Arc<FileShared>,
}

struct FileShared {
    path: PathBuf,
    options: FileStoreOptions,
    writer: Mutex<File>,
    /// Bytes visible to pollers.
    committed: AtomicU64,
    count: AtomicUsize,
    last_offset: AtomicU64,
    truncated_bytes: u64,
}

impl FileStore {
    /// Open or create the log at `path`, repairing a torn tail.
    pub fn open(path: impl AsRef<Path>, options: FileStoreOptions) -> StoreResult<Self> {
        if options.max_message_bytes == 0 {
            return Err(StoreError::Config(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let scan = scan_frames(&mut file, file_len, options.max_message_bytes)?;
        let truncated_bytes = file_len - scan.valid_len;
        if truncated_bytes > 0 {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                truncated_bytes,
                "Truncating torn tail of message file"
            );
            file.set_len(scan.valid_len)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::Start(scan.valid_len))?;

        debug!(path = %path.display(), messages = scan.count, "Opened message file");

        Ok(Self {
            shared: Arc::new(FileShared {
                path,
                options,
                writer: Mutex::new(file),
                committed: AtomicU64::new(scan.valid_len),
                count: AtomicUsize::new(scan.count),
                last_offset: AtomicU64::new(scan.last_offset.unwrap_or(NO_OFFSET)),
                truncated_bytes,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Bytes cut from the tail when the file was opened.
    pub fn truncated_bytes(&self) -> u64 {
        self.shared.truncated_bytes
    }

    /// Bytes visible to pollers.
    pub fn committed_len(&self) -> u64 {
        self.shared.committed.load(Ordering::Acquire)
    }
}

impl FileShared {
    fn lock_writer(&self) -> MutexGuard<'_, File> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageStore for FileStore {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(FileAppender {
            shared: self.shared.clone(),
        })
    }

    fn poller(&self) -> Box<dyn Poller> {
        Box::new(FilePoller {
            shared: self.shared.clone(),
            file: None,
            offset: 0,
            index: 0,
            buf: Vec::new(),
        })
    }

    fn mode(&self) -> StoreMode {
        StoreMode::KeepOnPoll
    }

    fn size(&self) -> usize {
        self.shared.count.load(Ordering::Acquire)
    }

    fn last_message(&self) -> StoreResult<Option<Vec<u8>>> {
        let offset = self.shared.last_offset.load(Ordering::Acquire);
        if offset == NO_OFFSET {
            return Ok(None);
        }
        let mut file = File::open(&self.shared.path)?;
        let mut buf = Vec::new();
        read_frame_at(&mut file, offset, &mut buf)?;
        Ok(Some(buf))
    }
}

// ---------------------------------------------------------------------------
// Appender
// ---------------------------------------------------------------------------

struct FileAppender {
    shared: Arc<FileShared>,
}

impl CommitTarget for FileAppender {
    fn publish(&mut self, message: &[u8]) -> StoreResult<()> {
        let max_bytes = self.shared.options.max_message_bytes;
        if message.len() > max_bytes {
            return Err(StoreError::MessageTooLarge {
                max_bytes,
                got_bytes: message.len(),
            });
        }
        let frame = encode_frame(message);

        let mut file = self.shared.lock_writer();
        let offset = self.shared.committed.load(Ordering::Acquire);
        if let Err(e) = write_frame(&mut file, &frame, self.shared.options.sync_on_commit) {
            // Drop whatever part of the frame made it to disk.
            let _ = file.set_len(offset);
            let _ = file.seek(SeekFrom::Start(offset));
            return Err(e.into());
        }

        self.shared.last_offset.store(offset, Ordering::Release);
        self.shared.count.fetch_add(1, Ordering::AcqRel);
        self.shared
            .committed
            .store(offset + frame.len() as u64, Ordering::Release);
        Ok(())
    }
}

impl Appender for FileAppender {
    fn appending(&mut self) -> StoreResult<AppendingContext<'_>> {
        Ok(AppendingContext::new(self))
    }
}

fn write_frame(file: &mut File, frame: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(frame)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

struct FilePoller {
    shared: Arc<FileShared>,
    file: Option<File>,
    offset: u64,
    index: u64,
    buf: Vec<u8>,
}

impl Poller for FilePoller {
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]) -> PollResult) -> StoreResult<usize> {
        let committed = self.shared.committed.load(Ordering::Acquire);
        if self.offset >= committed {
            return Ok(0);
        }

        let file = match &mut self.file {
            Some(file) => file,
            slot => slot.insert(File::open(&self.shared.path)?),
        };
        let frame_len = read_frame_at(file, self.offset, &mut self.buf)?;

        match handler(&self.buf) {
            PollResult::Peek => Ok(0),
            PollResult::Poll => {
                self.offset += frame_len;
                self.index += 1;
                Ok(1)
            }
        }
    }

    fn position(&self) -> u64 {
        self.index
    }

    fn move_to_start(&mut self) -> bool {
        self.offset = 0;
        self.index = 0;
        true
    }

    fn move_to_end(&mut self) -> bool {
        // Count and length are published separately; take both under the writer lock.
        let _writer = self.shared.lock_writer();
        self.offset = self.shared.committed.load(Ordering::Acquire);
        self.index = self.shared.count.load(Ordering::Acquire) as u64;
        true
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

fn encode_frame(message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + message.len());
    frame.extend_from_slice(&(message.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32c(message).to_le_bytes());
    frame.extend_from_slice(message);
    frame
}

/// Read the frame at `offset` into `buf`. Returns the full frame length.
fn read_frame_at(file: &mut File, offset: u64, buf: &mut Vec<u8>) -> StoreResult<u64> {
    file.seek(SeekFrom::Start(offset))?;
    let mut header = [0u8; FRAME_HEADER_LEN];
    file.read_exact(&mut header)?;
    let (length, expected_crc) = decode_header(&header);

    buf.clear();
    buf.resize(length, 0);
    file.read_exact(buf)?;

    let actual_crc = crc32c(buf);
    if actual_crc != expected_crc {
        return Err(StoreError::Corrupt {
            offset,
            reason: format!("crc mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
        });
    }
    Ok((FRAME_HEADER_LEN + length) as u64)
}

fn decode_header(header: &[u8; FRAME_HEADER_LEN]) -> (usize, u32) {
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (length, crc)
}

struct FrameScan {
    valid_len: u64,
    count: usize,
    last_offset: Option<u64>,
}

/// Walk length prefixes from the start of the file.
///
/// Only a torn tail ends the walk early: a short header, a length running past
/// EOF, or a checksum failure on the last frame. An oversized frame or a
/// checksum failure before the last frame is [`StoreError::Corrupt`].
fn scan_frames(file: &mut File, file_len: u64, max_message_bytes: usize) -> StoreResult<FrameScan> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);
    let mut scan = FrameScan {
        valid_len: 0,
        count: 0,
        last_offset: None,
    };
    let mut body = Vec::new();

    loop {
        let offset = scan.valid_len;
        let remaining = file_len - offset;
        if remaining < FRAME_HEADER_LEN as u64 {
            break;
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        if !read_fully(&mut reader, &mut header)? {
            break;
        }
        let (length, expected_crc) = decode_header(&header);
        let frame_len = (FRAME_HEADER_LEN + length) as u64;
        if frame_len > remaining {
            break;
        }
        if length > max_message_bytes {
            return Err(StoreError::Corrupt {
                offset,
                reason: format!("frame of {length} bytes exceeds max_message_bytes {max_message_bytes}"),
            });
        }

        body.clear();
        body.resize(length, 0);
        reader.read_exact(&mut body)?;
        let actual_crc = crc32c(&body);
        if actual_crc != expected_crc {
            if offset + frame_len == file_len {
                break;
            }
            return Err(StoreError::Corrupt {
                offset,
                reason: format!("crc mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
            });
        }

        scan.last_offset = Some(offset);
        scan.valid_len += frame_len;
        scan.count += 1;
    }

    Ok(scan)
}

/// `Ok(false)` when the reader hits EOF before `buf` is full.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> StoreResult<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::model::Event;

/// Bytes around each payload: the length prefix and the CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event to [len][bincode][crc32] format. Returns the bytes
/// written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

/// Read one record and its size on disk. `Ok(None)` on clean EOF and on any
/// truncated or corrupt record, which ends the replay.
fn decode_next(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, payload.len() as u64 + FRAME_OVERHEAD)))
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of committed space transitions.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is cut off on open, so
///   later appends never land behind a record replay cannot get past.
/// - A batch that fails to flush is rolled back to the last durable length.
pub struct Wal {
    writer: BufWriter<File>,
    /// File length covered by successful `flush_sync` calls.
    durable_len: u64,
    /// Bytes appended since the last successful flush.
    pending_len: u64,
    appended: u64,
}

impl Wal {
    /// Replay whatever is on disk at `path`, then open it for appending.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = Self::replay_valid(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let meta = file.metadata()?;
        if meta.is_file() && meta.len() > valid_len {
            tracing::warn!(
                "WAL {}: dropping {} bytes of torn tail",
                path.display(),
                meta.len() - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            durable_len: valid_len,
            pending_len: 0,
            appended: 0,
        };
        Ok((wal, events))
    }

    /// Append and fsync one event. Production code goes through
    /// `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.appended += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        Ok(())
    }

    /// Forget everything appended since the last successful flush: buffered
    /// bytes are discarded and bytes that already reached the file are cut
    /// off.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands the unwritten bytes back instead of flushing them.
        let (_, _unwritten) = stale.into_parts();
        self.pending_len = 0;
        self.writer.get_ref().set_len(self.durable_len)?;
        self.writer.get_ref().sync_all()
    }

    /// Events appended since this handle was opened.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// All valid events on disk, in append order.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::replay_valid(path)?.0)
    }

    /// Valid events plus the byte length of the prefix holding them.
    fn replay_valid(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0;
        while let Some((event, size)) = decode_next(&mut reader)? {
            events.push(event);
            valid_len += size;
        }
        Ok((events, valid_len))
    }
}

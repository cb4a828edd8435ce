use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};

use tracing::warn;
use std::path::{Path, PathBuf};

use crate::model::Record;

/// Encode a single record to `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next entry. `Ok(None)` on clean EOF or on a torn/corrupt tail.
fn decode_record(reader: &mut impl Read, torn: &mut bool) -> io::Result<Option<Record>> {
    let mut len_buf = [0u8; 4];
    match reader.read(&mut len_buf[..1])? {
        0 => return Ok(None),
        _ => {
            if !read_full(reader, &mut len_buf[1..])? {
                *torn = true;
                return Ok(None);
            }
        }
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut crc_buf)? {
        *torn = true;
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        *torn = true;
        return Ok(None);
    }
    match bincode::deserialize::<Record>(&payload) {
        Ok(record) => Ok(Some(record)),
        Err(_) => {
            *torn = true;
            Ok(None)
        }
    }
}

/// Result of reading a log back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<Record>,
    /// A trailing entry was incomplete or failed its checksum and was dropped.
    pub torn_tail: bool,
}

/// Append-only write-ahead log of store mutations.
///
/// Format per entry: `[u32: len][bincode: Record][u32: crc32]`, little endian.
/// A crash mid-write leaves a torn last entry; replay stops there. A write
/// that fails while the process lives is truncated away, so a batch is either
/// fully in the log or not at all.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Length of the intact prefix.
    len: u64,
    appends_since_compact: u64,
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            appends_since_compact: 0,
            #[cfg(test)]
            fail_after: None,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Encode `records`, write them with one call and fsync. On error the
    /// file is cut back to its previous length and nothing counts as appended.
    pub fn append_batch(&mut self, records: &[Record]) -> io::Result<()> {
        let mut buf = Vec::new();
        for record in records {
            encode_record(&mut buf, record)?;
        }
        if let Err(e) = self.write_synced(&buf) {
            if let Err(trunc) = self.file.set_len(self.len).and_then(|()| self.file.sync_all()) {
                warn!("{}: could not roll back failed write: {trunc}", self.path.display());
            }
            return Err(e);
        }
        self.len += buf.len() as u64;
        self.appends_since_compact += records.len() as u64;
        Ok(())
    }

    fn write_synced(&mut self, buf: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = self.fail_after.take() {
            self.file.write_all(&buf[..limit.min(buf.len())])?;
            return Err(io::Error::other("injected write failure"));
        }
        self.file.write_all(buf)?;
        self.file.sync_data()
    }

    /// Make the next write stop after `bytes` bytes and fail.
    #[cfg(test)]
    pub fn fail_next_write_after(&mut self, bytes: usize) {
        self.fail_after = Some(bytes);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a replacement log next to `path` and fsync it. Slow; the live
    /// log stays untouched until `swap_compact_file`.
    pub fn write_compact_file(path: &Path, records: &[Record]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::tmp_path(path))?);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.len = self.file.metadata()?.len();
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    /// Read every intact record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some(record) = decode_record(&mut reader, &mut replay.torn_tail)? {
            replay.records.push(record);
        }
        Ok(replay)
    }
}

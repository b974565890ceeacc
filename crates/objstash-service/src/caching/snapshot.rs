//! Snapshot files, holding a dump of all live entries of a store.
//!
//! A snapshot is written atomically by [`ObjectStore::dump_snapshot`](super::ObjectStore::dump_snapshot)
//! and primes a store via [`ObjectStore::load_snapshot`](super::ObjectStore::load_snapshot).
//! Entries are stored with their encoded bytes, so loading a snapshot does not decode anything.
//!
//! # Layout
//!
//! ```text
//! b"OBJSTASH" | u32 version | u32 count | entry* | sha256 of everything before
//!
//! entry: u32 key length | key | u64 ttl in milliseconds (u64::MAX = none) | u32 length | bytes
//! ```
//!
//! All integers are little endian.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::{CacheError, CacheKey};

/// Magic bytes at the start of every snapshot file.
pub const MAGIC: &[u8; 8] = b"OBJSTASH";

/// The current snapshot format version.
pub const VERSION: u32 = 1;

const NO_TTL: u64 = u64::MAX;
const CHECKSUM_LEN: usize = 32;

/// A single entry of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: CacheKey,
    /// The time the entry had left to live when it was dumped.
    pub ttl: Option<Duration>,
    /// The encoded value.
    pub bytes: Bytes,
}

/// Serializes `entries` into the snapshot format.
pub fn serialize(entries: &[SnapshotEntry]) -> Result<Bytes, CacheError> {
    let mut buf = BytesMut::new();
    buf.put_slice(MAGIC);
    buf.put_u32_le(VERSION);
    buf.put_u32_le(len_u32(entries.len())?);

    for entry in entries {
        buf.put_u32_le(len_u32(entry.key.len())?);
        buf.put_slice(entry.key.as_bytes());
        let ttl = entry.ttl.map_or(NO_TTL, |ttl| {
            u64::try_from(ttl.as_millis()).map_or(NO_TTL - 1, |ms| ms.min(NO_TTL - 1))
        });
        buf.put_u64_le(ttl);
        buf.put_u32_le(len_u32(entry.bytes.len())?);
        buf.put_slice(&entry.bytes);
    }

    let checksum = Sha256::digest(&buf);
    buf.put_slice(&checksum);
    Ok(buf.freeze())
}

/// Parses a snapshot, verifying its checksum.
pub fn parse(data: &[u8]) -> Result<Vec<SnapshotEntry>, CacheError> {
    if data.len() < MAGIC.len() + 8 + CHECKSUM_LEN {
        return Err(CacheError::corrupt("snapshot is truncated"));
    }
    let (mut buf, checksum) = data.split_at(data.len() - CHECKSUM_LEN);
    if Sha256::digest(buf).as_slice() != checksum {
        return Err(CacheError::corrupt("snapshot checksum mismatch"));
    }

    if &buf[..MAGIC.len()] != MAGIC {
        return Err(CacheError::corrupt("not a snapshot file"));
    }
    buf.advance(MAGIC.len());
    let version = buf.get_u32_le();
    if version != VERSION {
        return Err(CacheError::corrupt(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let count = buf.get_u32_le() as usize;

    let mut entries = Vec::with_capacity(count.min(buf.len()));
    for _ in 0..count {
        let key = CacheKey::from(take(&mut buf)?);
        if buf.remaining() < 8 {
            return Err(CacheError::corrupt("truncated snapshot entry"));
        }
        let ttl = match buf.get_u64_le() {
            NO_TTL => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let bytes = Bytes::copy_from_slice(take(&mut buf)?);
        entries.push(SnapshotEntry { key, ttl, bytes });
    }
    if buf.has_remaining() {
        return Err(CacheError::corrupt("trailing data in snapshot"));
    }
    Ok(entries)
}

/// Atomically writes a snapshot of `entries` to `path`.
///
/// The snapshot is written to a temporary file next to `path` first, which is then moved into
/// place, so readers never see a partially written snapshot.
pub fn write(path: &Path, entries: &[SnapshotEntry]) -> Result<(), CacheError> {
    let data = serialize(entries)?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(&data)?;
    temp_file.as_file().sync_all()?;
    temp_file
        .persist(path)
        .map_err(|e| CacheError::from_std_error(e.error))?;
    Ok(())
}

/// Reads and parses the snapshot at `path`.
pub fn read(path: &Path) -> Result<Vec<SnapshotEntry>, CacheError> {
    let data = fs::read(path)?;
    parse(&data)
}

fn len_u32(len: usize) -> Result<u32, CacheError> {
    u32::try_from(len).map_err(|_| CacheError::ValueTooLarge {
        size: len,
        limit: u32::MAX as usize,
    })
}

fn take<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], CacheError> {
    if buf.remaining() < 4 {
        return Err(CacheError::corrupt("truncated snapshot entry"));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(CacheError::corrupt("truncated snapshot entry"));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<SnapshotEntry> {
        vec![
            SnapshotEntry {
                key: CacheKey::from("a"),
                ttl: None,
                bytes: Bytes::from_static(&[1, 0]),
            },
            SnapshotEntry {
                key: CacheKey::from(vec![0, 0xff]),
                ttl: Some(Duration::from_millis(1500)),
                bytes: Bytes::from_static(&[1, 3, 0, 0, 0, 0, 0, 0, 0, 0]),
            },
        ]
    }

    #[test]
    fn test_layout() {
        let data = serialize(&entries()[..1]).unwrap();

        let mut expected = b"OBJSTASH".to_vec();
        expected.extend(1u32.to_le_bytes());
        expected.extend(1u32.to_le_bytes());
        expected.extend(1u32.to_le_bytes());
        expected.extend(b"a");
        expected.extend(u64::MAX.to_le_bytes());
        expected.extend(2u32.to_le_bytes());
        expected.extend([1, 0]);
        let checksum = Sha256::digest(&expected);
        expected.extend(checksum);

        assert_eq!(&data[..], &expected[..]);
        assert_eq!(parse(&data).unwrap(), &entries()[..1]);
    }

    #[test]
    fn test_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.snapshot");

        write(&path, &entries()).unwrap();
        assert_eq!(read(&path).unwrap(), entries());

        // overwriting replaces the whole file
        write(&path, &[]).unwrap();
        assert!(read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corruption() {
        let data = serialize(&entries()).unwrap();

        let mut flipped = data.to_vec();
        flipped[20] ^= 0x01;
        assert_eq!(
            parse(&flipped),
            Err(CacheError::Corrupt("snapshot checksum mismatch".into()))
        );

        assert!(matches!(
            parse(&data[..data.len() - 1]),
            Err(CacheError::Corrupt(_))
        ));
        assert!(matches!(parse(b"OBJSTASH"), Err(CacheError::Corrupt(_))));

        // a consistent checksum over garbage is not enough
        let mut garbage = vec![0u8; 16];
        garbage.extend(Sha256::digest(&garbage));
        assert_eq!(
            parse(&garbage),
            Err(CacheError::Corrupt("not a snapshot file".into()))
        );
    }
}

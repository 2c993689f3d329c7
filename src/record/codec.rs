//! Record reading and writing against a block file

use std::io;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{GenCacheError, Result};
use crate::file::BlockFile;

use super::{checksum, header_size, LoadMode, DEAD_BYTE, GROUP_SIZE, OPCODE_DELETED, OPCODE_NORMAL};

/// Header fields of a live record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSizes {
    pub record_size: u32,
    pub key_len: u32,
    pub payload_len: u32,
    pub group_count: u32,
    /// Stored checksum, 0 when the file has checksums off
    pub checksum: i32,
}

impl RecordSizes {
    /// Bytes available to payload + group tags in this slot
    pub fn capacity(&self, header: usize) -> u64 {
        (self.record_size as u64).saturating_sub(header as u64 + self.key_len as u64)
    }
}

/// A live record as far as it was loaded
#[derive(Debug, Clone)]
pub struct Record {
    pub sizes: RecordSizes,
    /// Present for `KeyOnly` and `Full` loads
    pub key: Option<String>,
    pub groups: Vec<i64>,
    /// Present for `Full` loads
    pub payload: Option<Bytes>,
}

/// Outcome of loading an address
#[derive(Debug, Clone)]
pub enum Loaded {
    /// The address holds the fill byte: end of live data
    Dead,
    /// Tombstoned record (or one that could not be materialized)
    Deleted { record_size: u32 },
    Live(Record),
}

impl Loaded {
    /// Slot size of the record at this address, if there is one
    pub fn record_size(&self) -> Option<u32> {
        match self {
            Loaded::Dead => None,
            Loaded::Deleted { record_size } => Some(*record_size),
            Loaded::Live(record) => Some(record.sizes.record_size),
        }
    }
}

/// Where a write landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    pub address: u64,
    /// True when an existing slot was overwritten
    pub in_place: bool,
}

/// Reads and writes records of one data file
pub struct RecordCodec {
    file: Arc<BlockFile>,
    checksums: bool,
}

impl RecordCodec {
    pub fn new(file: Arc<BlockFile>, checksums: bool) -> Self {
        Self { file, checksums }
    }

    pub fn checksums(&self) -> bool {
        self.checksums
    }

    pub fn header_size(&self) -> usize {
        header_size(self.checksums)
    }

    /// Write a record. With `in_place`, the slot at that address is reused
    /// when it is live, belongs to a key of the same length, and has room
    /// for the payload and group tags; otherwise a fresh slot is allocated
    /// and the old one is left as is.
    pub fn write(
        &self,
        key: &str,
        payload: &[u8],
        groups: &[i64],
        in_place: Option<u64>,
    ) -> Result<Written> {
        let header = self.header_size();
        let needed = (payload.len() + groups.len() * GROUP_SIZE) as u64;

        if let Some(address) = in_place {
            if let Loaded::Live(existing) = self.load(address, LoadMode::SizesOnly)? {
                let sizes = existing.sizes;
                if sizes.key_len as usize == key.len() && needed <= sizes.capacity(header) {
                    self.write_at(address, sizes.record_size, key, payload, groups)?;
                    trace!(address, key, "rewrote record in place");
                    return Ok(Written {
                        address,
                        in_place: true,
                    });
                }
            }
        }

        let total = header + key.len() + needed as usize;
        let record_size = i32::try_from(total)
            .map(|size| size as u32)
            .map_err(|_| GenCacheError::TooLarge { size: total })?;
        let address = self.file.allocate(total as u64)?;
        self.write_at(address, record_size, key, payload, groups)?;
        trace!(address, key, record_size, "wrote new record");

        Ok(Written {
            address,
            in_place: false,
        })
    }

    /// Load the record at `address`
    pub fn load(&self, address: u64, mode: LoadMode) -> Result<Loaded> {
        let header = self.header_size();
        let mut head = [0u8; super::BASE_HEADER_SIZE + 4];
        let head = &mut head[..header];
        match self.file.read_exact_at(head, address) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Loaded::Dead),
            Err(e) => return Err(e.into()),
        }

        let mut cursor = &head[..];
        let opcode = cursor.get_u8();
        if opcode == DEAD_BYTE {
            return Ok(Loaded::Dead);
        }
        if opcode != OPCODE_NORMAL && opcode != OPCODE_DELETED {
            return Err(GenCacheError::Corruption(format!(
                "bad opcode 0x{:02X} at address {}",
                opcode, address
            )));
        }

        let record_size = cursor.get_i32();
        if record_size < header as i32 {
            return Err(GenCacheError::Corruption(format!(
                "record at address {} has impossible size {}",
                address, record_size
            )));
        }
        let record_size = record_size as u32;
        if opcode == OPCODE_DELETED {
            return Ok(Loaded::Deleted { record_size });
        }

        let key_len = cursor.get_i32();
        let payload_len = cursor.get_i32();
        let group_count = cursor.get_i32();
        let stored_checksum = if self.checksums { cursor.get_i32() } else { 0 };
        if key_len < 0 || payload_len < 0 || group_count < 0 {
            return Err(GenCacheError::Corruption(format!(
                "negative size field in record at address {}",
                address
            )));
        }

        let sizes = RecordSizes {
            record_size,
            key_len: key_len as u32,
            payload_len: payload_len as u32,
            group_count: group_count as u32,
            checksum: stored_checksum,
        };
        let meta_len = key_len as usize + group_count as usize * GROUP_SIZE;
        if (header + meta_len + payload_len as usize) as u64 > record_size as u64 {
            return Err(GenCacheError::Corruption(format!(
                "record at address {} overruns its slot",
                address
            )));
        }

        if mode == LoadMode::SizesOnly {
            return Ok(Loaded::Live(Record {
                sizes,
                key: None,
                groups: Vec::new(),
                payload: None,
            }));
        }

        let body_len = match mode {
            LoadMode::Full => meta_len + payload_len as usize,
            _ => meta_len,
        };
        let mut body = Vec::new();
        if body.try_reserve_exact(body_len).is_err() {
            warn!(address, size = body_len, "out of memory loading record, treating it as deleted");
            return Ok(Loaded::Deleted { record_size });
        }
        body.resize(body_len, 0);
        self.file
            .read_exact_at(&mut body, address + header as u64)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => GenCacheError::Corruption(format!(
                    "record at address {} runs past end of file",
                    address
                )),
                _ => GenCacheError::Io(e),
            })?;
        let body = Bytes::from(body);

        let key = std::str::from_utf8(&body[..key_len as usize])
            .map_err(|_| {
                GenCacheError::Corruption(format!("key at address {} is not UTF-8", address))
            })?
            .to_string();
        let mut tags = &body[key_len as usize..meta_len];
        let groups = (0..group_count).map(|_| tags.get_i64()).collect();

        let payload = if mode == LoadMode::Full {
            let payload = body.slice(meta_len..);
            if self.checksums {
                let actual = checksum(&payload);
                if actual != stored_checksum {
                    return Err(GenCacheError::ChecksumMismatch {
                        address,
                        expected: stored_checksum,
                        actual,
                    });
                }
            }
            Some(payload)
        } else {
            None
        };

        Ok(Loaded::Live(Record {
            sizes,
            key: Some(key),
            groups,
            payload,
        }))
    }

    /// Tombstone the record at `address` by rewriting its opcode
    pub fn mark_deleted(&self, address: u64) -> Result<()> {
        self.file.write_all_at(&[OPCODE_DELETED], address)?;
        Ok(())
    }

    fn write_at(
        &self,
        address: u64,
        record_size: u32,
        key: &str,
        payload: &[u8],
        groups: &[i64],
    ) -> Result<()> {
        let header = self.header_size();
        let payload_len =
            i32::try_from(payload.len()).map_err(|_| GenCacheError::TooLarge { size: payload.len() })?;

        let mut buf = BytesMut::with_capacity(header + key.len() + groups.len() * GROUP_SIZE + payload.len());
        buf.put_u8(OPCODE_NORMAL);
        buf.put_i32(record_size as i32);
        buf.put_i32(key.len() as i32);
        buf.put_i32(payload_len);
        buf.put_i32(groups.len() as i32);
        if self.checksums {
            buf.put_i32(checksum(payload));
        }
        buf.put_slice(key.as_bytes());
        for group in groups {
            buf.put_i64(*group);
        }
        buf.put_slice(payload);

        self.file.write_all_at(&buf, address)?;
        Ok(())
    }
}

//! Data file header

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{GenCacheError, Result};
use crate::file::BlockFile;

/// Format version written by this build
pub const DATA_FORMAT_VERSION: i32 = 11;

/// Bytes reserved at the start of every data file
pub const HEADER_SIZE: usize = 1024;

/// Fields stored at the start of a generation's data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub version: i32,
    /// Records in this file carry checksums
    pub checksums: bool,
    /// Epoch millis the generation was created
    pub creation: i64,
}

impl DataHeader {
    pub fn new(checksums: bool, creation: i64) -> Self {
        Self {
            version: DATA_FORMAT_VERSION,
            checksums,
            creation,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_i32(self.version);
        buf.put_u8(self.checksums as u8);
        buf.put_i64(self.creation);
        buf.resize(HEADER_SIZE, 0);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 + 1 + 8 {
            return Err(GenCacheError::Corruption("data file header is truncated".to_string()));
        }
        Ok(Self {
            version: buf.get_i32(),
            checksums: buf.get_u8() != 0,
            creation: buf.get_i64(),
        })
    }

    /// Allocate and write the header of a brand new data file
    pub fn write_to(&self, file: &BlockFile) -> Result<()> {
        let address = file.allocate(HEADER_SIZE as u64)?;
        if address != 0 {
            return Err(GenCacheError::Corruption(format!(
                "{} is not empty, cannot write a header",
                file.path().display()
            )));
        }
        file.write_all_at(&self.encode(), 0)?;
        Ok(())
    }

    /// Read and check the header of an existing data file
    pub fn read_from(file: &BlockFile, path: &Path) -> Result<Self> {
        if file.actual_size() < HEADER_SIZE as u64 {
            return Err(GenCacheError::Corruption(format!(
                "{} is too short to hold a header",
                path.display()
            )));
        }
        let mut buf = vec![0u8; HEADER_SIZE];
        file.read_exact_at(&mut buf, 0)?;
        let header = Self::decode(&buf)?;
        if header.version != DATA_FORMAT_VERSION {
            return Err(GenCacheError::OldFormat {
                path: path.to_path_buf(),
                version: header.version,
            });
        }
        Ok(header)
    }
}

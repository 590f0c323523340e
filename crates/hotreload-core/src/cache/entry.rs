//! Binary layout of one cache entry (all integers big-endian):
//!
//! ```text
//! [32B source hash][4B signature checksum][4B static-final checksum]
//! [2B dependency count]
//! [dependency count x ([2B name length][UTF-8 name][4B checksum])]
//! [4B bytecode length][bytecode]
//! ```

use std::io::{self, Read, Write};

use super::{CacheError, Result};
use crate::hash::{ContentHash, HASH_LEN};

/// A dependency's static-final checksum at store time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStamp {
    pub name: String,
    pub static_final_checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub source_hash: ContentHash,
    pub signature_checksum: u32,
    pub static_final_checksum: u32,
    pub dependencies: Vec<DependencyStamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub header: EntryHeader,
    pub bytecode: Vec<u8>,
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CacheError::corrupted(format!("truncated {}", what)),
        _ => CacheError::corrupted(format!("unreadable {}: {}", what, e)),
    })
}

fn read_u16<R: Read>(reader: &mut R, what: &str) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf, what)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_be_bytes(buf))
}

impl EntryHeader {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.source_hash.as_bytes())?;
        writer.write_all(&self.signature_checksum.to_be_bytes())?;
        writer.write_all(&self.static_final_checksum.to_be_bytes())?;
        writer.write_all(&(self.dependencies.len() as u16).to_be_bytes())?;
        for dep in &self.dependencies {
            writer.write_all(&(dep.name.len() as u16).to_be_bytes())?;
            writer.write_all(dep.name.as_bytes())?;
            writer.write_all(&dep.static_final_checksum.to_be_bytes())?;
        }
        Ok(())
    }

    /// Read only the header; the reader is left at the bytecode length
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut hash = [0u8; HASH_LEN];
        read_exact(reader, &mut hash, "source hash")?;
        let signature_checksum = read_u32(reader, "signature checksum")?;
        let static_final_checksum = read_u32(reader, "static-final checksum")?;

        let count = read_u16(reader, "dependency count")?;
        let mut dependencies = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_u16(reader, "dependency name length")?;
            let mut name = vec![0u8; len as usize];
            read_exact(reader, &mut name, "dependency name")?;
            let name = String::from_utf8(name)
                .map_err(|_| CacheError::corrupted("dependency name is not UTF-8"))?;
            let static_final_checksum = read_u32(reader, "dependency checksum")?;
            dependencies.push(DependencyStamp {
                name,
                static_final_checksum,
            });
        }

        Ok(Self {
            source_hash: ContentHash::from_raw(hash),
            signature_checksum,
            static_final_checksum,
            dependencies,
        })
    }

    fn check_limits(&self) -> Result<()> {
        if self.dependencies.len() > u16::MAX as usize {
            return Err(CacheError::TooLarge {
                what: format!("{} dependencies", self.dependencies.len()),
            });
        }
        if let Some(dep) = self
            .dependencies
            .iter()
            .find(|d| d.name.len() > u16::MAX as usize)
        {
            return Err(CacheError::TooLarge {
                what: format!("dependency name of {} bytes", dep.name.len()),
            });
        }
        Ok(())
    }
}

impl CacheEntry {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.header.check_limits()?;
        let len = u32::try_from(self.bytecode.len()).map_err(|_| CacheError::TooLarge {
            what: format!("bytecode of {} bytes", self.bytecode.len()),
        })?;

        let mut out = Vec::with_capacity(64 + self.bytecode.len());
        self.header
            .write_to(&mut out)
            .map_err(|e| CacheError::corrupted(e.to_string()))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.bytecode);
        Ok(out)
    }

    /// Decode a full entry; short reads and trailing bytes are corruption
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        let header = EntryHeader::read_from(&mut reader)?;
        let len = read_u32(&mut reader, "bytecode length")? as usize;
        if reader.len() != len {
            return Err(CacheError::corrupted(format!(
                "bytecode length {} but {} bytes remain",
                len,
                reader.len()
            )));
        }
        Ok(Self {
            header,
            bytecode: reader.to_vec(),
        })
    }
}

//! Whitespace/CSV edge lists.
//!
//! One edge per line, `src dst` or `src dst weight`, with `#`-prefixed
//! comment lines. The weighted and unweighted variants are distinct record
//! kinds so downstream consumers can tell them apart.

use super::{swizzle, BlockReader, Record, RecordStream};
use anyhow::Result;
use std::path::Path;

/// Record kinds produced by this parser.
pub mod kinds {
    pub const WEIGHT: u64 = 1;
    pub const NO_WEIGHT: u64 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    NoWeight,
    Weight,
}

/// Guess the variant from a data line: three or more fields means weighted.
pub fn sniff_file_type(line: &str) -> FileType {
    if line.split_whitespace().count() >= 3 {
        FileType::Weight
    } else {
        FileType::NoWeight
    }
}

pub struct Reader {
    block: BlockReader,
    file_type: FileType,
}

impl Reader {
    pub fn open(path: &Path, file_type: FileType, n_ranks: u32, rank: u32) -> Result<Self> {
        Ok(Self {
            block: BlockReader::new(path, n_ranks, rank, 0)?,
            file_type,
        })
    }
}

impl RecordStream for Reader {
    fn next(&mut self) -> Result<Option<Record>> {
        while self.block.read_line()? {
            if let Some(record) = parse_record(self.block.line(), self.file_type) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// Parse one edge line. Comments and malformed lines are skipped.
pub fn parse_record(line: &str, file_type: FileType) -> Option<Record> {
    if line.starts_with('#') {
        return None;
    }
    let mut fields = line.split(|c: char| c.is_whitespace() || c == ',').filter(|f| !f.is_empty());
    let k: u64 = fields.next()?.parse().ok()?;
    let b: u64 = fields.next()?.parse().ok()?;

    match file_type {
        FileType::NoWeight => Some(Record {
            k: swizzle(k),
            kind: kinds::NO_WEIGHT,
            b: swizzle(b),
            c: 0,
        }),
        FileType::Weight => {
            let c: u64 = fields.next()?.parse().ok()?;
            Some(Record {
                k: swizzle(k),
                kind: kinds::WEIGHT,
                b: swizzle(b),
                c,
            })
        }
    }
}

//! Matrix Market coordinate files.
//!
//! The banner and dimensions line are validated once per open; the ranks
//! then partition only the data region, so every rank skips the header for
//! free. Each data line is one edge, `row col [weight]`; malformed lines
//! yield no record and the stream keeps going.

use super::{swizzle, BlockReader, Record, RecordStream};
use anyhow::{bail, ensure, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub struct Reader {
    block: BlockReader,
    header: Header,
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    /// Byte offset where the coordinate data begins.
    data_start: u64,
    pub rows: u64,
    pub cols: u64,
    pub entries: u64,
}

impl Reader {
    pub fn open(path: &Path, n_ranks: u32, rank: u32) -> Result<Self> {
        let header = read_header(path)?;
        let block = BlockReader::new(path, n_ranks, rank, header.data_start)?;
        Ok(Self { block, header })
    }

    pub fn header(&self) -> Header {
        self.header
    }
}

impl RecordStream for Reader {
    fn next(&mut self) -> Result<Option<Record>> {
        while self.block.read_line()? {
            if let Some(record) = parse_record(self.block.line()) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// Parse one coordinate line. Comments and malformed lines are skipped.
pub fn parse_record(line: &str) -> Option<Record> {
    if line.starts_with('%') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let k: u64 = fields.next()?.parse().ok()?;
    let b: u64 = fields.next()?.parse().ok()?;
    Some(Record {
        k: swizzle(k),
        kind: 0,
        b: swizzle(b),
        c: 0,
    })
}

fn read_header(path: &Path) -> Result<Header> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut input = BufReader::new(file);
    let mut line = String::new();

    let mut read = input
        .read_line(&mut line)
        .with_context(|| format!("failed to read {}", path.display()))?;
    ensure!(
        line.starts_with("%%MatrixMarket"),
        "could not parse {} as an mmio file",
        path.display()
    );
    ensure!(
        line.split_whitespace().nth(2) == Some("coordinate"),
        "mmio reader only supports coordinate format ({})",
        path.display()
    );

    let mut data_start = read as u64;
    loop {
        line.clear();
        read = input
            .read_line(&mut line)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            bail!("mmio file {} missing its dimensions", path.display());
        }
        data_start += read as u64;
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let mut dimension = |name: &str| -> Result<u64> {
            fields
                .next()
                .and_then(|s| s.parse().ok())
                .with_context(|| format!("bad {name} in mmio header of {}", path.display()))
        };
        return Ok(Header {
            data_start,
            rows: dimension("row count")?,
            cols: dimension("column count")?,
            entries: dimension("entry count")?,
        });
    }
}

//! Record ingest.
//!
//! The pipeline consumes edge records through the [`RecordStream`] seam; the
//! concrete readers behind it parse Matrix Market coordinate files and
//! whitespace/CSV edge lists. Producers partition a file by byte blocks:
//! every rank gets `n_bytes / n_ranks` bytes (remainder spread over the
//! first ranks), and every rank but the first backs up one byte and skips
//! past the next line terminator, so a boundary landing exactly on a line
//! start is handed to exactly one rank.

pub mod edge_list;
pub mod mmio;

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A uniform record shared by all the parsers. `k` and `b` are the edge
/// endpoints, already swizzled; the remaining fields carry format-specific
/// payload that the index itself never reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Record {
    pub k: u64,
    pub kind: u64,
    pub b: u64,
    pub c: u64,
}

impl Record {
    /// The 128-bit index key: source endpoint in the high half, target in
    /// the low half.
    pub fn to_key(self) -> u128 {
        ((self.k as u128) << 64) | self.b as u128
    }
}

/// Reorder the bytes of an id so its low-order entropy lands in the high
/// bits. Input ids tend to be small integers, all zeros up top; the radix
/// trie partitions on most-significant bits first and would otherwise see
/// every key on one spine.
pub fn swizzle(x: u64) -> u64 {
    x.swap_bytes()
}

/// A stream of records from one rank's block of an input file.
pub trait RecordStream {
    fn next(&mut self) -> Result<Option<Record>>;
}

/// The input formats the binary understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Mmio,
    EdgeList(edge_list::FileType),
}

/// Sniff the format of `path` from its banner or first data line.
pub fn detect(path: &Path) -> Result<Format> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut input = BufReader::new(file);
    let mut line = String::new();
    loop {
        line.clear();
        let read = input
            .read_line(&mut line)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            return Ok(Format::EdgeList(edge_list::FileType::NoWeight));
        }
        if line.starts_with("%%MatrixMarket") {
            return Ok(Format::Mmio);
        }
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        return Ok(Format::EdgeList(edge_list::sniff_file_type(&line)));
    }
}

/// Open one rank's stream over `path` in the given format.
pub fn open(path: &Path, format: Format, n_ranks: u32, rank: u32) -> Result<Box<dyn RecordStream + Send>> {
    Ok(match format {
        Format::Mmio => Box::new(mmio::Reader::open(path, n_ranks, rank)?),
        Format::EdgeList(file_type) => {
            Box::new(edge_list::Reader::open(path, file_type, n_ranks, rank)?)
        }
    })
}

/// Block partitioning: `n_bytes / n_ranks` per rank, remainder to the first
/// ranks.
fn partition(n_bytes: u64, n_ranks: u64, rank: u64) -> (u64, u64) {
    let d = n_bytes / n_ranks;
    let r = n_bytes % n_ranks;
    let offset = if rank < r {
        (d + 1) * rank
    } else {
        (d + 1) * r + d * (rank - r)
    };
    let length = d + u64::from(rank < r);
    debug_assert!(offset + length <= n_bytes);
    (offset, length)
}

/// Line-oriented reader over one rank's byte block.
pub(crate) struct BlockReader {
    input: BufReader<File>,
    line: String,
    remaining: u64,
    path: PathBuf,
}

impl BlockReader {
    /// `data_start` is where the partitionable region begins — past any
    /// header that every rank must skip.
    pub(crate) fn new(path: &Path, n_ranks: u32, rank: u32, data_start: u64) -> Result<Self> {
        assert!(rank < n_ranks);

        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let n_bytes = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        if n_bytes < data_start {
            bail!("{} is shorter than its header", path.display());
        }

        let (mut offset, mut length) = partition(n_bytes - data_start, n_ranks as u64, rank as u64);

        // Rank 0 starts exactly at the data; everyone else backs up one byte
        // and resynchronizes past the next newline, which also covers a
        // boundary that falls exactly on a line start.
        let resync = rank != 0 && offset > 0;
        if resync {
            offset -= 1;
            length += 1;
        }

        let mut input = BufReader::new(file);
        input
            .seek(SeekFrom::Start(data_start + offset))
            .with_context(|| format!("failed to seek {} to offset {offset}", path.display()))?;

        let mut reader = Self {
            input,
            line: String::new(),
            remaining: length,
            path: path.to_owned(),
        };
        if resync {
            reader.read_line()?;
        }
        Ok(reader)
    }

    /// Read the next line of the block into the internal buffer. A line that
    /// straddles the block's end still belongs to this rank.
    pub(crate) fn read_line(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        self.line.clear();
        let read = self
            .input
            .read_line(&mut self.line)
            .with_context(|| format!("read failed on {}", self.path.display()))?;
        if read == 0 {
            return Ok(false);
        }
        self.remaining = self.remaining.saturating_sub(read as u64);
        Ok(true)
    }

    pub(crate) fn line(&self) -> &str {
        &self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partition_is_exact_and_contiguous() {
        for n_bytes in [0u64, 1, 7, 100, 101, 1024] {
            for n_ranks in [1u64, 2, 3, 7, 32] {
                let mut expected_offset = 0;
                for rank in 0..n_ranks {
                    let (offset, length) = partition(n_bytes, n_ranks, rank);
                    assert_eq!(offset, expected_offset);
                    expected_offset += length;
                }
                assert_eq!(expected_offset, n_bytes);
            }
        }
    }

    #[test]
    fn ranks_split_lines_without_loss_or_overlap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let lines: Vec<String> = (0..100).map(|i| format!("line-{i:04}")).collect();
        for line in &lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();

        for n_ranks in [1u32, 2, 3, 7, 13] {
            let mut seen = Vec::new();
            for rank in 0..n_ranks {
                let mut reader = BlockReader::new(file.path(), n_ranks, rank, 0).unwrap();
                while reader.read_line().unwrap() {
                    seen.push(reader.line().trim_end().to_string());
                }
            }
            assert_eq!(seen, lines, "with {n_ranks} ranks");
        }
    }

    #[test]
    fn a_boundary_on_a_line_start_is_not_read_twice() {
        // Four 8-byte lines; two ranks split at byte 16, exactly a line
        // start. Rank 1 must back up, discard the tail of rank 0's last
        // line, and still read both of its own lines.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "aaaaaaa\nbbbbbbb\nccccccc\nddddddd\n").unwrap();
        file.flush().unwrap();

        let mut first = Vec::new();
        let mut reader = BlockReader::new(file.path(), 2, 0, 0).unwrap();
        while reader.read_line().unwrap() {
            first.push(reader.line().trim_end().to_string());
        }
        let mut second = Vec::new();
        let mut reader = BlockReader::new(file.path(), 2, 1, 0).unwrap();
        while reader.read_line().unwrap() {
            second.push(reader.line().trim_end().to_string());
        }

        assert_eq!(first, ["aaaaaaa", "bbbbbbb"]);
        assert_eq!(second, ["ccccccc", "ddddddd"]);
    }

    #[test]
    fn header_bytes_stay_out_of_every_block() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "HEADER\n1 2\n3 4\n").unwrap();
        file.flush().unwrap();

        let mut reader = BlockReader::new(file.path(), 1, 0, 7).unwrap();
        assert!(reader.read_line().unwrap());
        assert_eq!(reader.line(), "1 2\n");
        assert!(reader.read_line().unwrap());
        assert_eq!(reader.line(), "3 4\n");
        assert!(!reader.read_line().unwrap());
    }

    #[test]
    fn swizzle_moves_low_entropy_up() {
        assert_eq!(swizzle(1), 1 << 56);
        assert_eq!(swizzle(swizzle(42)), 42);
    }

    #[test]
    fn record_key_packs_source_high() {
        let record = Record {
            k: 0xaa,
            b: 0xbb,
            ..Record::default()
        };
        assert_eq!(record.to_key(), (0xaa_u128 << 64) | 0xbb);
    }
}

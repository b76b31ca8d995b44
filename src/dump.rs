//! Debug dumps of the finished index.

use crate::pipeline::Index;
use std::io::{self, Write};

/// One line per routing entry: `{data:032x}/{size} {service}`.
pub fn write_table(index: &Index, out: &mut impl Write) -> io::Result<()> {
    let mut entries = Vec::new();
    index
        .table
        .for_each_owner(|key, service| entries.push((key, service)));
    for (key, service) in entries {
        writeln!(out, "{:032x}/{} {}", key.data(), key.size(), service)?;
    }
    Ok(())
}

/// Glob inventory as TSV: `service\tid\tsize\towner`, one row per concrete
/// node, ids assigned in preorder within each service.
pub fn write_globs(index: &Index, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "service\tid\tsize\towner")?;
    for (service, trie) in index.tries.iter().enumerate() {
        let mut rows = Vec::new();
        let mut id = 0u64;
        trie.for_each(&mut |node| {
            if let Some(glob) = node.glob() {
                rows.push((id, glob.len(), index.table.owner(node.key())));
                id += 1;
            }
        });
        for (id, size, owner) in rows {
            writeln!(out, "{service}\t{id}\t{size}\t{owner}")?;
        }
    }
    Ok(())
}

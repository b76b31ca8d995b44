//! A service: one writer's slice of the index.
//!
//! Each service owns a glob trie and consults the shared routing table when
//! the trie ejects a glob. An ejection whose prefix still maps here is
//! grafted straight back; one that maps elsewhere is published in the
//! routing table and its keys handed to the caller for bubble routing.

use crate::config::Config;
use crate::key::Key;
use crate::route::TopLevelTree;
use crate::trie::GlobTrieNode;

pub struct Service<'t> {
    tlt: &'t TopLevelTree,
    globs: GlobTrieNode,
    id: u32,
}

impl<'t> Service<'t> {
    pub fn new(id: u32, tlt: &'t TopLevelTree) -> Self {
        Self {
            tlt,
            globs: GlobTrieNode::new(Key::default()),
            id,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Insert a key this service owns. `Err` returns the keys of a glob
    /// whose prefix now belongs to another service; the routing table has
    /// already been updated and the caller must forward them.
    pub fn insert(&mut self, key: u128, config: &Config) -> Result<bool, Vec<u128>> {
        match self.globs.insert(key, config) {
            Ok(inserted) => Ok(inserted),
            Err(mut ejected) => {
                if self.tlt.owner(ejected.key) == self.id {
                    self.globs.reinsert(ejected);
                    return Ok(true);
                }
                self.tlt.insert(ejected.key);
                Err(ejected.glob.take_all())
            }
        }
    }

    pub fn contains(&self, key: u128) -> bool {
        self.globs.find(key)
    }

    pub fn globs(&self) -> &GlobTrieNode {
        &self.globs
    }

    /// Detach the trie, e.g. to hand the finished index back across a
    /// thread boundary.
    pub fn into_globs(self) -> GlobTrieNode {
        self.globs
    }
}

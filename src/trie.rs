//! The per-service glob trie.
//!
//! A binary radix trie whose nodes hold globs. *Concrete* nodes carry a
//! glob; *synthetic* nodes exist only to dominate two subtrees. Each node's
//! key is a strict prefix of its children's keys, and siblings are always
//! incomparable, sorted by [`less`]. Insertion lands in the deepest concrete
//! node whose key covers the new key; a full glob either splits locally —
//! grafting the shed subrange as a new child — or, past the configured
//! bubble depth, ejects the subrange for another service to adopt.
//!
//! The trie has a single writer, so nothing here synchronizes. The
//! concurrent counterpart used for routing lives in [`crate::route`].

use crate::config::Config;
use crate::glob::Glob;
use crate::key::{less, Key};
use crate::radix::Split;

pub struct GlobTrieNode {
    key: Key,
    glob: Option<Glob>,
    child: [Option<Box<GlobTrieNode>>; 2],
}

/// A glob shed past the bubble threshold, together with the prefix that
/// bounds it. The service that owns the trie decides whether it stays local
/// or travels.
#[derive(Debug)]
pub struct Ejected {
    pub key: Key,
    pub glob: Glob,
}

/// Outcome of a descent below one node.
enum Descent {
    Done(bool),
    Ejected(Ejected),
    /// No concrete node at or below the descent path could take the key.
    NoHome,
}

impl GlobTrieNode {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            glob: None,
            child: [None, None],
        }
    }

    pub fn with_glob(key: Key, glob: Glob) -> Self {
        Self {
            key,
            glob: Some(glob),
            child: [None, None],
        }
    }

    /// A synthetic node dominating both arguments, keyed by their longest
    /// common prefix.
    fn dominator(a: Box<GlobTrieNode>, b: Box<GlobTrieNode>) -> Box<GlobTrieNode> {
        let mut node = Box::new(GlobTrieNode {
            key: a.key ^ b.key,
            glob: None,
            child: [Some(a), Some(b)],
        });
        node.canonicalize();
        node.validate();
        node
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn glob(&self) -> Option<&Glob> {
        self.glob.as_ref()
    }

    pub fn is_concrete(&self) -> bool {
        self.glob.is_some()
    }

    /// Membership: descend to the deepest concrete node covering `key` and
    /// scan its glob.
    pub fn find(&self, key: u128) -> bool {
        self.find_from(key, None)
    }

    fn find_from(&self, key: u128, best: Option<&Glob>) -> bool {
        debug_assert!(self.key.covers(key));

        let best = self.glob.as_ref().or(best);

        if let Some(child) = &self.child[1] {
            if child.key.covers(key) {
                return child.find_from(key, best);
            }
        }
        if let Some(child) = &self.child[0] {
            if child.key.covers(key) {
                return child.find_from(key, best);
            }
        }

        best.is_some_and(|glob| glob.contains(key))
    }

    /// Insert a key. `Err` carries a glob that must leave this trie.
    pub fn insert(&mut self, key: u128, config: &Config) -> Result<bool, Ejected> {
        match self.insert_below(key, config) {
            Descent::Done(inserted) => Ok(inserted),
            Descent::Ejected(ejected) => Err(ejected),
            // No concrete node anywhere on the path: upgrade the node the
            // descent ended on.
            Descent::NoHome => {
                self.upgrade(key, config);
                Ok(true)
            }
        }
    }

    fn insert_below(&mut self, key: u128, config: &Config) -> Descent {
        debug_assert!(self.key.covers(key));

        for i in [1, 0] {
            if self.child[i].as_ref().is_some_and(|c| c.key.covers(key)) {
                let below = self.child[i].as_mut().unwrap().insert_below(key, config);
                return match below {
                    // The deepest concrete ancestor adopts the key.
                    Descent::NoHome if self.glob.is_some() => self.insert_here(key, config),
                    other => other,
                };
            }
        }

        if self.glob.is_some() {
            self.insert_here(key, config)
        } else {
            Descent::NoHome
        }
    }

    /// Re-descend to where an insertion bottomed out with no concrete
    /// ancestor and make that node concrete.
    fn upgrade(&mut self, key: u128, config: &Config) {
        for i in [1, 0] {
            if self.child[i].as_ref().is_some_and(|c| c.key.covers(key)) {
                return self.child[i].as_mut().unwrap().upgrade(key, config);
            }
        }
        debug_assert!(self.glob.is_none());
        let glob = self.glob.insert(Glob::new(config.glob_capacity));
        let inserted = glob.insert(key);
        debug_assert!(inserted);
    }

    fn insert_here(&mut self, key: u128, config: &Config) -> Descent {
        let glob = self.glob.as_mut().expect("insert on a synthetic node");

        if glob.insert(key) {
            return Descent::Done(true);
        }

        // Deep prefixes stop splitting locally and eject instead; the
        // service decides where the shed glob lands.
        if config.bubble <= self.key.size() {
            let Split { range, key: eject_key } = glob.split_point(config.global_fit, self.key);
            let mut shed = glob.extract(range);
            if eject_key.covers(key) {
                if !shed.insert(key) {
                    panic!("bubbled glob has no room for key {key:#034x} at {eject_key}");
                }
            } else if !self.glob.as_mut().unwrap().insert(key) {
                panic!("bubbled glob did not make room for key {key:#034x} at {}", self.key);
            }
            return Descent::Ejected(Ejected {
                key: eject_key,
                glob: shed,
            });
        }

        // Local split: shed a subrange into a new child below this node.
        let Split { mut range, key: mut fit } = glob.split_point(config.local_fit, self.key);
        assert!(range.len() < glob.len(), "failed to split glob at {}", self.key);

        if self.key.size() < config.factor && config.factor <= fit.size() {
            range = self.glob.as_mut().unwrap().factor(&mut fit, config.factor);
            if config.debug {
                assert!(range.len() != self.glob.as_ref().unwrap().len());
            }
        }

        let shed = self.glob.as_mut().unwrap().extract(range);
        self.graft(fit, shed);

        // Restart from here; the glob now has room.
        self.insert_below(key, config)
    }

    /// Reinsert a glob that was ejected during bubbling and stayed local.
    /// Does not bubble in turn.
    pub fn reinsert(&mut self, ejected: Ejected) {
        self.graft(ejected.key, ejected.glob);
    }

    /// Place a `(key, glob)` pair below this node, creating a dominator
    /// where needed.
    fn graft(&mut self, key: Key, glob: Glob) {
        debug_assert!(self.key <= key);
        debug_assert!(!glob.is_empty());

        // case 0: the key lands exactly here; a synthetic node upgrades
        if self.key == key {
            assert!(self.glob.is_none(), "concrete upgrade on the wrong key {key}");
            self.glob = Some(glob);
            return;
        }

        // case 1/2: the key belongs below a child, recurse
        for i in [1, 0] {
            if self.child[i].as_ref().is_some_and(|c| c.key <= key) {
                return self.child[i].as_mut().unwrap().graft(key, glob);
            }
        }

        let mut node = Box::new(GlobTrieNode::with_glob(key, glob));

        // if the node dominates either or both children, move them under it
        for i in [0, 1] {
            if self.child[i].as_ref().is_some_and(|c| key < c.key) {
                node.child[i] = self.child[i].take();
            }
        }
        node.canonicalize();
        node.validate();

        // case 3: child[0] is now empty
        if self.child[0].is_none() {
            self.child[0] = Some(node);
        }
        // case 4: child[1] is now empty
        else if self.child[1].is_none() {
            self.child[1] = Some(node);
        }
        // case 5: two children; combine the closest pair under a dominator
        else {
            let c0 = self.child[0].as_ref().unwrap().key;
            let c1 = self.child[1].as_ref().unwrap().key;
            let a = (c0 ^ c1).size();
            let b = (c0 ^ key).size();
            let c = (key ^ c1).size();

            if a < b && b < c {
                let old = self.child[1].take().unwrap();
                self.child[1] = Some(GlobTrieNode::dominator(node, old));
            } else if a < b {
                let old = self.child[0].take().unwrap();
                self.child[0] = Some(GlobTrieNode::dominator(node, old));
            } else if a < c {
                let old = self.child[1].take().unwrap();
                self.child[1] = Some(GlobTrieNode::dominator(node, old));
            } else {
                let c0 = self.child[0].take().unwrap();
                let c1 = self.child[1].take().unwrap();
                self.child[0] = Some(GlobTrieNode::dominator(c0, c1));
                self.child[1] = Some(node);
            }
        }

        self.canonicalize();
        self.validate();
        if cfg!(debug_assertions) {
            for child in self.child.iter().flatten() {
                child.validate();
            }
        }
    }

    fn canonicalize(&mut self) {
        if self.child[0].is_none() {
            self.child[0] = self.child[1].take();
            return;
        }
        if self.child[1].is_none() {
            return;
        }
        let c0 = self.child[0].as_ref().unwrap().key;
        let c1 = self.child[1].as_ref().unwrap().key;
        if !less(c0, c1) {
            self.child.swap(0, 1);
        }
    }

    fn validate(&self) {
        if let Some(c1) = &self.child[1] {
            debug_assert!(self.child[0].is_some());
            debug_assert!(self.key < c1.key);
        }
        if let Some(c0) = &self.child[0] {
            debug_assert!(self.key < c0.key);
        }
        if let (Some(c0), Some(c1)) = (&self.child[0], &self.child[1]) {
            debug_assert!(c0.key.partial_cmp(&c1.key).is_none());
            debug_assert!(less(c0.key, c1.key));
        }
    }

    /// Preorder traversal over every node.
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a GlobTrieNode)) {
        f(self);
        if let Some(child) = &self.child[0] {
            child.for_each(f);
        }
        if let Some(child) = &self.child[1] {
            child.for_each(f);
        }
    }
}

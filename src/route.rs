//! The shared routing table.
//!
//! One lock-free trie, rooted at the empty prefix, maps every key prefix to
//! the service that owns it. Construction seeds one entry per service so
//! that every concrete key has an owner from the start; services publish
//! finer prefixes as their globs eject.

pub mod node;

use crate::key::Key;
use node::RouteNode;

// Guards are part of the node API; spare callers a separate dependency.
pub use crossbeam_epoch as epoch;

pub struct TopLevelTree {
    root: RouteNode<u32>,
    n_services: u32,
    service_bits: u32,
}

impl TopLevelTree {
    /// Seed a balanced assignment of the prefix space: service `i` initially
    /// owns the `service_bits`-wide prefix holding `i`'s bits.
    pub fn new(n_services: u32) -> Self {
        assert!(n_services >= 1);
        let service_bits = n_services.next_power_of_two().trailing_zeros();
        let tree = Self {
            root: RouteNode::new(Key::default()),
            n_services,
            service_bits,
        };

        let guard = &epoch::pin();
        for i in 0..n_services {
            let data = (i as u128).rotate_right(tree.service_bits);
            let key = Key::new(data, tree.service_bits);
            let service = tree.close_mapping(key);
            debug_assert_eq!(service, i);
            tree.root.insert_or_update(key, service, guard);
        }
        tree
    }

    pub fn n_services(&self) -> u32 {
        self.n_services
    }

    pub fn service_bits(&self) -> u32 {
        self.service_bits
    }

    pub fn try_lookup(&self, key: u128) -> Option<u32> {
        let guard = &epoch::pin();
        self.root
            .find(key, guard)
            .and_then(|node| node.value(guard).copied())
    }

    /// The service owning `key`. The seeded root covers the whole key space,
    /// so a miss means the table is broken.
    pub fn lookup(&self, key: u128) -> u32 {
        self.try_lookup(key)
            .unwrap_or_else(|| panic!("no owner for key {key:#034x}; the seeded cover is broken"))
    }

    /// Publish ownership of a prefix according to the close mapping and
    /// return the owner.
    pub fn insert(&self, key: Key) -> u32 {
        let service = self.close_mapping(key);
        let guard = &epoch::pin();
        self.root.insert_or_update(key, service, guard);
        service
    }

    /// Where the close mapping sends `key`, without publishing anything.
    pub fn owner(&self, key: Key) -> u32 {
        self.close_mapping(key)
    }

    /// Visit every published `(prefix, service)` entry in preorder.
    pub fn for_each_owner(&self, mut f: impl FnMut(Key, u32)) {
        let guard = &epoch::pin();
        self.root.for_each(guard, &mut |node| {
            if let Some(service) = node.value(guard) {
                f(node.key(), *service);
            }
        });
    }

    /// The close mapping: the source half of the prefix picks a "source"
    /// service from its top bits, the target half picks a "target" service
    /// in bit-reversed space, and the prefix depth beyond the source half
    /// decides how many low bits of the assignment the target contributes.
    /// Deeper prefixes blend more target identity in, which keeps related
    /// edges together while spreading load.
    fn close_mapping(&self, key: Key) -> u32 {
        let s = self.source_service(key.source()) as u32;
        let t = self.reversed_target_service(key.target()) as u32;

        let level = key.size().saturating_sub(64);
        let mask = (!0u32).checked_shl(level).unwrap_or(0);

        let service = (mask & s) | (!mask & t);
        assert!(
            service < self.n_services,
            "close mapping sent {key} to service {service} of {}",
            self.n_services
        );
        service
    }

    fn mask_service(&self, x: u64) -> u64 {
        if self.service_bits == 0 {
            return 0;
        }
        x & (!0u64 << (64 - self.service_bits))
    }

    fn source_service(&self, source: u64) -> u64 {
        self.mask_service(source).rotate_left(self.service_bits)
    }

    fn reversed_target_service(&self, target: u64) -> u64 {
        self.mask_service(target).reverse_bits()
    }
}

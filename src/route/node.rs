//! Lock-free trie nodes.
//!
//! The routing trie shares the glob trie's shape — a key, an optional
//! value, two incomparable children — but every thread may publish into it.
//! Both mutable fields are epoch-managed pointers: the value cell is
//! replaced by swap, and the child pair lives in an immutable heap block
//! that is republished wholesale by a single CAS. Readers therefore never
//! observe a half-updated pair, and a replaced block is retired through the
//! epoch collector once no reader can still hold it.
//!
//! Nodes are append-only: once a node is published it stays reachable until
//! the tree is dropped. Nodes built speculatively for a CAS that loses the
//! race were never visible to anyone; they are detached from their children
//! and freed on the spot.

use crate::key::{less, Key};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};

pub struct RouteNode<V> {
    key: Key,
    value: Atomic<V>,
    child: Atomic<Pair<V>>,
}

/// An immutable pair of owning child pointers. Canonical form: a lone child
/// sits in slot 0; two children are sorted by [`less`].
struct Pair<V> {
    slot: [*const RouteNode<V>; 2],
}

unsafe impl<V: Send + Sync> Send for Pair<V> {}
unsafe impl<V: Send + Sync> Sync for Pair<V> {}

impl<V> Default for Pair<V> {
    fn default() -> Self {
        Self {
            slot: [std::ptr::null(), std::ptr::null()],
        }
    }
}

impl<V> Pair<V> {
    fn is_empty(&self) -> bool {
        self.slot[0].is_null() && self.slot[1].is_null()
    }

    /// # Safety
    /// The slot must hold either null or a node that outlives `'g`.
    unsafe fn get<'g>(&self, i: usize) -> Option<&'g RouteNode<V>> {
        unsafe { self.slot[i].as_ref() }
    }

    fn canonicalize(&mut self) {
        if self.slot[0].is_null() {
            self.slot.swap(0, 1);
            return;
        }
        if self.slot[1].is_null() {
            return;
        }
        unsafe {
            if less((*self.slot[1]).key, (*self.slot[0]).key) {
                self.slot.swap(0, 1);
            }
        }
    }

    fn validate(&self, key: Key) {
        if !cfg!(debug_assertions) {
            return;
        }
        unsafe {
            if let Some(c1) = self.slot[1].as_ref() {
                debug_assert!(!self.slot[0].is_null());
                debug_assert!(key < c1.key);
            }
            if let Some(c0) = self.slot[0].as_ref() {
                debug_assert!(key < c0.key);
            }
            if let (Some(c0), Some(c1)) = (self.slot[0].as_ref(), self.slot[1].as_ref()) {
                debug_assert!(c0.key.partial_cmp(&c1.key).is_none());
                debug_assert!(less(c0.key, c1.key));
            }
        }
    }
}

impl<V> RouteNode<V> {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            value: Atomic::null(),
            child: Atomic::null(),
        }
    }

    pub fn with_value(key: Key, value: V) -> Self {
        Self {
            key,
            value: Atomic::new(value),
            child: Atomic::null(),
        }
    }

    /// A synthetic dominator over two published (or about-to-be-published)
    /// nodes. The pair block is stored before the node becomes reachable, so
    /// the relaxed store cannot be observed early.
    unsafe fn dominator(a: *const RouteNode<V>, b: *const RouteNode<V>) -> *mut RouteNode<V> {
        let key = unsafe { (*a).key ^ (*b).key };
        let node = Box::into_raw(Box::new(RouteNode::new(key)));
        let mut pair = Pair { slot: [a, b] };
        pair.canonicalize();
        pair.validate(key);
        unsafe {
            (*node).child.store(Owned::new(pair), Relaxed);
        }
        node
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn has_value(&self, guard: &Guard) -> bool {
        !self.value.load(Acquire, guard).is_null()
    }

    pub fn value<'g>(&'g self, guard: &'g Guard) -> Option<&'g V> {
        let value = self.value.load(Acquire, guard);
        unsafe { value.as_ref() }
    }

    pub fn child<'g>(&'g self, i: usize, guard: &'g Guard) -> Option<&'g RouteNode<V>> {
        let pair = self.child.load(Acquire, guard);
        unsafe { pair.as_ref().and_then(|pair| pair.get(i)) }
    }

    /// Wait-free descent to the deepest node covering `key` that carries a
    /// value.
    pub fn find<'g>(&'g self, key: u128, guard: &'g Guard) -> Option<&'g RouteNode<V>> {
        self.find_from(key, None, guard)
    }

    fn find_from<'g>(
        &'g self,
        key: u128,
        best: Option<&'g RouteNode<V>>,
        guard: &'g Guard,
    ) -> Option<&'g RouteNode<V>> {
        debug_assert!(self.key.covers(key));

        let best = if self.has_value(guard) { Some(self) } else { best };

        let pair = self.child.load(Acquire, guard);
        if let Some(pair) = unsafe { pair.as_ref() } {
            for i in [0, 1] {
                if let Some(child) = unsafe { pair.get(i) } {
                    if child.key.covers(key) {
                        return child.find_from(key, best, guard);
                    }
                }
            }
        }

        best
    }

    /// Publish `value` at `key`, creating the node (and a dominator, if the
    /// graft needs one) on the way. Returns a reference to the published
    /// value.
    pub fn insert_or_update<'g>(&'g self, key: Key, value: V, guard: &'g Guard) -> &'g V {
        debug_assert!(self.key <= key);

        if key == self.key {
            return self.replace_value(value, guard);
        }

        let observed = self.child.load(Acquire, guard);
        if let Some(pair) = unsafe { observed.as_ref() } {
            for i in [0, 1] {
                if let Some(child) = unsafe { pair.get(i) } {
                    if child.key <= key {
                        return child.insert_or_update(key, value, guard);
                    }
                }
            }
        }

        self.insert_child(observed, key, value, guard)
    }

    fn replace_value<'g>(&'g self, value: V, guard: &'g Guard) -> &'g V {
        let new = Owned::new(value).into_shared(guard);
        let old = self.value.swap(new, AcqRel, guard);
        if !old.is_null() {
            unsafe { guard.defer_destroy(old) };
        }
        unsafe { new.deref() }
    }

    fn insert_child<'g>(
        &'g self,
        observed: Shared<'g, Pair<V>>,
        key: Key,
        value: V,
        guard: &'g Guard,
    ) -> &'g V {
        let node = Box::into_raw(Box::new(RouteNode::with_value(key, value)));

        let (mut c0, mut c1) = match unsafe { observed.as_ref() } {
            Some(pair) => (pair.slot[0], pair.slot[1]),
            None => (std::ptr::null(), std::ptr::null()),
        };

        // if the node dominates either or both children, move them under it
        let mut stolen = Pair::default();
        unsafe {
            if !c0.is_null() && key < (*c0).key {
                stolen.slot[0] = c0;
                c0 = std::ptr::null();
            }
            if !c1.is_null() && key < (*c1).key {
                stolen.slot[1] = c1;
                c1 = std::ptr::null();
            }
            if !stolen.is_empty() {
                stolen.canonicalize();
                stolen.validate(key);
                (*node).child.store(Owned::new(stolen), Relaxed);
            }
        }

        // Assemble the proposed pair; `transient` is the dominator we may
        // also have to unwind on a lost race.
        let mut transient: *mut RouteNode<V> = std::ptr::null_mut();
        let proposed = unsafe {
            if c0.is_null() {
                Pair { slot: [node as *const _, c1] }
            } else if c1.is_null() {
                Pair { slot: [c0, node as *const _] }
            } else {
                let a = ((*c0).key ^ (*c1).key).size();
                let b = ((*c0).key ^ key).size();
                let c = (key ^ (*c1).key).size();

                if a < b && b < c {
                    transient = Self::dominator(node, c1);
                    Pair { slot: [c0, transient] }
                } else if a < b {
                    transient = Self::dominator(node, c0);
                    Pair { slot: [transient, c1] }
                } else if a < c {
                    transient = Self::dominator(node, c1);
                    Pair { slot: [c0, transient] }
                } else {
                    transient = Self::dominator(c0, c1);
                    Pair { slot: [transient, node] }
                }
            }
        };

        let mut proposed = proposed;
        proposed.canonicalize();
        proposed.validate(self.key);

        match self
            .child
            .compare_exchange(observed, Owned::new(proposed), AcqRel, Acquire, guard)
        {
            Ok(_) => {
                if !observed.is_null() {
                    // The old block is unreachable now; no new reader can
                    // load it, so retire it.
                    unsafe { guard.defer_destroy(observed) };
                }
                unsafe { (*node).value.load(Relaxed, guard).deref() }
            }
            Err(race) => {
                // Lost the race: free everything we built, recover the
                // value, and retry against the new state.
                drop(race.new);
                let value = unsafe {
                    let recovered = (*node).value.swap(Shared::null(), Relaxed, guard);
                    let value = *recovered.into_owned().into_box();
                    if !transient.is_null() {
                        Self::discard_transient(transient);
                    }
                    Self::discard_transient(node);
                    value
                };
                self.insert_or_update(key, value, guard)
            }
        }
    }

    /// Free an unpublished node without walking into the published children
    /// its pair block may reference.
    unsafe fn discard_transient(node: *mut RouteNode<V>) {
        unsafe {
            let guard = epoch::unprotected();
            let pair = (*node).child.swap(Shared::null(), Relaxed, guard);
            if !pair.is_null() {
                drop(pair.into_owned());
            }
            drop(Box::from_raw(node));
        }
    }

    /// Preorder traversal. Visits the tree as published at the time each
    /// pair is loaded.
    pub fn for_each<'g>(&'g self, guard: &'g Guard, f: &mut impl FnMut(&'g RouteNode<V>)) {
        f(self);
        for i in [0, 1] {
            if let Some(child) = self.child(i, guard) {
                child.for_each(guard, f);
            }
        }
    }
}

impl<V> Drop for RouteNode<V> {
    fn drop(&mut self) {
        // Exclusive access: the tree is gone, nobody is pinned inside it.
        unsafe {
            let guard = epoch::unprotected();
            let value = self.value.load(Relaxed, guard);
            if !value.is_null() {
                drop(value.into_owned());
            }
            let pair = self.child.load(Relaxed, guard);
            if !pair.is_null() {
                for i in [0, 1] {
                    let child = pair.deref().slot[i];
                    if !child.is_null() {
                        drop(Box::from_raw(child as *mut RouteNode<V>));
                    }
                }
                drop(pair.into_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        s.parse().unwrap()
    }

    #[test]
    fn sequential_inserts_build_a_canonical_pair() {
        let guard = &epoch::pin();
        let root = RouteNode::new(key("0/0"));
        assert!(root.child(0, guard).is_none());
        assert!(root.child(1, guard).is_none());

        let one = *root.insert_or_update(key("1/128"), 1u32, guard);
        assert_eq!(one, 1);
        let found = root.find(key("1/128").data(), guard).unwrap();
        assert_eq!(found.value(guard), Some(&1));
        assert!(std::ptr::eq(found, root.child(0, guard).unwrap()));
        assert!(root.child(1, guard).is_none());

        let forty_two = *root.insert_or_update(key("0/128"), 42u32, guard);
        assert_eq!(forty_two, 42);
        let zero = root.find(key("0/128").data(), guard).unwrap();
        let one = root.find(key("1/128").data(), guard).unwrap();
        assert!(std::ptr::eq(zero, root.child(0, guard).unwrap()));
        assert!(std::ptr::eq(one, root.child(1, guard).unwrap()));
        assert_eq!(zero.value(guard), Some(&42));
        assert_eq!(one.value(guard), Some(&1));
        assert!(zero.child(0, guard).is_none());
        assert!(one.child(0, guard).is_none());
    }

    #[test]
    fn update_swaps_the_value_in_place() {
        let guard = &epoch::pin();
        let root = RouteNode::new(key("0/0"));
        root.insert_or_update(key("f/4"), 1u32, guard);
        root.insert_or_update(key("f/4"), 2u32, guard);
        let node = root.find(u128::MAX, guard).unwrap();
        assert_eq!(node.value(guard), Some(&2));
    }

    #[test]
    fn dominators_appear_where_prefixes_meet() {
        let guard = &epoch::pin();
        let root = RouteNode::new(key("0/0"));
        root.insert_or_update(key("8/4"), 8u32, guard);
        root.insert_or_update(key("9/4"), 9u32, guard);
        root.insert_or_update(key("1/4"), 1u32, guard);

        // 8/4 and 9/4 share the 1000/1001 prefix 100/3; 1/4 hangs alone.
        let dom = root
            .child(1, guard)
            .expect("the 8/9 pair should sit under a dominator");
        assert_eq!(dom.key(), key("4/3"));
        assert!(!dom.has_value(guard));
        assert_eq!(root.child(0, guard).unwrap().key(), key("1/4"));

        for (k, v) in [(key("8/4"), 8u32), (key("9/4"), 9), (key("1/4"), 1)] {
            assert_eq!(root.find(k.data(), guard).unwrap().value(guard), Some(&v));
        }
    }

    #[test]
    fn values_under_a_prefix_fall_back_to_it() {
        let guard = &epoch::pin();
        let root = RouteNode::new(key("0/0"));
        root.insert_or_update(key("0/1"), 7u32, guard);
        // Any key with a clear top bit resolves to the 0/1 entry.
        assert_eq!(root.find(3, guard).unwrap().value(guard), Some(&7));
        // Keys with the top bit set have no covering value.
        assert!(root.find(u128::MAX, guard).is_none());
    }
}

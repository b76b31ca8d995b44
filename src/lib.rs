//! # globtrie
//!
//! A partitioned in-memory index over an unbounded stream of 128-bit edge
//! keys. Keys are sharded across a pool of single-writer *services*, each
//! holding a radix trie of *globs* — small bounded key sets — while a shared
//! lock-free routing trie maps every key prefix to the service that
//! currently owns it. The partitioning starts as a fixed hash of the key
//! and adapts as keys accumulate: a full glob splits below its node, and a
//! subrange whose prefix maps elsewhere migrates through the bubble queue
//! to its new owner.
//!
//! The crate splits into the key algebra ([`key`]), the containers
//! ([`glob`], [`radix`]), the two tries ([`trie`] per service, [`route`]
//! shared), and the threaded pipeline that connects file producers to
//! service consumers ([`queue`], [`barrier`], [`service`], [`pipeline`],
//! [`ingest`]).

pub mod barrier;
pub mod config;
pub mod dump;
pub mod glob;
pub mod ingest;
pub mod key;
pub mod pipeline;
pub mod queue;
pub mod radix;
pub mod route;
pub mod service;
pub mod trie;

pub use config::{Config, Fit};
pub use glob::Glob;
pub use key::Key;
pub use route::TopLevelTree;
pub use service::Service;
pub use trie::{Ejected, GlobTrieNode};

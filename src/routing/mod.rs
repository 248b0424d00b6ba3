//! Key-ownership routing.
//!
//! A consistent-hash ring with virtual nodes maps every key to exactly one
//! node address. All nodes build the same ring from the same membership
//! view, so they agree on ownership without coordination.

pub mod ring;

#[cfg(test)]
mod tests;

pub use ring::{HashFn, HashRing, RingOptions, DEFAULT_REPLICAS};

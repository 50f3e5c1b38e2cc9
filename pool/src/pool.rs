// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Resource pools with reclamation

use ipnet::Ipv4Net;
use std::collections::{HashSet, VecDeque};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::PoolError;

/// The finite, ordered set of values a pool hands out
pub trait ValueSpace {
    type Item: Clone + Eq + Hash + Debug + Display;
    const NAME: &'static str;
    fn size(&self) -> usize;
    /// The value at `index`, `index < size()`
    fn value(&self, index: usize) -> Self::Item;
    fn contains(&self, item: &Self::Item) -> bool;
}

/// A pool over a value space.
///
/// `next` prefers the most recently released values (so that a chute that is removed and
/// installed again tends to get its resources back), then walks the value space from a
/// cursor, wrapping around once.
#[derive(Debug, Clone)]
pub struct ResourcePool<S: ValueSpace> {
    space: S,
    used: HashSet<S::Item>,
    recently_released: VecDeque<S::Item>,
    cursor: usize,
}

impl<S: ValueSpace> ResourcePool<S> {
    pub fn new(space: S) -> Self {
        Self {
            space,
            used: HashSet::new(),
            recently_released: VecDeque::new(),
            cursor: 0,
        }
    }

    pub fn space(&self) -> &S {
        &self.space
    }

    /// Allocate a value
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<S::Item, PoolError> {
        while let Some(item) = self.recently_released.pop_back() {
            if !self.used.contains(&item) {
                debug!("{}: reusing {item}", S::NAME);
                self.used.insert(item.clone());
                return Ok(item);
            }
        }
        let size = self.space.size();
        for _ in 0..size {
            let item = self.space.value(self.cursor);
            self.cursor = (self.cursor + 1) % size;
            if !self.used.contains(&item) {
                debug!("{}: allocated {item}", S::NAME);
                self.used.insert(item.clone());
                return Ok(item);
            }
        }
        Err(PoolError::Exhausted(S::NAME))
    }

    /// Return a value to the pool. Returns false if it was not in use.
    pub fn release(&mut self, item: &S::Item) -> bool {
        if !self.used.remove(item) {
            debug!("{}: {item} released but not in use", S::NAME);
            return false;
        }
        self.recently_released.retain(|i| i != item);
        self.recently_released.push_back(item.clone());
        debug!("{}: released {item}", S::NAME);
        true
    }

    /// Claim a specific value. With `strict`, claiming a value already in use fails; without,
    /// it is a no-op, as when reclaiming the resources of chutes that were running before a
    /// restart.
    pub fn reserve(&mut self, item: &S::Item, strict: bool) -> Result<(), PoolError> {
        if !self.space.contains(item) {
            return Err(PoolError::OutOfRange(item.to_string(), S::NAME));
        }
        if self.used.contains(item) {
            if strict {
                return Err(PoolError::AlreadyReserved(item.to_string()));
            }
            return Ok(());
        }
        self.recently_released.retain(|i| i != item);
        self.used.insert(item.clone());
        debug!("{}: reserved {item}", S::NAME);
        Ok(())
    }

    #[must_use]
    pub fn is_used(&self, item: &S::Item) -> bool {
        self.used.contains(item)
    }

    #[must_use]
    pub fn used(&self) -> &HashSet<S::Item> {
        &self.used
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.space.size() - self.used.len()
    }
}

/// Fixed-size subnets of a parent network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetSpace {
    parent: Ipv4Net,
    prefix: u8,
}

impl SubnetSpace {
    pub fn new(parent: Ipv4Net, prefix: u8) -> Result<Self, PoolError> {
        if prefix < parent.prefix_len() || prefix > 30 {
            return Err(PoolError::BadParent {
                parent: parent.to_string(),
                prefix,
            });
        }
        Ok(Self {
            parent: parent.trunc(),
            prefix,
        })
    }
    #[must_use]
    pub fn parent(&self) -> Ipv4Net {
        self.parent
    }
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl ValueSpace for SubnetSpace {
    type Item = Ipv4Net;
    const NAME: &'static str = "subnets";

    fn size(&self) -> usize {
        1usize << (self.prefix - self.parent.prefix_len())
    }

    fn value(&self, index: usize) -> Ipv4Net {
        let base = u32::from(self.parent.network());
        /* a /0 has a single subnet: the parent */
        let offset = u32::try_from(index)
            .ok()
            .and_then(|i| i.checked_shl(32 - u32::from(self.prefix)))
            .unwrap_or(0);
        Ipv4Net::new(Ipv4Addr::from(base.wrapping_add(offset)), self.prefix).unwrap_or(self.parent)
    }

    fn contains(&self, item: &Ipv4Net) -> bool {
        item.prefix_len() == self.prefix && *item == item.trunc() && self.parent.contains(item)
    }
}

/// Integers in `[0, size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericSpace {
    size: u32,
}

impl NumericSpace {
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

impl ValueSpace for NumericSpace {
    type Item = u32;
    const NAME: &'static str = "numbers";

    fn size(&self) -> usize {
        self.size as usize
    }
    #[allow(clippy::cast_possible_truncation)]
    fn value(&self, index: usize) -> u32 {
        index as u32
    }
    fn contains(&self, item: &u32) -> bool {
        *item < self.size
    }
}

pub type NetworkPool = ResourcePool<SubnetSpace>;
pub type NumericPool = ResourcePool<NumericSpace>;

impl NetworkPool {
    /// Pool of `/prefix` subnets of `parent`, e.g. the `/24`s of `192.168.128.0/17`
    pub fn with_parent(parent: Ipv4Net, prefix: u8) -> Result<Self, PoolError> {
        Ok(Self::new(SubnetSpace::new(parent, prefix)?))
    }
}

impl NumericPool {
    #[must_use]
    pub fn with_size(size: u32) -> Self {
        Self::new(NumericSpace::new(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn subnets_in_order() {
        let mut pool = NetworkPool::with_parent(net("192.168.128.0/17"), 24).unwrap();
        assert_eq!(pool.space().size(), 128);
        assert_eq!(pool.next().unwrap(), net("192.168.128.0/24"));
        assert_eq!(pool.next().unwrap(), net("192.168.129.0/24"));
    }

    #[test]
    fn reclaimed_subnet_is_skipped() {
        let mut pool = NetworkPool::with_parent(net("192.168.128.0/17"), 24).unwrap();
        pool.reserve(&net("192.168.128.0/24"), false).unwrap();
        // idempotent when not strict
        pool.reserve(&net("192.168.128.0/24"), false).unwrap();
        assert_eq!(
            pool.reserve(&net("192.168.128.0/24"), true),
            Err(PoolError::AlreadyReserved("192.168.128.0/24".to_string()))
        );
        assert_eq!(pool.next().unwrap(), net("192.168.129.0/24"));
    }

    #[test]
    fn released_items_come_back_first() {
        let mut pool = NumericPool::with_size(10);
        let a = pool.next().unwrap();
        let b = pool.next().unwrap();
        let c = pool.next().unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert!(pool.release(&a));
        assert!(pool.release(&b));
        assert!(!pool.release(&b));
        // most recent first
        assert_eq!(pool.next().unwrap(), b);
        assert_eq!(pool.next().unwrap(), a);
        assert_eq!(pool.next().unwrap(), 3);
    }

    #[test]
    fn exhaustion_after_one_cycle() {
        let mut pool = NetworkPool::with_parent(net("10.0.0.0/22"), 24).unwrap();
        for _ in 0..4 {
            pool.next().unwrap();
        }
        assert_eq!(pool.next(), Err(PoolError::Exhausted("subnets")));
        pool.release(&net("10.0.2.0/24"));
        assert_eq!(pool.next().unwrap(), net("10.0.2.0/24"));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn whole_address_space() {
        let mut pool = NetworkPool::with_parent(net("0.0.0.0/0"), 0).unwrap();
        assert_eq!(pool.space().size(), 1);
        assert_eq!(pool.next().unwrap(), net("0.0.0.0/0"));
        assert_eq!(pool.next(), Err(PoolError::Exhausted("subnets")));

        let mut pool = NetworkPool::with_parent(net("0.0.0.0/0"), 1).unwrap();
        assert_eq!(pool.next().unwrap(), net("0.0.0.0/1"));
        assert_eq!(pool.next().unwrap(), net("128.0.0.0/1"));
    }

    #[test]
    fn reserve_checks_the_space() {
        let mut pool = NetworkPool::with_parent(net("192.168.128.0/17"), 24).unwrap();
        assert!(matches!(
            pool.reserve(&net("10.0.0.0/24"), false),
            Err(PoolError::OutOfRange(..))
        ));
        assert!(pool.reserve(&net("192.168.128.0/25"), false).is_err());
        let mut numbers = NumericPool::with_size(100);
        assert!(numbers.reserve(&100, false).is_err());
        assert!(NetworkPool::with_parent(net("10.0.0.0/24"), 16).is_err());
    }
}

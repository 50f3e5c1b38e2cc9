// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Allocation of scarce node resources to chutes: subnets, interface numbers and radio slots.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
#![allow(clippy::missing_errors_doc)]

pub mod pool;
pub mod reservations;

pub use pool::{NetworkPool, NumericPool, NumericSpace, ResourcePool, SubnetSpace, ValueSpace};
pub use reservations::{
    DeviceReservation, DeviceReservations, InterfaceReservationSet, SubnetReservationSet,
};

use tracectl::trace_target;
trace_target!("pool", LevelFilter::INFO, &["update"]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Pool {0} is exhausted")]
    Exhausted(&'static str),
    #[error("{0} is already reserved")]
    AlreadyReserved(String),
    #[error("{0} is not part of pool {1}")]
    OutOfRange(String, &'static str),
    #[error("Cannot slice {parent} into /{prefix} subnets")]
    BadParent { parent: String, prefix: u8 },
}

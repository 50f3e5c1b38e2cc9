// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command priorities. Reverts are negative so that everything being torn down is gone before
//! anything new is set up.

pub const KILL_DAEMON: i32 = -90;
pub const DELETE_RULE: i32 = -80;
pub const DELETE_QDISC: i32 = -70;
pub const DELETE_ADDR: i32 = -60;
pub const REMOVE_MEMBER: i32 = -50;
pub const DELETE_LINK: i32 = -40;
pub const REMOVE_FILE: i32 = -30;

pub const CREATE_LINK: i32 = 10;
pub const CREATE_BRIDGE: i32 = 15;
pub const ADD_MEMBER: i32 = 20;
pub const ADD_ADDR: i32 = 25;
pub const LINK_UP: i32 = 30;
pub const ADD_ROUTE: i32 = 35;
pub const ADD_QDISC: i32 = 40;
pub const ZONE_POLICY: i32 = 50;
pub const ZONE_ESTABLISHED: i32 = 51;
pub const FORWARDING: i32 = 52;
pub const USER_RULE: i32 = 55;
pub const WRITE_FILE: i32 = 60;
pub const START_DAEMON: i32 = 70;

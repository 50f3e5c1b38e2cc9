// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Plan priorities. Lower runs first.

pub const SECURITY_CHECK: i32 = 100;
pub const LOAD_HOST_CONFIG: i32 = 110;

pub const GET_NETWORK: i32 = 200;
pub const GET_WIRELESS: i32 = 210;
pub const GET_FIREWALL: i32 = 220;
pub const GET_DHCP: i32 = 230;
pub const GET_TRAFFIC: i32 = 240;
pub const GET_HOST_SECTIONS: i32 = 250;

pub const SET_NETWORK: i32 = 300;
pub const SET_WIRELESS: i32 = 310;
pub const SET_FIREWALL: i32 = 320;
pub const SET_DHCP: i32 = 330;
pub const SET_QOS: i32 = 340;
pub const SET_HOST_CONFIG: i32 = 350;

pub const RELOAD_NETWORK: i32 = 400;
pub const RELOAD_WIRELESS: i32 = 410;
pub const RELOAD_FIREWALL: i32 = 420;
pub const RELOAD_DHCP: i32 = 430;
pub const RELOAD_QOS: i32 = 440;

pub const BUILD_IMAGE: i32 = 500;
pub const STOP_OLD_CONTAINER: i32 = 510;
pub const REMOVE_OLD_CONTAINER: i32 = 515;
pub const START_NEW_CONTAINER: i32 = 520;
pub const HAPROXY: i32 = 530;
pub const CLEANUP_OLD_IMAGE: i32 = 540;

pub const SAVE_STATE: i32 = 600;
pub const RELEASE_RESOURCES: i32 = 610;

//! livebridge daemon library
//!
//! Runs bridges: each bridge owns one source and delivers every observed post
//! to its targets through a private retrying queue. A controller keeps the
//! set of running bridges in line with the control document.

pub mod bridge;
pub mod component;
pub mod control;
pub mod controller;
pub mod daemon;
pub mod storage;

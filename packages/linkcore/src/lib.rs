//! Link supervision and socket session logic for the lrlink node.
//!
//! Nothing in here touches the radio or the IP stack directly: the firmware
//! feeds [`link::LinkEvent`]s into a [`link::LinkSupervisor`] and hands the
//! session loops transport adapters implementing the traits in
//! [`session::transport`].

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

pub mod config;
pub mod dhcp;
pub mod gate;
pub mod link;
pub mod session;

pub use gate::ReadinessGate;

//! The HCI wire layer: opcodes, command-parameter encoders, frame codec,
//! and typed events. Nothing in this module holds connection state or
//! talks to a transport; see [`crate::state`], [`crate::dispatcher`], and
//! [`crate::router`] for the stateful layers built on top of it.

pub mod codec;
pub mod commands;
pub mod events;
pub mod opcodes;

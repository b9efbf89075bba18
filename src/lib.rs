#![recursion_limit = "256"] // required by bitfield!
#![deny(unused_must_use)]

pub mod board;
pub mod config;
pub mod emulator;
pub mod loader;
pub mod patch;
pub mod sequencer;
pub mod tap;
pub mod transport;

//! The loggen fake log generator.
//!
//! This library supports the loggen binary found elsewhere in this project.
//! It paces continuous streams of synthetic log events, serves on-demand
//! generation requests and writes everything to a single sink: standard
//! output, a network peer or a rotation-aware file.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod admin;
pub mod config;
pub mod control;
pub mod queue;
pub mod scheduler;
pub mod telemetry;
pub mod writer;

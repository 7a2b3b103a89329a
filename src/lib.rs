//! sensor-loadgen: simulate many sensors publishing to Kafka.
//!
//! The publishing pipeline itself lives in the `sensor-kafka-producer` crate.
//! This crate wires it to a command line: argument parsing, user ramp-up and
//! pacing, progress logging and the final run summary.

pub mod args;
pub mod duration;
pub mod report;
pub mod runner;
pub mod stats;

pub use args::Cli;
pub use report::RunSummary;
pub use runner::run_load;

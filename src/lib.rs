#[macro_use]
extern crate log;

pub mod config;
pub mod env;
pub mod error;
pub mod monitor;
pub mod port_spec;
pub mod procs;
pub mod record;
pub mod record_store;
pub mod supervisor;
pub mod teardown;
pub mod tunnel;
pub mod verifier;

pub use miette::Result;

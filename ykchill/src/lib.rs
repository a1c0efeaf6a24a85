//! Register chilling hints for ahead-of-time published IR.
//!
//! A "chill" is what a JIT does when it temporarily moves a live virtual register's value out of
//! the register file (e.g. onto the stack) so that the slot can be reused. Deciding what to chill
//! at JIT time normally requires a liveness analysis; this crate does that analysis once, at
//! publish time, and attaches the results to each instruction of a compiled unit as advisory
//! [chill::ChillHint]s. A JIT can consult those hints to make cheap spill decisions, or ignore
//! them entirely: hints are additive metadata and never needed for correctness.
//!
//! The pipeline is a single forward flow:
//!
//! ```text
//! Unit --validate--> Unit --rev_analyse--> NextUseTable --emit--> ChillTable --encode--> bytes
//! ```
//!
//! The main pieces are:
//!
//!   * [reg]: the register file of each [reg::Edition] and the alias groups that width views of a
//!     register share.
//!   * [unit]: compiled units (blocks of instructions with virtual register operands), their
//!     construction and their validation.
//!   * [chill]: the reverse next-use scanner, the hint emitter, and the binary hint container.
//!   * [publish]: glue which runs the above over one or many units.

#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::comparison_chain)]

pub mod chill;
pub mod config;
mod errors;
mod log;
pub mod publish;
pub mod reg;
pub mod unit;

pub use self::config::Config;
pub use self::errors::ChillError;
pub use self::publish::{Artifact, Publisher};

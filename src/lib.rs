//! fuzzrig core library: the driver and orchestration layer of a
//! coverage-guided, in-process mutational fuzzer.
//!
//! `run_driver` parses flags, constructs the fuzzer, corpus and mutation
//! dispatcher, and dispatches to exactly one terminal mode: fuzzing,
//! running individual inputs, crash minimization, crash cleansing, corpus
//! merging, or dictionary analysis. Targets report coverage through the
//! [`coverage`] module.

pub mod cleanse;
pub mod corpus;
pub mod coverage;
pub mod dictionary;
pub mod driver;
pub mod error;
pub mod exec;
pub mod extfn;
pub mod flags;
pub mod fsutil;
pub mod fuzzer;
pub mod merge;
pub mod minimize;
pub mod monitor;
pub mod mutate;
pub mod options;
pub mod seeds;
pub mod signals;
pub mod workers;

pub use driver::run_driver;
pub use error::{DriverError, DriverResult};
pub use extfn::ExternalFunctions;
pub use fuzzer::UserCallback;
pub use options::FuzzingOptions;

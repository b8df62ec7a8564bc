//! Optional hooks supplied by the embedding binary.
//!
//! Presence is detected, never required; the driver adjusts defaults when a
//! hook exists (a custom mutator disables length control) and calls the
//! initializer before parsing flags.

/// Target-supplied initializer. May rewrite argv, except argv[0].
pub type InitializeFn = fn(args: &mut Vec<String>) -> i32;

/// Target-supplied mutator: mutate `data[..size]` in place, staying within
/// `max_size`, deterministically for a given `seed`. Returns the new size.
pub type CustomMutatorFn = fn(data: &mut [u8], size: usize, max_size: usize, seed: u32) -> usize;

#[derive(Default, Clone, Copy)]
pub struct ExternalFunctions {
    pub initialize: Option<InitializeFn>,
    pub custom_mutator: Option<CustomMutatorFn>,
}

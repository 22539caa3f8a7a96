//! This module contains constants that are needed throughout the engine.

/// The maximum bit-width of any expression the engine manipulates.
pub const MAXIMUM_EXPR_WIDTH: u32 = 256;

/// The bit-width of a pointer in the consumed IR.
pub const POINTER_WIDTH: u32 = 64;

/// The maximum number of call frames a state's stack may hold.
pub const MAXIMUM_STACK_FRAMES: usize = 8192;

/// The default cap on the number of forks performed in one run.
///
/// The default is effectively unlimited.
pub const DEFAULT_MAX_FORKS: u64 = u64::MAX;

/// The default cap on state depth (the number of branch constraints added
/// along one path), where zero means unlimited.
pub const DEFAULT_MAX_DEPTH: u64 = 0;

/// The default memory cap for the engine, in megabytes.
pub const DEFAULT_MAX_MEMORY_MB: usize = 2000;

/// The number of instructions executed between two samples of the engine's
/// memory footprint.
pub const MEMORY_CHECK_INTERVAL_INSTRUCTIONS: u64 = 65536;

/// The wall-clock grace period before static fork throttling is
/// considered, in seconds.
pub const STATIC_THROTTLE_GRACE_SECONDS: u64 = 60;

/// The default number of failed subsumption attempts tolerated per program
/// point before stored entries are dropped.
pub const DEFAULT_MAX_FAIL_SUBSUMPTION: usize = 10;

/// The default number of loop iterations the engine waits before polling
/// the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 4096;

/// The maximum number of memory objects a symbolic address is resolved
/// against before resolution is reported as incomplete.
pub const DEFAULT_MAX_RESOLUTIONS: usize = 8;

/// The number of candidate assignments the built-in solver back-end will
/// enumerate before giving up on finding a counter-model.
pub const DEFAULT_MODEL_ENUMERATION_LIMIT: usize = 4096;

/// The base address at which the deterministic allocator places the first
/// memory object.
pub const ALLOCATION_BASE_ADDRESS: u64 = 0x1000_0000;

/// The alignment applied to every allocation made by the engine.
pub const ALLOCATION_ALIGNMENT: u64 = 8;

/// The default seed for the engine's deterministic random number
/// generator.
pub const DEFAULT_RNG_SEED: u64 = 0x5eed_1e55;

/// The fraction of live states culled when the engine exceeds its memory
/// cap.
pub const MEMORY_CULL_FRACTION: f64 = 0.25;

/// The synthetic address base encoding function references as pointer
/// values; real allocations never reach this region.
pub const FUNCTION_POINTER_BASE: u64 = 0xf000_0000_0000_0000;

//! Object layout contract between generated code and the runtime.
//!
//! Generated code reads these fields directly instead of calling out, so the
//! runtime must place them exactly here.

/// Offset of the global object (a tagged value) inside the runtime context.
pub const RUNTIME_GLOBAL_OBJECT: u32 = 16;

/// Size of the locals header reserved at the bottom of every native frame.
pub const LOCALS_SIZE: u32 = 32;
/// Offset of the 32-bit GC root count inside the locals header.
pub const LOCALS_COUNT: u32 = 8;

/// Offset of the environment pointer (raw, untagged) inside a callable.
pub const CALLABLE_ENVIRONMENT: u32 = 8;

/// Offset of the parent environment pointer (raw, untagged).
pub const ENVIRONMENT_PARENT: u32 = 8;
/// Offset of the first slot (tagged values) of an environment.
pub const ENVIRONMENT_SLOTS: u32 = 16;

/// Size of one property cache entry.
pub const PROPERTY_CACHE_ENTRY_SIZE: u32 = 16;

/// Cache index meaning "do not cache this access site".
pub const PROPERTY_CACHING_DISABLED: u8 = u8::MAX;

/// Byte offset of environment slot `slot`.
pub fn environment_slot_offset(slot: u32) -> u64 {
    ENVIRONMENT_SLOTS as u64 + slot as u64 * 8
}

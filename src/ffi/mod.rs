// src/ffi/mod.rs
//
// C ABI. Every function takes a callback and an opaque user-data pointer
// last, returns the submission status, and reports its result through the
// callback. See include/codex_store.h.

mod core;
mod scaffold;

// These are the #[no_mangle] extern "C" functions called from C
pub use core::*;

// ── Atoms Layer ────────────────────────────────────────────────────────────
// Pure types, ids, config shapes and error types — zero I/O, zero side effects.
// Dependency rule: atoms may only depend on std and external pure crates.
// Nothing here may import from engine/, api/, workers/ or main.rs.

pub mod config;
pub mod error;
pub mod ids;
pub mod routing_types;
pub mod types;

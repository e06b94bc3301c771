//! Stateright Model Checking for orgdir-analytics
//!
//! Exhaustive state-space exploration of the cache entry protocol, next to
//! the seeded DST harness in `crate::dst`:
//!
//! ```text
//!     ┌──────────────────────────────┐
//!     │  Stateright   │  DST Tests   │  ← YOU ARE HERE
//!     │  (Exhaustive) │ (Simulation) │
//!     └──────────────────────────────┘
//! ```
//!
//! ## Available Models
//!
//! - `cache_entry`: single-flight and invalidation-during-compute for one key
//!
//! ## Running Model Checks
//!
//! ```bash
//! # Marked #[ignore] for CI speed
//! cargo test stateright -- --ignored --nocapture
//! ```

pub mod cache_entry;

pub use cache_entry::CacheEntryModel;

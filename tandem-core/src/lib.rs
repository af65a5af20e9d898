//! # tandem-core — document model for Tandem collaborative editing
//!
//! The pure half of the Tandem agent: no I/O, no runtime.
//!
//! ## Modules
//!
//! - [`ot`] — the insert/delete operation algebra: application, rewriting
//!   one operation to apply after another, and conflict detection.
//! - [`breaktree`] — the line-indexed balanced tree that maps byte offsets
//!   to `(line, column)` pairs and tracks per-line text, so deletions can
//!   report exactly what they removed and where.
//!
//! Everything here is value-oriented: operations are plain enums, the tree
//! owns its arena, and callers drive both from whatever execution context
//! they like.

pub mod breaktree;
pub mod ot;

pub use breaktree::{BreakTree, DocError};
pub use ot::{conflicts, Op};

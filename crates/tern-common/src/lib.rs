//! # tern-common
//!
//! Shared identifier types and system-wide constants for TernDB.
//!
//! This crate carries the type-safe newtype wrappers used across the
//! storage engine, most notably [`types::UndoRecPtr`], the packed
//! 64-bit address of a byte within an undo log.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// System-wide constants
pub mod constants;

/// Core identifier types
pub mod types;

//! Core types and logic for axpilot.
//!
//! This crate holds everything that does not touch a real display or
//! socket: element paths and their resolution cache, the locators, the
//! command compiler and executor, the wire protocol and the target-side
//! session. The `axpilot` binary wires these to TCP and host backends.
//!
//! # Modules
//!
//! - [`error`]: API error types with actionable suggestions
//! - [`path`], [`cache`], [`tree`], [`locator`]: element resolution
//! - [`vision`]: template-matching fallback locator
//! - [`compiler`], [`command`], [`executor`], [`input`]: input batches
//! - [`protocol`]: length-prefixed JSON request/response protocol
//! - [`session`]: target-side request handling
//!
//! # Element resolution
//!
//! | Step | Cost |
//! |------|------|
//! | Full-path cache hit | O(1), no tree access |
//! | Cached ancestor | one child lookup per remaining segment |
//! | Cold | one child lookup per segment from the root |

pub mod cache;
pub mod command;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod input;
pub mod locator;
pub mod path;
pub mod protocol;
pub mod session;
pub mod tree;
pub mod vision;

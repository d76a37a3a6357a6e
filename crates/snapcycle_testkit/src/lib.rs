//! # snapcycle testkit
//!
//! Test utilities for snapcycle.
//!
//! This crate provides:
//! - Temporary source/destination fixtures
//! - An in-process mirroring sync invoker that hard-links from link bases
//! - A recording sync invoker that can fail or interrupt chosen tiers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use snapcycle_testkit::prelude::*;
//!
//! let fixture = Fixture::new();
//! fixture.write("notes.txt", "hello");
//! let config = fixture.config(&[("hourly", 24), ("daily", 7)]);
//! let sync = RecordingSync::new(MirrorSync);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod mirror;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::mirror::*;
    pub use crate::recording::*;
}

pub use fixtures::*;
pub use mirror::*;
pub use recording::*;

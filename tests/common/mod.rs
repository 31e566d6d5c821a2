//! Shared test utilities for integration and property tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - Failure-injecting store and bus wrappers
//! - Change-feed notification builders

#![allow(dead_code)]

pub mod containers;
pub mod fixtures;
pub mod mock_store;

pub use containers::*;
pub use fixtures::*;
pub use mock_store::*;

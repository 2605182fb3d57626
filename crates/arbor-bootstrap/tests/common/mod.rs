//! Common test utilities for arbor-bootstrap
//!
//! This module provides shared test infrastructure including:
//! - Constants shared by the integration tests
//! - Descriptor builders for writing extension fixtures
//! - A test bed owning a temporary search path and an in-memory store
//! - Assertion helpers for record state

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod assertions;
pub mod builders;
pub mod constants;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use constants::*;
pub use fixtures::*;

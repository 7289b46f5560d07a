//! Integration tests for `Echolog`
//!
//! This crate contains integration tests that verify the interaction between
//! the core coordination crate and the in-memory event source.

// This is a test-only crate
#![cfg(test)]

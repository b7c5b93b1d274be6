//! API integration tests
//!
//! Integration tests for all HTTP endpoints

mod internal_test;
mod tasks_test;

//! Test suite for Canvas Collab
//!
//! This module organizes all tests

pub mod integration;

//! Storage integration tests against SQLite files

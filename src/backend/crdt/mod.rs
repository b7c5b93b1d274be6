//! CRDT Module
//!
//! Thin wrapper around the Loro CRDT used for canvas documents. The rest of
//! the backend never touches Loro directly; it goes through
//! [`CanvasDocument`], which exposes snapshot/delta import-export keyed by
//! version vector and JSON-level access to node entities.

/// Canvas document wrapper
pub mod document;

pub use document::{json_to_loro, loro_to_json, CanvasDocument, DocumentError};
pub use loro::VersionVector;

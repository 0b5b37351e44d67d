//! Quarry Storage - Document Store Contract and In-Memory Implementation
//!
//! Defines the storage collaborator the query engine drives, plus an
//! in-memory reference store that evaluates filters, joins, computed fields,
//! projections, sorts and windows.

pub mod eval;
pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{DocumentStore, FindOptions, HexIdCodec, IdCodec, Session};

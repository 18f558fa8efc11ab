//! Deferred, transportable queries.
//!
//! Queries are built as native expression trees, translated into a
//! serializable IR, executed by a provider on the far side of some boundary,
//! and mapped back into values of the expected types.
pub mod config;
pub mod dynamic;
pub mod executor;
pub mod expr;
pub mod ir;
pub mod query;
pub mod translate;
pub mod types;
pub mod values;

#[cfg(test)]
pub(crate) mod testutil;

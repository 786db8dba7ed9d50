//! ## Crate layout
//! - `core`: bitmaps, transactions, formulas, the formula cache, and the
//!   prefetch optimizer.
//! - `error`: public error type with a stable kind + origin taxonomy.
//!
//! [`Engine`] bundles the configuration and the shared formula cache; the
//! `prelude` module carries the vocabulary needed to build and run queries.

pub use formulary_core as core;

mod engine;
pub mod error;

pub use engine::Engine;
pub use error::Error;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        Engine, Error,
        core::{
            config::{CacheConfig, CostConfig, EngineConfig},
            prefetch::TargetIndexScope,
            prelude::*,
            query::{EntityReferenceRegistry, QueryOutcome, QueryPlan},
        },
        error::{ErrorKind, ErrorOrigin, QueryErrorKind},
    };
}

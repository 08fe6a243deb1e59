//! Counting Domain
//!
//! Counting results published by counter services, decoded from the queue and
//! stored durably.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   Decoder   │  ← Bytes → CountingResult, case-insensitive fields
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │  Processor  │  ← Bridges the queue pipeline to the store
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │ ResultStore │  ← Persistence (trait + implementations)
//! └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_counting::{CountingResultDecoder, CountingResultProcessor, PgResultStore};
//! use sea_orm::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("postgres://...").await?;
//!
//! let processor = CountingResultProcessor::new(PgResultStore::new(db));
//! let decoder = CountingResultDecoder;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod entity;
pub mod error;
pub mod models;
pub mod postgres;
pub mod processor;
pub mod repository;

// Re-export commonly used types
pub use decoder::CountingResultDecoder;
pub use error::{StorageError, StorageResult};
pub use models::CountingResult;
pub use postgres::PgResultStore;
pub use processor::CountingResultProcessor;
pub use repository::{InMemoryResultStore, ResultStore};

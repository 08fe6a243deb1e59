//! Shared test utilities for worker and domain testing
//!
//! - `TestDatabase`: PostgreSQL container with migrations applied (feature: "postgres")
//! - `TestRabbitMq`: RabbitMQ container with a publish helper (feature: "rabbitmq")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Features
//!
//! - `postgres` (default): Enables PostgreSQL test infrastructure
//! - `rabbitmq`: Enables RabbitMQ test infrastructure
//! - `all`: Enables everything
//!
//! # Usage
//!
//! ```rust,no_run
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! async fn my_postgres_test() {
//!     let db = TestDatabase::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_test");
//!
//!     let entity_id = builder.entity_id("main");
//!     let payload = builder.counting_payload("main", 5);
//! }
//! ```

use serde_json::json;
use uuid::Uuid;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "rabbitmq")]
mod rabbitmq;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "rabbitmq")]
pub use rabbitmq::TestRabbitMq;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_save_result");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic UUID derived from the seed
    pub fn uuid(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Unique counted-entity id, e.g. `counter-12345-main`
    pub fn entity_id(&self, suffix: &str) -> String {
        format!("counter-{}-{}", self.seed, suffix)
    }

    /// Unique queue name for tests sharing a broker
    pub fn queue_name(&self, suffix: &str) -> String {
        format!("test-queue-{}-{}", self.seed, suffix)
    }

    /// Counting result JSON in the producers' PascalCase shape
    pub fn counting_payload(&self, suffix: &str, count: i64) -> Vec<u8> {
        json!({
            "Id": self.entity_id(suffix),
            "Count": count,
            "Timestamp": "2024-01-01T00:00:00Z",
            "Producer": "test-producer",
            "Message": format!("reading {}", count),
        })
        .to_string()
        .into_bytes()
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Poll `condition` every 50ms until it holds or `timeout` elapses
    pub async fn eventually<F, Fut>(timeout: std::time::Duration, mut condition: F, context: &str)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("{}: condition not met within {:?}", context, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.uuid(), builder2.uuid());
        assert_eq!(builder1.entity_id("a"), builder2.entity_id("a"));
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.uuid(), builder2.uuid());
        assert_ne!(builder1.queue_name("q"), builder2.queue_name("q"));
    }

    #[test]
    fn test_counting_payload_shape() {
        let builder = TestDataBuilder::new(7);
        let payload: serde_json::Value =
            serde_json::from_slice(&builder.counting_payload("main", 5)).unwrap();

        assert_eq!(payload["Id"], "counter-7-main");
        assert_eq!(payload["Count"], 5);
    }
}

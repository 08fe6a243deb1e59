//! Counting Results Worker - Entry Point
//!
//! Consumes counting results from RabbitMQ and stores them in PostgreSQL.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    core_config::tracing::install_color_eyre();
    counter_results_worker::run().await
}

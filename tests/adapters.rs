//! Integration tests for `src/adapters/`.

#[path = "adapters/gate_test.rs"]
mod gate_test;
#[path = "adapters/telegram_ingest_test.rs"]
mod telegram_ingest_test;
#[path = "adapters/zalo_ingest_test.rs"]
mod zalo_ingest_test;

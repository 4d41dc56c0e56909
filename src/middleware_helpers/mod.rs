pub mod idempotency;
pub mod request_id;

pub use idempotency::{idempotency_middleware, IdempotencyStore, IDEMPOTENCY_KEY_HEADER};
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};

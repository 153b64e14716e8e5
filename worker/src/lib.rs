pub mod config;
pub mod dispatcher;
pub mod payment;
pub mod payment_message;
pub mod payment_processor;
pub mod processor_type;
pub mod publisher;
pub mod receiver;
pub mod store;
pub mod summary;
pub mod worker_pool;

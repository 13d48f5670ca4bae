//! [`QueueLengthPoller`](dcmigrate_core::queue::QueueLengthPoller) backends.

pub mod http;
pub mod in_memory;

pub use http::HttpQueueLengthPoller;
pub use in_memory::InMemoryQueueBackend;

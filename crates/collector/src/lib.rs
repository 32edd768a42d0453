//! Stage 1 of the lake pipeline: bounded page-fetch fan-out against a
//! paginated, credential-rotated source API.

pub mod client;
pub mod error;
pub mod paging;
pub mod scheduler;

pub use client::{ApiClient, ApiClientConfig, ApiResponse, PageHandler};
pub use error::CollectorError;
pub use paging::{parse_link_header, PagingInfo};
pub use scheduler::WorkerScheduler;

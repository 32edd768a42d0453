pub mod config;
pub mod didgen;
pub mod domain;
pub mod error;
pub mod raw;

pub use config::Config;
pub use didgen::{DomainId, DomainIdGenerator, IdKey, IdTag};
pub use domain::*;
pub use error::*;
pub use raw::{encode_params, NewRawRecord, RawDataOrigin, RawRecord};

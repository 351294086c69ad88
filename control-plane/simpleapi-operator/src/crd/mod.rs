pub mod simple_api;

pub use simple_api::{SimpleApi, SimpleApiSpec, SimpleApiStatus, StartupProbeSpec};

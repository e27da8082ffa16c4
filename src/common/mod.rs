pub mod errors;
pub mod http;
pub mod pool;
pub mod types;

pub use errors::*;
pub use http::*;
pub use types::*;

//! Generation-service client for promptfold.
//!
//! Pure HTTP client: one attempt per call, no retries. The caller decides
//! what to do with a failure.

mod client;
mod error;
mod types;

pub use client::{DEFAULT_GENERATION_ENDPOINT, GenClient, TextGenerator};
pub use error::{GenError, Result};
pub use types::{GenerateRequest, GenerateResponse, GenerationConfig};

// Generation pipeline - from uploaded images to one composite image

pub mod builder;
pub mod client;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod export;
pub mod registry;
pub mod types;

pub use builder::RequestBuilder;
pub use client::{GeminiClient, GenerationClient};
pub use controller::GenerationController;
pub use encoder::{Base64Encoder, ImageEncoder};
pub use error::{GenerationError, Result};
pub use registry::{ImageRegistry, ImageResource, PreviewAllocator, PreviewHandle, PreviewPool};
pub use types::*;

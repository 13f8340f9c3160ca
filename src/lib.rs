//! stylist - composite image generation
//!
//! Takes one subject image, any number of item images and a free text
//! instruction, and asks an external generative service for a single
//! composite image.

pub mod config;
pub mod generation;

pub use config::StylistConfig;
pub use generation::{GenerationController, GenerationError, GenerationState};

mod sampler;

pub use sampler::{Sampler, sample_size};

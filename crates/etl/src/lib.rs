pub mod cli;
pub mod fetcher;
pub mod jobs;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;
pub mod scoring;

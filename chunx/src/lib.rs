pub mod sliding;

pub use sliding::SlidingWindow;

#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    #[error("{0}")]
    Config(String),
}

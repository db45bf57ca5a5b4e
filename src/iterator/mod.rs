//! Resumable walk over every user in a domain.

pub mod progress;
pub mod user_iterator;

pub use user_iterator::{IteratorOptions, UserIterator};

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of memory: {size} bytes aligned to {align}")]
    OutOfMemory { size: usize, align: usize },
    #[error("invalid layout: {0}")]
    InvalidLayout(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returned by `Queue::enqueue` when a new segment could not be allocated.
///
/// The rejected item is handed back untouched.
#[derive(thiserror::Error)]
#[error("enqueue failed: {source}")]
pub struct EnqueueError<T> {
    pub item: T,
    #[source]
    pub source: Error,
}

impl<T> EnqueueError<T> {
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueError")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

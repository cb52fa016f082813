use typed_builder::TypedBuilder;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Sizing of a [`DeletionPipeline`](crate::DeletionPipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct DeletionConfig {
    /// Upper bound on workers running for one request.
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    /// Requests that may wait for the dispatcher before `submit` rejects.
    #[builder(default = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,
    /// Codes handed to the store per `delete_user_urls` call.
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

impl DeletionConfig {
    /// Clamps every knob to at least one.
    pub fn normalized(self) -> Self {
        Self {
            workers: self.workers.max(1),
            queue_depth: self.queue_depth.max(1),
            chunk_size: self.chunk_size.max(1),
        }
    }
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//! Remote metadata service access
//!
//! `LaminApi` is the raw capability surface of one instance. Everything
//! else talks to it through `MetadataClient`, which owns token renewal and
//! retry. `InstanceClientCache` keeps one client per instance identity.

mod api;
mod cache;
mod instance;
mod memory;
mod metadata;
mod retry;
mod token;

pub use api::{ApiError, ApiResult, LaminApi, NewArtifact, NewTransform, RecordQuery};
pub use cache::{ClientFactory, InstanceClientCache};
pub use instance::InstanceId;
pub use memory::{MemoryApi, DEFAULT_STORAGE_ROOT};
pub use metadata::{
    MetadataClient, MODEL_ARTIFACT, MODEL_RUN, MODEL_STORAGE, MODEL_TRANSFORM, MODULE_CORE,
};
pub use retry::{
    RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_MS,
};
pub use token::{ApiKeyTokenProvider, StaticToken, TokenProvider};

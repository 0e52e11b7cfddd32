//! Tag-based query cache.
//!
//! Read results are cached under a key derived from the operation and its
//! bindings, and carry a set of tags. Writes flush the tags they affect:
//!
//! - every entry carries the global tag, which `cache:flush-all` flushes;
//! - list-shaped results of a type carry `list.<Type>`;
//! - single-record lookups are flushed through their exact keys;
//! - entries cached while serving a request carry the request tag and are
//!   flushed when the request ends.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "memory"        # or "redis"
//! redis_url = "redis://127.0.0.1/"
//! default_ttl_seconds = 200
//! memory_capacity = 10000
//! global_tag = "all-query-cache"
//! ```

mod backend;
mod config;
mod executor;
mod finite;
mod invalidator;
mod keys;
mod layer;
mod lock;
mod memory;
mod middleware;
mod registry;
mod scope;
mod tags;

pub use backend::{BackendError, CacheBackend, CacheBackendExt};
pub use config::{BackendKind, CacheConfig, MAX_TTL};
pub use executor::CachedQueryExecutor;
pub use invalidator::{MutationInvalidator, MutationKind};
pub use keys::{
    CacheKey, DetailLookup, EncodingError, canonicalize, detail_lookup_key, generate,
    normalize_lookup_value, primary_lookup_key, snake_segments,
};
pub use layer::CacheLayer;
pub use memory::MemoryBackend;
pub use middleware::request_scope_layer;
pub use registry::TagIndex;
pub use scope::{NoActiveRequest, RequestContext, RequestScope};
pub use tags::{DEFAULT_GLOBAL_TAG, TagPolicy, TagSet};

//! Meshcache - A distributed in-memory key-value cache
//!
//! Nodes form a clustered keyspace: keys are routed to their owning peer
//! by consistent hashing over the live cluster membership, with a local
//! two-tier LRU store in front and a user-supplied data source behind.

pub mod api;
pub mod byteview;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod group;
pub mod models;
pub mod peers;
pub mod registry;
pub mod ring;
pub mod server;
pub mod singleflight;
pub mod store;

pub use api::create_router;
pub use byteview::ByteView;
pub use cache::{Cache, CacheOptions};
pub use config::Config;
pub use error::{CacheError, Result};
pub use group::{
    destroy_all_groups, destroy_group, get_group, list_groups, new_group, DataSource, Group,
    GroupOptions, SourceFn,
};
pub use peers::{ClientPicker, Peer, PeerChoice, PeerPicker, PickerOptions};
pub use registry::{RegistryConfig, DEFAULT_SERVICE_NAME};
pub use ring::{HashRing, RingConfig};
pub use server::{CacheServer, ServerOptions};
pub use store::{StoreKind, StoreOptions};

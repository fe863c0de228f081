//! API Module
//!
//! HTTP handlers and routing for the node's public REST API and the
//! cluster-internal `/_cache` routes.
//!
//! # Public endpoints
//! - `PUT /api/:group/set` - Store a key-value pair
//! - `GET /api/:group/get/:key` - Retrieve a value by key
//! - `DELETE /api/:group/del/:key` - Delete a key
//! - `GET /api/:group/stats` - Group statistics
//! - `GET /groups` - List registered groups
//! - `GET /health` - Health check endpoint
//!
//! # Cluster endpoints
//! - `GET/PUT/DELETE /_cache/:group/:key` - Peer-to-peer cache traffic

pub mod handlers;
pub mod routes;

pub use routes::create_router;

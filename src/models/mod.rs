//! Request and Response models for the HTTP API
//!
//! DTOs for the client-facing routes and the cluster `/_cache` routes.

pub mod requests;
pub mod responses;

pub use requests::SetRequest;
pub use responses::{
    DeleteResponse, GetResponse, GroupListResponse, HealthResponse, RpcDeleteResponse, SetResponse,
};

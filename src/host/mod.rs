//! Host platform traits for the isolation-context and surface primitives
//!
//! The coordinator never talks to the browser directly. Embedders implement
//! these traits over their platform APIs; `memory` provides in-process
//! implementations for tests and single-process use.

use crate::error::Result;
use crate::types::{ContextFilter, ContextId, ContextInfo, Marker, SurfaceId, SurfaceInfo};
use async_trait::async_trait;

pub mod memory;

/// Isolation-context primitive (create/update/delete/query)
#[async_trait]
pub trait ContextHost: Send + Sync {
    /// Create a context, returning its host-assigned id
    async fn create(&self, name: &str, marker: &Marker) -> Result<ContextId>;

    /// Rename and re-mark an existing context
    async fn update(&self, context_id: &str, name: &str, marker: &Marker) -> Result<()>;

    /// Delete a context and everything stored in it
    async fn delete(&self, context_id: &str) -> Result<()>;

    /// List contexts matching a filter
    async fn query(&self, filter: &ContextFilter) -> Result<Vec<ContextInfo>>;
}

/// Surface (tab) primitive
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// Open a surface inside a context
    async fn create(&self, context_id: &str, url: Option<&str>) -> Result<SurfaceId>;

    /// Close surfaces
    async fn remove(&self, surface_ids: &[SurfaceId]) -> Result<()>;

    /// Live surfaces currently bound to a context
    async fn query(&self, context_id: &str) -> Result<Vec<SurfaceInfo>>;

    /// Inject and run the routine that terminates already-open connections
    /// inside the page shown by a surface
    async fn terminate_connections(&self, surface_id: SurfaceId) -> Result<()>;
}

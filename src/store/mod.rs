//! Where functions come from: metadata lookup and code retrieval.
//!
//! Production deployments back these with a database and object storage;
//! the crate ships an in-memory store and a directory-backed one.

pub mod local;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalFunctionStore;
pub use memory::{InMemoryCodeStore, InMemoryFunctionRepository};

/// Stored metadata of one deployed function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub owner_id: String,
    pub handler: String,
    pub runtime: String,
    pub storage_key: String,
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Function repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum CodeStoreError {
    #[error("No code stored under key {0}")]
    Missing(String),

    #[error("Invalid response body for key {0}")]
    InvalidBody(String),

    #[error("Code store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait FunctionRepository: Send + Sync {
    /// `Ok(None)` when the owner has no function with this handler.
    async fn find_function(
        &self,
        owner_id: &str,
        handler: &str,
    ) -> Result<Option<FunctionRecord>, RepositoryError>;
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn fetch_code(&self, storage_key: &str) -> Result<Vec<u8>, CodeStoreError>;
}

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CodeStore, CodeStoreError, FunctionRecord, FunctionRepository, RepositoryError};

#[derive(Debug, Default)]
pub struct InMemoryFunctionRepository {
    functions: RwLock<HashMap<(String, String), FunctionRecord>>,
}

impl InMemoryFunctionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: FunctionRecord) {
        let key = (record.owner_id.clone(), record.handler.clone());
        self.functions.write().await.insert(key, record);
    }
}

#[async_trait]
impl FunctionRepository for InMemoryFunctionRepository {
    async fn find_function(
        &self,
        owner_id: &str,
        handler: &str,
    ) -> Result<Option<FunctionRecord>, RepositoryError> {
        let functions = self.functions.read().await;
        Ok(functions
            .get(&(owner_id.to_string(), handler.to_string()))
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCodeStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, storage_key: impl Into<String>, code: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(storage_key.into(), code.into());
    }
}

#[async_trait]
impl CodeStore for InMemoryCodeStore {
    async fn fetch_code(&self, storage_key: &str) -> Result<Vec<u8>, CodeStoreError> {
        self.objects
            .read()
            .await
            .get(storage_key)
            .cloned()
            .ok_or_else(|| CodeStoreError::Missing(storage_key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repository_lookup() {
        let repo = InMemoryFunctionRepository::new();
        repo.insert(FunctionRecord {
            owner_id: "user-1".to_string(),
            handler: "main.handler".to_string(),
            runtime: "python".to_string(),
            storage_key: "user-1/main.py".to_string(),
        })
        .await;

        let found = repo.find_function("user-1", "main.handler").await.unwrap();
        assert_eq!(found.unwrap().storage_key, "user-1/main.py");
        assert!(repo.find_function("user-2", "main.handler").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_code_store_missing_key() {
        let store = InMemoryCodeStore::new();
        store.put("k", b"x".to_vec()).await;
        assert_eq!(store.fetch_code("k").await.unwrap(), b"x");
        assert!(matches!(
            store.fetch_code("other").await,
            Err(CodeStoreError::Missing(_))
        ));
    }
}

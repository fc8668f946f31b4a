//! Document repository trait (Port)
//!
//! CRUD operations available to a unit of work on its session.
//! Every call runs inside the session's open transaction.

use crate::document::{to_body, Document};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use unitwork_exec::{Session, StoreError};

/// Document operations on a transactional session
#[async_trait]
pub trait DocumentSession: Session {
    /// Insert a new document (fails with `Duplicate` if the id exists)
    async fn insert_one(&mut self, collection: &str, id: &str, body: Value) -> Result<(), StoreError>;

    /// Find a document by ID
    async fn find_one(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Find documents whose top-level fields equal those in `filter`, ordered by id
    async fn find(&mut self, collection: &str, filter: &Value) -> Result<Vec<Document>, StoreError>;

    /// Set the top-level fields in `patch` (fails with `NotFound` if missing)
    async fn update_one(
        &mut self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Document, StoreError>;

    /// Replace the whole body (fails with `NotFound` if missing)
    async fn replace_one(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<Document, StoreError>;

    /// Delete a document; `false` if it did not exist
    async fn delete_one(&mut self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Insert a serializable value
    async fn insert_as<T>(&mut self, collection: &str, id: &str, value: &T) -> Result<(), StoreError>
    where
        Self: Sized,
        T: Serialize + Sync,
    {
        let body = to_body(value)?;
        self.insert_one(collection, id, body).await
    }

    /// Find a document by ID and deserialize its body
    async fn find_one_as<T>(&mut self, collection: &str, id: &str) -> Result<Option<T>, StoreError>
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        match self.find_one(collection, id).await? {
            Some(doc) => doc.decode().map(Some),
            None => Ok(None),
        }
    }
}

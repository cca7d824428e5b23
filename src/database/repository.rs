//! Generic repository contract shared by the concrete repositories.

use crate::database::error::DatabaseError;
use async_trait::async_trait;

/// Minimal CRUD surface a repository exposes.
///
/// Concrete repositories add domain-specific queries on top; this trait
/// exists so services and tests can depend on a narrow seam.
#[async_trait]
pub trait Repository<T, Id>: Send + Sync {
    async fn find_by_id(&self, id: &Id) -> Result<Option<T>, DatabaseError>;
    async fn delete(&self, id: &Id) -> Result<bool, DatabaseError>;
}

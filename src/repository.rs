//! Persistence seam for imported entities.
//!
//! The pipeline only needs two capabilities per entity type: a lookup by
//! natural key (duplicate detection) and a save. Real stores implement
//! [`EntityRepository`]; [`InMemoryRepository`] backs the CLI and tests.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::error::AppError;
use crate::model::{Client, Product, User};

/// Boxed future returned by the object-safe traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Business-unique identifier used for duplicate detection.
pub trait NaturalKey {
    fn natural_key(&self) -> &str;
}

impl NaturalKey for Client {
    fn natural_key(&self) -> &str {
        &self.rut
    }
}

impl NaturalKey for Product {
    fn natural_key(&self) -> &str {
        &self.codigo
    }
}

impl NaturalKey for User {
    fn natural_key(&self) -> &str {
        &self.username
    }
}

/// Persistence capability for one entity type.
///
/// Implementations report store failures as [`AppError::Persistence`]; set
/// `transient` when a retry may succeed. Any other error kind is treated as
/// fatal for the running job.
pub trait EntityRepository<E>: Send + Sync {
    /// Whether an entity with this natural key is already stored.
    fn exists_by_key<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, AppError>>;

    /// Stores one entity. Each call is an independent unit of work.
    fn save<'a>(&'a self, entity: &'a E) -> BoxFuture<'a, Result<(), AppError>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryRepository
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps the natural keys of saved entities, in save order.
pub struct InMemoryRepository<E> {
    keys: Mutex<Vec<String>>,
    _entity: PhantomData<fn(&E)>,
}

impl<E> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            _entity: PhantomData,
        }
    }

    /// Starts with `keys` already stored.
    pub fn with_existing<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Mutex::new(keys.into_iter().map(Into::into).collect()),
            _entity: PhantomData,
        }
    }

    pub async fn saved_keys(&self) -> Vec<String> {
        self.keys.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.lock().await.is_empty()
    }
}

impl<E> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EntityRepository<E> for InMemoryRepository<E>
where
    E: NaturalKey + Sync,
{
    fn exists_by_key<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, AppError>> {
        Box::pin(async move { Ok(self.keys.lock().await.iter().any(|k| k == key)) })
    }

    fn save<'a>(&'a self, entity: &'a E) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            let key = entity.natural_key();
            let mut keys = self.keys.lock().await;
            // Unique constraint on the natural key.
            if keys.iter().any(|k| k == key) {
                return Err(AppError::Persistence {
                    message: format!("key {} already stored", key),
                    transient: false,
                });
            }
            keys.push(key.to_string());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(codigo: &str) -> Product {
        let now = Utc::now();
        Product {
            codigo: codigo.to_string(),
            nombre: "Lapiz".into(),
            descripcion: String::new(),
            precio: Some(100.0),
            stock: 0,
            marca: String::new(),
            modelo: String::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_then_exists() {
        let repo = InMemoryRepository::<Product>::new();
        assert!(!repo.exists_by_key("P001").await.unwrap());

        repo.save(&product("P001")).await.unwrap();
        assert!(repo.exists_by_key("P001").await.unwrap());
        assert_eq!(repo.saved_keys().await, vec!["P001"]);
    }

    #[tokio::test]
    async fn test_second_save_with_same_key_is_permanent_failure() {
        let repo = InMemoryRepository::<Product>::with_existing(["P001"]);
        let err = repo.save(&product("P001")).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence { transient: false, .. }));
        assert_eq!(repo.len().await, 1);
    }
}

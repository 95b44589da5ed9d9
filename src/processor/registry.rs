//! Entity-type resolution.

use std::sync::Arc;

use super::{ClientProcessor, ProductProcessor, RowProcessor, UserProcessor};
use crate::error::AppError;
use crate::model::{Client, Product, User};
use crate::repository::EntityRepository;

/// Fixed set of processors, built once at startup and read-only afterwards.
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn RowProcessor>>,
}

impl ProcessorRegistry {
    /// Builds a registry from explicit processors.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if two processors declare the same type.
    pub fn new(processors: Vec<Arc<dyn RowProcessor>>) -> Result<Self, AppError> {
        for (index, processor) in processors.iter().enumerate() {
            let entity_type = processor.entity_type();
            if processors[..index]
                .iter()
                .any(|earlier| earlier.entity_type().eq_ignore_ascii_case(entity_type))
            {
                return Err(AppError::Config(format!(
                    "processor for '{}' registered twice",
                    entity_type
                )));
            }
        }
        Ok(Self { processors })
    }

    /// Registry with the client, product and user processors.
    pub fn builtin(
        clients: Arc<dyn EntityRepository<Client>>,
        products: Arc<dyn EntityRepository<Product>>,
        users: Arc<dyn EntityRepository<User>>,
    ) -> Self {
        let processors: Vec<Arc<dyn RowProcessor>> = vec![
            Arc::new(ClientProcessor::new(clients)),
            Arc::new(ProductProcessor::new(products)),
            Arc::new(UserProcessor::new(users)),
        ];
        Self { processors }
    }

    /// Case-insensitive lookup by entity type.
    pub fn resolve(&self, entity_type: &str) -> Result<Arc<dyn RowProcessor>, AppError> {
        let wanted = entity_type.trim();
        self.processors
            .iter()
            .find(|p| p.entity_type().eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| AppError::NoProcessor {
                entity_type: wanted.to_string(),
                supported: self.supported_types(),
            })
    }

    /// Registered entity types in registration order.
    pub fn supported_types(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|p| p.entity_type().to_string())
            .collect()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("types", &self.supported_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;

    fn registry() -> ProcessorRegistry {
        ProcessorRegistry::builtin(
            Arc::new(InMemoryRepository::<Client>::new()),
            Arc::new(InMemoryRepository::<Product>::new()),
            Arc::new(InMemoryRepository::<User>::new()),
        )
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.resolve("CLIENTE").unwrap().entity_type(), "cliente");
        assert_eq!(registry.resolve(" Producto ").unwrap().entity_type(), "producto");
        assert_eq!(registry.resolve("usuario").unwrap().entity_type(), "usuario");
    }

    #[test]
    fn test_unknown_type_lists_supported() {
        let err = match registry().resolve("pedido") {
            Err(e) => e,
            Ok(_) => panic!("pedido should not resolve"),
        };
        match &err {
            AppError::NoProcessor { entity_type, supported } => {
                assert_eq!(entity_type, "pedido");
                assert_eq!(supported, &vec!["cliente", "producto", "usuario"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "No processor for entity type 'pedido' (supported: cliente, producto, usuario)"
        );
        assert!(err.is_job_fatal());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let clients: Arc<dyn EntityRepository<Client>> =
            Arc::new(InMemoryRepository::<Client>::new());
        let first: Arc<dyn RowProcessor> = Arc::new(ClientProcessor::new(clients.clone()));
        let second: Arc<dyn RowProcessor> = Arc::new(ClientProcessor::new(clients));
        let result = ProcessorRegistry::new(vec![first, second]);
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}

use std::sync::Arc;

use chrono::Utc;

use super::{parse_optional, EntityProcessor};
use crate::error::AppError;
use crate::extract::RowRecord;
use crate::model::{EntityKind, Product};
use crate::repository::{BoxFuture, EntityRepository};
use crate::validation::{FieldValidator, ValidationOutcome};

/// Imports catalogue products keyed by uppercase code.
pub struct ProductProcessor {
    repository: Arc<dyn EntityRepository<Product>>,
    validator: FieldValidator,
}

impl ProductProcessor {
    pub fn new(repository: Arc<dyn EntityRepository<Product>>) -> Self {
        Self {
            repository,
            validator: FieldValidator::new(),
        }
    }
}

impl EntityProcessor for ProductProcessor {
    type Entity = Product;

    fn entity_type(&self) -> &'static str {
        EntityKind::Product.as_str()
    }

    fn map_row(&self, row: &RowRecord, row_number: usize) -> Result<Product, AppError> {
        let precio = parse_optional::<f64>(row, "precio", row_number)?;
        let stock = parse_optional::<i32>(row, "stock", row_number)?.unwrap_or(0);
        let now = Utc::now();

        Ok(Product {
            codigo: row.text("codigo").to_uppercase(),
            nombre: row.text("nombre").to_string(),
            descripcion: row.text("descripcion").to_string(),
            precio,
            stock,
            marca: row.text("marca").to_string(),
            modelo: row.text("modelo").to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    fn validate(&self, product: &Product, _row_number: usize) -> ValidationOutcome {
        let precio = product.precio.map(|p| p.to_string()).unwrap_or_default();
        let stock = product.stock.to_string();
        let fields = RowRecord::from_pairs([
            ("codigo", product.codigo.as_str()),
            ("nombre", product.nombre.as_str()),
            ("descripcion", product.descripcion.as_str()),
            ("precio", precio.as_str()),
            ("stock", stock.as_str()),
            ("marca", product.marca.as_str()),
            ("modelo", product.modelo.as_str()),
        ]);
        self.validator.validate(EntityKind::Product.as_str(), &fields)
    }

    fn exists<'a>(&'a self, product: &'a Product) -> BoxFuture<'a, Result<bool, AppError>> {
        self.repository.exists_by_key(&product.codigo)
    }

    fn save<'a>(&'a self, product: &'a Product) -> BoxFuture<'a, Result<(), AppError>> {
        self.repository.save(product)
    }
}

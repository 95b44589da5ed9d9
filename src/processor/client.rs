use std::sync::Arc;

use chrono::Utc;

use super::EntityProcessor;
use crate::error::AppError;
use crate::extract::RowRecord;
use crate::model::{Client, EntityKind};
use crate::repository::{BoxFuture, EntityRepository};
use crate::validation::{FieldValidator, ValidationOutcome};

/// Imports customers keyed by RUT.
pub struct ClientProcessor {
    repository: Arc<dyn EntityRepository<Client>>,
    validator: FieldValidator,
}

impl ClientProcessor {
    pub fn new(repository: Arc<dyn EntityRepository<Client>>) -> Self {
        Self {
            repository,
            validator: FieldValidator::new(),
        }
    }
}

impl EntityProcessor for ClientProcessor {
    type Entity = Client;

    fn entity_type(&self) -> &'static str {
        EntityKind::Client.as_str()
    }

    fn map_row(&self, row: &RowRecord, _row_number: usize) -> Result<Client, AppError> {
        Ok(Client {
            rut: row.text("rut").to_string(),
            nombre: row.text("nombre").to_string(),
            apellido: row.text("apellido").to_string(),
            email: row.text("email").to_string(),
            telefono: row.text("telefono").to_string(),
            direccion: row.text("direccion").to_string(),
            categoria: row.text("categoria").to_string(),
            registered_at: Utc::now(),
        })
    }

    fn validate(&self, client: &Client, _row_number: usize) -> ValidationOutcome {
        let fields = RowRecord::from_pairs([
            ("rut", client.rut.as_str()),
            ("nombre", client.nombre.as_str()),
            ("apellido", client.apellido.as_str()),
            ("email", client.email.as_str()),
            ("telefono", client.telefono.as_str()),
            ("direccion", client.direccion.as_str()),
            ("categoria", client.categoria.as_str()),
        ]);
        self.validator.validate(EntityKind::Client.as_str(), &fields)
    }

    fn exists<'a>(&'a self, client: &'a Client) -> BoxFuture<'a, Result<bool, AppError>> {
        self.repository.exists_by_key(&client.rut)
    }

    fn save<'a>(&'a self, client: &'a Client) -> BoxFuture<'a, Result<(), AppError>> {
        self.repository.save(client)
    }
}

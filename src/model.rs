//! Importable entity types.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// The closed set of entity types the pipeline can import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "cliente")]
    Client,
    #[serde(rename = "producto")]
    Product,
    #[serde(rename = "usuario")]
    User,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Client, EntityKind::Product, EntityKind::User];

    /// Identifier used in submissions and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Client => "cliente",
            EntityKind::Product => "producto",
            EntityKind::User => "usuario",
        }
    }

    /// Case-insensitive, trim-tolerant lookup.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer, keyed by national id (RUT).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub rut: String,
    pub nombre: String,
    pub apellido: String,
    pub email: String,
    pub telefono: String,
    pub direccion: String,
    pub categoria: String,
    pub registered_at: DateTime<Utc>,
}

/// A catalogue product, keyed by its uppercase code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub codigo: String,
    pub nombre: String,
    pub descripcion: String,
    pub precio: Option<f64>,
    pub stock: i32,
    pub marca: String,
    pub modelo: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A system user, keyed by username. The password never leaves the secret wrapper.
#[derive(Debug)]
pub struct User {
    pub username: String,
    pub password: SecretString,
    pub nombre: String,
    pub apellido: String,
    pub email: String,
    pub roles: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use super::EntityProcessor;
use crate::error::AppError;
use crate::extract::RowRecord;
use crate::model::{EntityKind, User};
use crate::repository::{BoxFuture, EntityRepository};
use crate::validation::fields::{check_password, split_roles, MASKED_SECRET};
use crate::validation::{FieldValidator, ValidationOutcome};

/// Role given to users whose file row names none.
const DEFAULT_ROLE: &str = "USER";

/// Tokens accepted as "active".
const TRUTHY: &[&str] = &["true", "1", "si", "sí"];

/// Imports system users keyed by username.
pub struct UserProcessor {
    repository: Arc<dyn EntityRepository<User>>,
    validator: FieldValidator,
}

impl UserProcessor {
    pub fn new(repository: Arc<dyn EntityRepository<User>>) -> Self {
        Self {
            repository,
            validator: FieldValidator::new(),
        }
    }
}

fn parse_active(raw: &str) -> bool {
    raw.is_empty() || TRUTHY.contains(&raw.to_lowercase().as_str())
}

impl EntityProcessor for UserProcessor {
    type Entity = User;

    fn entity_type(&self) -> &'static str {
        EntityKind::User.as_str()
    }

    fn map_row(&self, row: &RowRecord, _row_number: usize) -> Result<User, AppError> {
        let mut roles = split_roles(row.text("roles"));
        if roles.is_empty() {
            roles.push(DEFAULT_ROLE.to_string());
        }

        Ok(User {
            username: row.text("username").to_string(),
            password: SecretString::from(row.text("password").to_string()),
            nombre: row.text("nombre").to_string(),
            apellido: row.text("apellido").to_string(),
            email: row.text("email").to_string(),
            roles,
            active: parse_active(row.text("activo")),
            created_at: Utc::now(),
        })
    }

    fn validate(&self, user: &User, _row_number: usize) -> ValidationOutcome {
        let secret = user.password.expose_secret();
        // The row-shaped copy never carries the real password.
        let masked = if secret.is_empty() { "" } else { MASKED_SECRET };
        let roles = user.roles.join(";");
        let active = user.active.to_string();

        let fields = RowRecord::from_pairs([
            ("username", user.username.as_str()),
            ("password", masked),
            ("nombre", user.nombre.as_str()),
            ("apellido", user.apellido.as_str()),
            ("email", user.email.as_str()),
            ("roles", roles.as_str()),
            ("activo", active.as_str()),
        ]);
        let outcome = self.validator.validate(EntityKind::User.as_str(), &fields);

        match check_password(secret) {
            Some(message) if !secret.is_empty() => {
                outcome.merge(ValidationOutcome::new(vec![message], Vec::new()))
            }
            _ => outcome,
        }
    }

    fn exists<'a>(&'a self, user: &'a User) -> BoxFuture<'a, Result<bool, AppError>> {
        self.repository.exists_by_key(&user.username)
    }

    fn save<'a>(&'a self, user: &'a User) -> BoxFuture<'a, Result<(), AppError>> {
        self.repository.save(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;

    fn processor() -> UserProcessor {
        UserProcessor::new(Arc::new(InMemoryRepository::<User>::new()))
    }

    fn row(password: &str, roles: &str, activo: &str) -> RowRecord {
        RowRecord::from_pairs([
            ("username", "jdoe"),
            ("password", password),
            ("nombre", "John"),
            ("apellido", "Doe"),
            ("email", "jdoe@example.com"),
            ("roles", roles),
            ("activo", activo),
        ])
    }

    #[test]
    fn test_roles_default_to_user() {
        let user = processor().map_row(&row("secret123", "", ""), 2).unwrap();
        assert_eq!(user.roles, vec!["USER"]);
        assert!(user.active);
    }

    #[test]
    fn test_roles_split_and_uppercased() {
        let user = processor().map_row(&row("secret123", "admin; ventas", "no"), 2).unwrap();
        assert_eq!(user.roles, vec!["ADMIN", "VENTAS"]);
        assert!(!user.active);
    }

    #[test]
    fn test_active_vocabulary() {
        assert!(parse_active(""));
        assert!(parse_active("TRUE"));
        assert!(parse_active("1"));
        assert!(parse_active("Sí"));
        assert!(parse_active("si"));
        assert!(!parse_active("false"));
        assert!(!parse_active("0"));
        assert!(!parse_active("yes"));
    }

    #[test]
    fn test_short_password_checked_on_secret() {
        let processor = processor();
        let user = processor.map_row(&row("abc", "", ""), 4).unwrap();
        let outcome = processor.validate(&user, 4);
        assert_eq!(
            outcome.errors(),
            ["Password must be between 6 and 100 characters".to_string()]
        );
    }

    #[test]
    fn test_missing_password_is_not_hidden_by_mask() {
        let processor = processor();
        let user = processor.map_row(&row("", "", ""), 2).unwrap();
        let outcome = processor.validate(&user, 2);
        assert_eq!(outcome.errors(), ["Missing required field: password".to_string()]);
    }

    #[test]
    fn test_password_never_in_messages() {
        let processor = processor();
        let user = processor.map_row(&row("hunter2!", "pirate", ""), 2).unwrap();
        let outcome = processor.validate(&user, 2);
        assert!(outcome.is_valid());
        for message in outcome.errors().iter().chain(outcome.warnings()) {
            assert!(!message.contains("hunter2!"));
        }
        assert_eq!(outcome.warnings().len(), 1);
        assert!(!format!("{:?}", user).contains("hunter2!"));
    }
}

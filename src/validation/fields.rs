//! Per-entity pattern rules applied to row-shaped records.
//!
//! Every rule except "required" only fires on a non-empty value, so a missing
//! optional column never produces more than one message.

use std::sync::LazyLock;

use regex::Regex;

use super::ValidationOutcome;
use crate::extract::RowRecord;
use crate::model::EntityKind;

/// Placeholder shown instead of a password in row-shaped records.
pub const MASKED_SECRET: &str = "********";

/// Roles a user may carry.
pub const KNOWN_ROLES: &[&str] = &["ADMIN", "VENTAS", "PRODUCTOS", "GERENTE", "USER"];

const MAX_NAME_CHARS: usize = 50;
const MIN_PASSWORD_CHARS: usize = 6;
const MAX_PASSWORD_CHARS: usize = 100;
const MAX_PRICE: f64 = 999_999.99;
const MAX_STOCK: i64 = 999_999;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9+_.-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email pattern")
});
static RUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{7,8}-[0-9K]$").expect("rut pattern"));
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+]?[0-9]{8,15}$").expect("phone pattern"));
static PRODUCT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{3,20}$").expect("product code pattern"));
static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]{3,20}$").expect("username pattern"));

/// Shared semantic validator keyed by entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldValidator;

impl FieldValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates `fields` against the rules of `entity_type`.
    pub fn validate(&self, entity_type: &str, fields: &RowRecord) -> ValidationOutcome {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match EntityKind::parse(entity_type) {
            Some(EntityKind::Client) => client_rules(fields, &mut errors),
            Some(EntityKind::Product) => product_rules(fields, &mut errors),
            Some(EntityKind::User) => user_rules(fields, &mut errors, &mut warnings),
            None => errors.push(format!("Unrecognized entity type: {}", entity_type.trim())),
        }

        ValidationOutcome::new(errors, warnings)
    }
}

fn require(fields: &RowRecord, names: &[&str], errors: &mut Vec<String>) {
    for name in names {
        if fields.text(name).is_empty() {
            errors.push(format!("Missing required field: {}", name));
        }
    }
}

fn max_chars(fields: &RowRecord, name: &str, max: usize, errors: &mut Vec<String>) {
    if fields.text(name).chars().count() > max {
        errors.push(format!("Field {} exceeds {} characters", name, max));
    }
}

fn client_rules(fields: &RowRecord, errors: &mut Vec<String>) {
    require(fields, &["nombre", "apellido", "email", "rut"], errors);

    let email = fields.text("email");
    if !email.is_empty() && !is_valid_email(email) {
        errors.push(format!("Invalid email: {}", email));
    }

    let rut = fields.text("rut");
    if !rut.is_empty() && !is_valid_rut(rut) {
        errors.push(format!("Invalid RUT: {}", rut));
    }

    let phone = fields.text("telefono");
    if !phone.is_empty() && !is_valid_phone(phone) {
        errors.push(format!("Invalid phone number: {}", phone));
    }

    max_chars(fields, "nombre", MAX_NAME_CHARS, errors);
    max_chars(fields, "apellido", MAX_NAME_CHARS, errors);
}

fn product_rules(fields: &RowRecord, errors: &mut Vec<String>) {
    require(fields, &["codigo", "nombre", "precio"], errors);

    let code = fields.text("codigo");
    if !code.is_empty() && !PRODUCT_CODE.is_match(&code.to_uppercase()) {
        errors.push(format!(
            "Invalid product code: {} (3 to 20 letters or digits)",
            code
        ));
    }

    let price = fields.text("precio");
    if !price.is_empty() {
        match price.parse::<f64>() {
            Ok(value) if !value.is_finite() => errors.push(format!("Invalid price: {}", price)),
            Ok(value) if value <= 0.0 => errors.push("Price must be greater than zero".into()),
            Ok(value) if value > MAX_PRICE => {
                errors.push(format!("Price must not exceed {:.2}", MAX_PRICE))
            }
            Ok(_) => {}
            Err(_) => errors.push(format!("Invalid price: {}", price)),
        }
    }

    let stock = fields.text("stock");
    if !stock.is_empty() {
        match stock.parse::<i64>() {
            Ok(value) if value < 0 => errors.push("Stock must not be negative".into()),
            Ok(value) if value > MAX_STOCK => {
                errors.push(format!("Stock must not exceed {}", MAX_STOCK))
            }
            Ok(_) => {}
            Err(_) => errors.push(format!("Invalid stock: {}", stock)),
        }
    }
}

fn user_rules(fields: &RowRecord, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    require(
        fields,
        &["username", "password", "nombre", "apellido", "email"],
        errors,
    );

    let username = fields.text("username");
    if !username.is_empty() && !USERNAME.is_match(username) {
        errors.push(format!(
            "Invalid username: {} (3 to 20 letters, digits, '.', '_' or '-')",
            username
        ));
    }

    let email = fields.text("email");
    if !email.is_empty() && !is_valid_email(email) {
        errors.push(format!("Invalid email: {}", email));
    }

    // A masked password was already checked by whoever masked it.
    let password = fields.get("password").unwrap_or("");
    if !password.is_empty() && password != MASKED_SECRET {
        if let Some(message) = check_password(password) {
            errors.push(message);
        }
    }

    for role in split_roles(fields.text("roles")) {
        if !KNOWN_ROLES.contains(&role.as_str()) {
            warnings.push(format!(
                "Unknown role: {}. USER will be assigned by default",
                role
            ));
        }
    }
}

/// Length policy for passwords; returns the violation message, if any.
pub fn check_password(password: &str) -> Option<String> {
    let length = password.chars().count();
    if (MIN_PASSWORD_CHARS..=MAX_PASSWORD_CHARS).contains(&length) {
        None
    } else {
        Some(format!(
            "Password must be between {} and {} characters",
            MIN_PASSWORD_CHARS, MAX_PASSWORD_CHARS
        ))
    }
}

/// Splits a `;`-separated role list into trimmed uppercase names.
pub fn split_roles(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|role| role.trim().to_uppercase())
        .filter(|role| !role.is_empty())
        .collect()
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

pub fn is_valid_phone(value: &str) -> bool {
    PHONE.is_match(value.trim())
}

/// Validates a Chilean RUT such as `12.345.678-5` or `12345678-5`.
pub fn is_valid_rut(value: &str) -> bool {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| *c != '.')
        .collect::<String>()
        .to_uppercase();

    if !RUT.is_match(&cleaned) {
        return false;
    }

    match cleaned.split_once('-') {
        Some((body, digit)) => body
            .parse::<u32>()
            .map(|body| digit.starts_with(rut_check_digit(body)))
            .unwrap_or(false),
        None => false,
    }
}

/// Modulo-11 check digit for a RUT body (weights 2..=7, right to left).
pub fn rut_check_digit(body: u32) -> char {
    let mut remaining = body;
    let mut weight = 2;
    let mut sum = 0;

    while remaining > 0 {
        sum += (remaining % 10) * weight;
        remaining /= 10;
        weight = if weight == 7 { 2 } else { weight + 1 };
    }

    match 11 - (sum % 11) {
        11 => '0',
        10 => 'K',
        digit => char::from(b'0' + digit as u8),
    }
}

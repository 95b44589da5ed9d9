//! Header-keyed row records.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One parsed data row, keyed by column header.
///
/// Keys keep the header's original case and file order. The record is built
/// once by the extractor and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRecord {
    fields: Vec<(String, String)>,
}

impl RowRecord {
    /// Builds a record from `(header, value)` pairs.
    ///
    /// A repeated header keeps its first value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields: Vec<(String, String)> = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            if fields.iter().any(|(existing, _)| *existing == key) {
                continue;
            }
            fields.push((key, value.into()));
        }
        Self { fields }
    }

    /// Raw value for `header`. Exact match first, then case-insensitive.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == header)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|(key, _)| key.trim().eq_ignore_ascii_case(header.trim()))
            })
            .map(|(_, value)| value.as_str())
    }

    /// Trimmed value for `header`, or `""` when the column is absent.
    pub fn text(&self, header: &str) -> &str {
        self.get(header).map(str::trim).unwrap_or("")
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl Serialize for RowRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_exact_header_then_ignores_case() {
        let record = RowRecord::from_pairs([("Email", " ana@example.com "), ("rut", "11111111-1")]);
        assert_eq!(record.get("Email"), Some(" ana@example.com "));
        assert_eq!(record.get("email"), Some(" ana@example.com "));
        assert_eq!(record.text("EMAIL"), "ana@example.com");
        assert_eq!(record.text("telefono"), "");
        assert_eq!(record.get("telefono"), None);
    }

    #[test]
    fn repeated_header_keeps_first_value() {
        let record: RowRecord = vec![("codigo", "A1"), ("codigo", "B2"), ("nombre", "Lápiz")]
            .into_iter()
            .collect();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("codigo"), Some("A1"));
        assert_eq!(record.headers().collect::<Vec<_>>(), vec!["codigo", "nombre"]);
    }

    #[test]
    fn serializes_in_header_order() {
        let record = RowRecord::from_pairs([("z", "1"), ("a", "2")]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"z":"1","a":"2"}"#);
    }
}

//! Pre-flight contracts for staging inputs.
//!
//! The extraction collaborator is configured with a source query template and
//! a set of normalized attribute columns. Both are validated once, up front:
//! - [`SourceQuery::parse`] checks a query template against the placeholder
//!   and column contract before first use, instead of re-deriving it per call
//! - [`AttributeContract::check`] verifies that a staged record carries every
//!   required attribute, which stores apply on insert

use regex::Regex;

use crate::error::ValidationError;

/// Default pagination placeholders a source query must bind.
pub const DEFAULT_PLACEHOLDERS: [&str; 2] = [":last_id", ":limit"];

/// The interface contract a configured source query must satisfy.
#[derive(Debug, Clone)]
pub struct QueryContract {
    required_columns: Vec<String>,
    required_placeholders: Vec<String>,
}

impl QueryContract {
    /// Builds a contract from required column names and placeholders.
    ///
    /// Placeholders are given with their leading colon, e.g. `":limit"`.
    #[must_use]
    pub fn new(
        required_columns: impl IntoIterator<Item = impl Into<String>>,
        required_placeholders: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            required_columns: required_columns.into_iter().map(Into::into).collect(),
            required_placeholders: required_placeholders.into_iter().map(Into::into).collect(),
        }
    }

    /// Contract with the standard pagination placeholders and the given
    /// required columns.
    #[must_use]
    pub fn with_columns(required_columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(required_columns, DEFAULT_PLACEHOLDERS)
    }

    /// The required column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.required_columns
    }

    /// The required placeholders, with leading colons.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.required_placeholders
    }
}

impl Default for QueryContract {
    fn default() -> Self {
        Self::new(Vec::<String>::new(), DEFAULT_PLACEHOLDERS)
    }
}

/// A source query template that has passed contract validation.
///
/// The type is proof of validity: holding a `SourceQuery` means every
/// required placeholder is bound, no unknown placeholder appears, and every
/// required column is named in the text.
///
/// # Examples
/// ```
/// use kinfold::contract::{QueryContract, SourceQuery};
///
/// let contract = QueryContract::with_columns(["id", "full_name"]);
/// let query = SourceQuery::parse(
///     "SELECT id, full_name FROM people WHERE id > :last_id ORDER BY id LIMIT :limit",
///     &contract,
/// )
/// .unwrap();
/// assert!(query.text().contains(":limit"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    text: String,
}

impl SourceQuery {
    /// Validates a query template against a contract.
    ///
    /// # Errors
    /// - [`ValidationError::MissingPlaceholder`] if a required placeholder
    ///   does not appear in the text
    /// - [`ValidationError::UnknownPlaceholder`] if the text uses a
    ///   placeholder the pagination runner will not bind
    /// - [`ValidationError::MissingColumn`] if a required column is not named
    ///   anywhere in the text (case-insensitive)
    pub fn parse(text: impl Into<String>, contract: &QueryContract) -> Result<Self, ValidationError> {
        let text = text.into();
        let found = scan_placeholders(&text);

        for required in contract.placeholders() {
            if !found.iter().any(|p| p == required) {
                return Err(ValidationError::MissingPlaceholder {
                    placeholder: required.clone(),
                });
            }
        }
        for present in &found {
            if !contract.placeholders().iter().any(|p| p == present) {
                return Err(ValidationError::UnknownPlaceholder {
                    placeholder: present.clone(),
                });
            }
        }

        let lowered = text.to_lowercase();
        for column in contract.columns() {
            if !lowered.contains(&column.to_lowercase()) {
                return Err(ValidationError::MissingColumn {
                    column: column.clone(),
                });
            }
        }

        Ok(Self { text })
    }

    /// The validated template text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

fn scan_placeholders(text: &str) -> Vec<String> {
    // The regex is a fixed literal; construction cannot fail.
    let Ok(pattern) = Regex::new(r":[A-Za-z_][A-Za-z0-9_]*") else {
        return Vec::new();
    };
    let mut found: Vec<String> = pattern
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Required normalized attributes for staged records.
///
/// An empty contract accepts everything.
#[derive(Debug, Clone, Default)]
pub struct AttributeContract {
    required: Vec<String>,
}

impl AttributeContract {
    /// Builds a contract from required attribute names.
    #[must_use]
    pub fn new(required: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// The required attribute names.
    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Returns true when no attributes are required.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Checks a record's attribute map against the contract.
    ///
    /// # Errors
    /// Returns [`ValidationError::MissingAttribute`] for the first required
    /// attribute that is absent or null. Non-object attribute values fail the
    /// first requirement outright.
    pub fn check(&self, attributes: &serde_json::Value) -> Result<(), ValidationError> {
        if self.required.is_empty() {
            return Ok(());
        }

        let object = attributes.as_object();
        for attribute in &self.required {
            let present = object
                .and_then(|map| map.get(attribute))
                .is_some_and(|value| !value.is_null());
            if !present {
                return Err(ValidationError::MissingAttribute {
                    attribute: attribute.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID_QUERY: &str =
        "SELECT id, full_name, birth_date FROM people WHERE id > :last_id ORDER BY id LIMIT :limit";

    #[test]
    fn test_valid_query_passes() {
        let contract = QueryContract::with_columns(["id", "full_name", "birth_date"]);
        let query = SourceQuery::parse(VALID_QUERY, &contract).unwrap();
        assert_eq!(query.text(), VALID_QUERY);
    }

    #[test]
    fn test_missing_placeholder_rejected() {
        let contract = QueryContract::default();
        let err = SourceQuery::parse("SELECT id FROM people LIMIT :limit", &contract).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingPlaceholder { ref placeholder } if placeholder == ":last_id"
        ));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let contract = QueryContract::default();
        let err = SourceQuery::parse(
            "SELECT id FROM people WHERE id > :last_id AND region = :region LIMIT :limit",
            &contract,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownPlaceholder { ref placeholder } if placeholder == ":region"
        ));
    }

    #[test]
    fn test_missing_column_rejected() {
        let contract = QueryContract::with_columns(["id", "full_name"]);
        let err = SourceQuery::parse(
            "SELECT id FROM people WHERE id > :last_id LIMIT :limit",
            &contract,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingColumn { ref column } if column == "full_name"
        ));
    }

    #[test]
    fn test_column_check_is_case_insensitive() {
        let contract = QueryContract::with_columns(["FULL_NAME"]);
        let query = SourceQuery::parse(
            "SELECT full_name FROM people WHERE id > :last_id LIMIT :limit",
            &contract,
        );
        assert!(query.is_ok());
    }

    #[test]
    fn test_attribute_contract_accepts_complete_record() {
        let contract = AttributeContract::new(["name", "dob"]);
        let attrs = json!({"name": "BUDI", "dob": "1990-01-01", "extra": 1});
        assert!(contract.check(&attrs).is_ok());
    }

    #[test]
    fn test_attribute_contract_rejects_missing_and_null() {
        let contract = AttributeContract::new(["name", "dob"]);

        let err = contract.check(&json!({"name": "BUDI"})).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingAttribute { ref attribute } if attribute == "dob"
        ));

        let err = contract
            .check(&json!({"name": "BUDI", "dob": null}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingAttribute { .. }));
    }

    #[test]
    fn test_empty_attribute_contract_accepts_anything() {
        let contract = AttributeContract::default();
        assert!(contract.check(&json!(null)).is_ok());
        assert!(contract.check(&json!({"whatever": 1})).is_ok());
    }
}

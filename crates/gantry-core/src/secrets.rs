//! Secret types.
//!
//! A [`SecretValue`] can only be read through [`SecretValue::expose`]. It has no
//! `Serialize` impl and its `Debug` and `Display` output is masked, so a value
//! that ends up in a log macro or a report by accident prints as `***`.

use std::fmt;

pub const MASK: &str = "***";

#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_value_is_masked() {
        let value = SecretValue::new("hunter2");
        assert_eq!(format!("{value}"), "***");
        assert_eq!(format!("{value:?}"), "***");
        assert_eq!(value.expose(), "hunter2");
    }
}

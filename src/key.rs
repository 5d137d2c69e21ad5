use std::fmt;
use std::str::FromStr;

/// Identifies a namespaced object as `"<namespace>/<name>"`, the format used
/// throughout the reconciler (queue keys, index keys, derived file names).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub namespace: String,
    pub name: String,
}

impl Key {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `<namespace>-<name>`, the on-disk file stem for a managed ingress (§6).
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("key {0:?} does not contain exactly one '/' separator")]
    BadSeparatorCount(String),
}

impl FromStr for Key {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (Some(namespace), Some(name), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyParseError::BadSeparatorCount(s.to_string()));
        };
        if namespace.is_empty() || name.is_empty() {
            return Err(KeyParseError::BadSeparatorCount(s.to_string()));
        }
        Ok(Key::new(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_key() {
        let key: Key = "default/cafe".parse().unwrap();
        assert_eq!(key, Key::new("default", "cafe"));
        assert_eq!(key.to_string(), "default/cafe");
        assert_eq!(key.file_stem(), "default-cafe");
    }

    #[test]
    fn rejects_zero_or_many_separators() {
        assert!("default-cafe".parse::<Key>().is_err());
        assert!("a/b/c".parse::<Key>().is_err());
        assert!("/cafe".parse::<Key>().is_err());
        assert!("default/".parse::<Key>().is_err());
    }
}

//! Symbol dictionaries.

use std::collections::HashMap;
use std::fmt;

/// Key that matches no stored symbol; used for strings absent from the dictionary
pub const ABSENT_SYMBOL_KEY: i32 = -2;

/// Lookup from a symbol string to its dictionary key, supplied by the storage layer
pub trait SymbolTable: fmt::Debug + Send + Sync {
    /// Get the key of a string, or `None` if the dictionary does not contain it
    fn key_of(&self, value: &str) -> Option<i32>;
}

/// Append-only in-memory dictionary. A symbol's key is its insertion index.
#[derive(Debug, Clone, Default)]
pub struct SymbolDictionary {
    values: Vec<String>,
    keys: HashMap<String, i32>,
}

impl SymbolDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dictionary from values, in key order
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dictionary = Self::new();
        for value in values {
            dictionary.intern(value);
        }
        dictionary
    }

    /// Get or assign the key of a string
    pub fn intern(&mut self, value: impl Into<String>) -> i32 {
        let value = value.into();
        if let Some(key) = self.keys.get(&value) {
            return *key;
        }
        let key = self.values.len() as i32;
        self.keys.insert(value.clone(), key);
        self.values.push(value);
        key
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SymbolTable for SymbolDictionary {
    fn key_of(&self, value: &str) -> Option<i32> {
        self.keys.get(value).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_assigns_sequential_keys() {
        let mut dictionary = SymbolDictionary::new();
        assert!(dictionary.is_empty());
        assert_eq!(dictionary.intern("EUR"), 0);
        assert_eq!(dictionary.intern("USD"), 1);
        assert_eq!(dictionary.intern("EUR"), 0);
        assert_eq!(dictionary.len(), 2);
    }

    #[test]
    fn test_lookup() {
        let dictionary = SymbolDictionary::from_values(["a", "b", "c"]);
        assert_eq!(dictionary.key_of("b"), Some(1));
        assert_eq!(dictionary.key_of("z"), None);
        assert_eq!(dictionary.key_of("c"), Some(2));
    }
}

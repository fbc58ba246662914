use std::collections::HashMap;

use crate::error::{Error, Result};

/// Read access shared by every string interning table.
///
/// Implemented by the in-memory [`Dictionary`] and by the CQDB-backed tables
/// of a loaded [`Model`](crate::Model).
pub trait StringTable {
    /// Looks up the id of `s` without inserting it.
    fn lookup(&self, s: &str) -> Result<u32>;
    /// Returns the string interned under `id`.
    fn to_str(&self, id: u32) -> Result<&str>;
    /// Number of interned strings.
    fn count(&self) -> usize;
}

/// A bidirectional string/id table with dense, 0-based ids
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    ids: HashMap<String, u32>,
    strings: Vec<String>,
    read_only: bool,
}

impl Dictionary {
    /// Create an empty growable dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a read-only dictionary from an id-ordered list of strings.
    ///
    /// Repeated strings keep the id of their first occurrence.
    pub fn read_only<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dict = Self::new();
        for s in strings {
            let s = s.into();
            if !dict.ids.contains_key(&s) {
                dict.ids.insert(s.clone(), dict.strings.len() as u32);
                dict.strings.push(s);
            }
        }
        dict.read_only = true;
        dict
    }

    /// Stop accepting new strings; existing ids stay valid.
    pub fn freeze(&mut self) {
        self.read_only = true;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Returns the id of `s`, interning it first when it is new.
    ///
    /// A read-only dictionary answers known strings and fails with
    /// [`Error::NotSupported`] for anything it would have to insert.
    pub fn get_or_create(&mut self, s: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(s) {
            return Ok(id);
        }
        if self.read_only {
            return Err(Error::NotSupported);
        }
        let id = u32::try_from(self.strings.len()).map_err(|_| Error::OutOfMemory)?;
        self.ids.insert(s.to_string(), id);
        self.strings.push(s.to_string());
        Ok(id)
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.ids.clear();
        self.strings.clear();
    }

    /// Iterate over `(string, id)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.strings
            .iter()
            .enumerate()
            .map(|(id, s)| (s.as_str(), id as u32))
    }
}

impl StringTable for Dictionary {
    fn lookup(&self, s: &str) -> Result<u32> {
        self.ids.get(s).copied().ok_or(Error::NotFound)
    }

    fn to_str(&self, id: u32) -> Result<&str> {
        self.strings
            .get(id as usize)
            .map(String::as_str)
            .ok_or(Error::NotFound)
    }

    fn count(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut dict = Dictionary::new();
        assert_eq!(dict.get_or_create("hello").unwrap(), 0);
        assert_eq!(dict.get_or_create("world").unwrap(), 1);
        assert_eq!(dict.get_or_create("hello").unwrap(), 0);
        assert_eq!(dict.count(), 2);
    }

    #[test]
    fn test_lookup_never_inserts() {
        let mut dict = Dictionary::new();
        dict.get_or_create("hello").unwrap();
        assert!(matches!(dict.lookup("unseen"), Err(Error::NotFound)));
        assert_eq!(dict.count(), 1);
        assert_eq!(dict.lookup("hello").unwrap(), 0);
    }

    #[test]
    fn test_to_str() {
        let mut dict = Dictionary::new();
        dict.get_or_create("hello").unwrap();
        assert_eq!(dict.to_str(0).unwrap(), "hello");
        assert!(matches!(dict.to_str(1), Err(Error::NotFound)));
    }

    #[test]
    fn test_count_matches_distinct_strings() {
        let mut dict = Dictionary::new();
        for s in ["a", "b", "a", "c", "b", "a"] {
            dict.get_or_create(s).unwrap();
        }
        assert_eq!(dict.count(), 3);
        let items: Vec<_> = dict.iter().collect();
        assert_eq!(items, vec![("a", 0), ("b", 1), ("c", 2)]);
    }

    #[test]
    fn test_read_only_mode() {
        let mut dict = Dictionary::read_only(vec!["B", "I", "O", "B"]);
        assert!(dict.is_read_only());
        assert_eq!(dict.count(), 3);
        assert_eq!(dict.get_or_create("I").unwrap(), 1);
        assert!(matches!(dict.get_or_create("X"), Err(Error::NotSupported)));
        assert!(matches!(dict.lookup("X"), Err(Error::NotFound)));
    }

    #[test]
    fn test_freeze() {
        let mut dict = Dictionary::new();
        dict.get_or_create("a").unwrap();
        dict.freeze();
        assert!(matches!(dict.get_or_create("b"), Err(Error::NotSupported)));
        assert_eq!(dict.get_or_create("a").unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let mut dict = Dictionary::new();
        dict.get_or_create("hello").unwrap();
        dict.clear();
        assert!(dict.is_empty());
    }
}

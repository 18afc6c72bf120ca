// Label table populated during pass 1 and read in both passes.

use crate::error::{AsmError, AsmErrorKind};

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub address: u32,
}

/// Insertion-ordered name -> address table. Names are case-sensitive and
/// must be unique within a file; duplicates are rejected at definition time.
#[derive(Debug, Default)]
pub struct LabelTable {
    entries: Vec<Label>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn define(&mut self, name: &str, address: u32) -> Result<(), AsmError> {
        if self.lookup(name).is_some() {
            return Err(AsmError::new(
                AsmErrorKind::Symbol,
                "Symbol defined more than once",
                Some(name),
            ));
        }
        self.entries.push(Label {
            name: name.to_string(),
            address,
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.address)
    }

    pub fn entries(&self) -> &[Label] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::LabelTable;

    #[test]
    fn define_then_lookup() {
        let mut labels = LabelTable::new();
        labels.define("start", 0x7c00).unwrap();
        labels.define("msg", 0x7c10).unwrap();
        assert_eq!(labels.lookup("start"), Some(0x7c00));
        assert_eq!(labels.lookup("msg"), Some(0x7c10));
        assert_eq!(labels.lookup("missing"), None);
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut labels = LabelTable::new();
        labels.define("Start", 1).unwrap();
        assert_eq!(labels.lookup("start"), None);
        assert_eq!(labels.lookup("Start"), Some(1));
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let mut labels = LabelTable::new();
        labels.define("again", 0).unwrap();
        let err = labels.define("again", 4).unwrap_err();
        assert_eq!(err.message(), "Symbol defined more than once: again");
        // The first definition wins.
        assert_eq!(labels.lookup("again"), Some(0));
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut labels = LabelTable::new();
        labels.define("b", 2).unwrap();
        labels.define("a", 1).unwrap();
        let names: Vec<&str> = labels.entries().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn clear_resets_for_a_new_pass() {
        let mut labels = LabelTable::new();
        labels.define("x", 1).unwrap();
        labels.clear();
        assert!(labels.is_empty());
        assert_eq!(labels.lookup("x"), None);
    }
}

use serde::{Deserialize, Serialize};

/// An ordered history where index 0 is the most recent entry.
///
/// Price logs, paid-status logs, ticket status logs, and the payment and credit lists of an order are all stored
/// newest-first. Use [`HeadLog::current`] to read the latest state and [`HeadLog::record`] to add to it; never index
/// from the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeadLog<T>(Vec<T>);

impl<T> Default for HeadLog<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> HeadLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest entry, if any.
    pub fn current(&self) -> Option<&T> {
        self.0.first()
    }

    /// Makes `entry` the latest entry.
    pub fn record(&mut self, entry: T) {
        self.0.insert(0, entry);
    }

    pub fn with(mut self, entry: T) -> Self {
        self.record(entry);
        self
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.0.get_mut(index)
    }

    /// Iterates newest-first, yielding the log index alongside each entry.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &T)> {
        self.0.iter().enumerate()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> From<Vec<T>> for HeadLog<T> {
    /// `entries` must already be ordered newest-first.
    fn from(entries: Vec<T>) -> Self {
        Self(entries)
    }
}

impl<'a, T> IntoIterator for &'a HeadLog<T> {
    type IntoIter = std::slice::Iter<'a, T>;
    type Item = &'a T;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_prepends() {
        let mut log = HeadLog::new();
        assert!(log.current().is_none());
        log.record("first");
        log.record("second");
        assert_eq!(log.current(), Some(&"second"));
        assert_eq!(log.get(1), Some(&"first"));
        assert_eq!(serde_json::to_string(&log).unwrap(), r#"["second","first"]"#);
    }
}

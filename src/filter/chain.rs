use std::collections::HashMap;

use super::Filter;

/// Labelled filters in insertion order.
///
/// Re-inserting an existing label replaces its filter in place; removing and
/// adding it again moves it to the end.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    order: Vec<String>,
    filters: HashMap<String, Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, filter: Filter) -> Option<Filter> {
        let label = label.into();
        let previous = self.filters.insert(label.clone(), filter);
        if previous.is_none() {
            self.order.push(label);
        }
        previous
    }

    pub fn remove(&mut self, label: &str) -> Option<Filter> {
        let removed = self.filters.remove(label)?;
        self.order.retain(|l| l != label);
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.filters.clear();
    }

    pub fn get(&self, label: &str) -> Option<&Filter> {
        self.filters.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.filters.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Filter)> {
        self.order
            .iter()
            .filter_map(|label| self.filters.get(label).map(|f| (label.as_str(), f)))
    }

    /// Folds every filter in insertion order.
    pub fn combined(&self) -> Filter {
        Filter::fold(self.iter().map(|(_, filter)| filter))
    }
}

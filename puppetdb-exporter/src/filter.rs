//! Operator-selected report categories.
//!
//! PuppetDB reports metrics under many categories (`resources`, `time`,
//! `changes`, `events`, ...). Only the selected ones are exported, the rest
//! are dropped silently.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    categories: BTreeSet<String>,
}

impl CategoryFilter {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds the filter from a comma-separated list (`"resources,time"`).
    /// Entries are trimmed and empty entries ignored.
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty()),
        )
    }

    /// Exact, case-sensitive membership test.
    pub fn admits(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    /// Selected categories in sorted order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }
}

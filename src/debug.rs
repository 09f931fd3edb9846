//! Debug utilities for inspecting domain states.
//!
//! Every domain can render itself as a [`DomainTree`]: a label, a list of
//! entries describing its own state, and the trees of the domains it wraps.
//! These are primarily useful in tests, demos and log output.

use std::fmt;

/// A structured dump of a (possibly composite) domain state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainTree {
    /// Name of the domain.
    pub label: String,
    /// One line per tracked fact.
    pub entries: Vec<String>,
    /// Dumps of wrapped child domains.
    pub children: Vec<DomainTree>,
}

impl DomainTree {
    pub fn new(label: impl Into<String>) -> Self {
        DomainTree {
            label: label.into(),
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: impl fmt::Display) -> Self {
        self.entries.push(entry.to_string());
        self
    }

    pub fn entries<I, T>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        self.entries.extend(entries.into_iter().map(|e| e.to_string()));
        self
    }

    pub fn child(mut self, child: DomainTree) -> Self {
        self.children.push(child);
        self
    }

    /// Total number of entries in this tree and all subtrees.
    pub fn size(&self) -> usize {
        self.entries.len() + self.children.iter().map(|c| c.size()).sum::<usize>()
    }

    /// Depth of the tree (a leaf domain has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}:", "", self.label, indent = indent)?;
        for entry in &self.entries {
            writeln!(f, "{:indent$}  {}", "", entry, indent = indent)?;
        }
        for child in &self.children {
            child.write_indented(f, indent + 2)?;
        }
        Ok(())
    }
}

impl fmt::Display for DomainTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

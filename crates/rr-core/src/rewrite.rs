//! Literal text replacement over a document's text nodes.
//!
//! The pass is whole-document: every call visits every text node
//! under the body, applies every active rule in list order, and writes a node
//! back only when some rule matched.

use regex::{NoExpand, Regex};

use crate::pattern::literal_regex;
use crate::types::TextRule;

/// Errors raised while walking a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Document traversal failed: {0}")]
    Traversal(String),
    #[error("Text write failed: {0}")]
    Write(String),
}

/// Read/write access to the text nodes of a document.
pub trait TextTree {
    /// Visit every text node under the body in document order.
    ///
    /// `visit` receives the node's text and returns the replacement to write
    /// back, or `None` to leave the node untouched. A document without a body
    /// visits nothing.
    fn for_each_text_node(
        &mut self,
        visit: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<(), DomError>;
}

/// Counters for one replacement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub nodes_visited: usize,
    pub nodes_rewritten: usize,
    pub replacements: usize,
}

struct PreparedRule {
    from: String,
    regex: Regex,
    to: String,
}

/// Active text rules prepared for substitution.
pub struct TextRewriter {
    rules: Vec<PreparedRule>,
}

impl TextRewriter {
    /// Prepare the enabled, non-empty rules in list order.
    pub fn new(rules: &[TextRule]) -> Self {
        let prepared = rules
            .iter()
            .filter(|rule| rule.is_active())
            .filter_map(|rule| match literal_regex(&rule.from) {
                Ok(regex) => Some(PreparedRule {
                    from: rule.from.clone(),
                    regex,
                    to: rule.to.clone(),
                }),
                Err(e) => {
                    // Escaped literals compile unless they exceed the size limit
                    log::warn!("Skipping text rule '{}': {}", rule.from, e);
                    None
                }
            })
            .collect();
        Self { rules: prepared }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Apply all rules to `text`, cumulatively, in list order.
    /// Returns the new text and the number of substitutions, or `None` if no
    /// rule matched.
    pub fn rewrite(&self, text: &str) -> Option<(String, usize)> {
        let mut current = text.to_string();
        let mut modified = false;
        let mut count = 0usize;

        for rule in &self.rules {
            if !current.contains(rule.from.as_str()) {
                continue;
            }
            count += rule.regex.find_iter(&current).count();
            current = rule
                .regex
                .replace_all(&current, NoExpand(&rule.to))
                .into_owned();
            modified = true;
        }

        modified.then_some((current, count))
    }

    /// Run one full pass over `tree`.
    pub fn apply<T: TextTree + ?Sized>(&self, tree: &mut T) -> Result<PassStats, DomError> {
        let mut stats = PassStats::default();
        if self.rules.is_empty() {
            return Ok(stats);
        }

        tree.for_each_text_node(&mut |text| {
            stats.nodes_visited += 1;
            let (rewritten, count) = self.rewrite(text)?;
            stats.nodes_rewritten += 1;
            stats.replacements += count;
            Some(rewritten)
        })?;

        Ok(stats)
    }
}

/// Apply `rules` to a single string. Returns the input unchanged if nothing
/// matched.
pub fn apply_text_rules(text: &str, rules: &[TextRule]) -> String {
    TextRewriter::new(rules)
        .rewrite(text)
        .map(|(rewritten, _)| rewritten)
        .unwrap_or_else(|| text.to_string())
}

// =============================================================================
// In-memory Document
// =============================================================================

/// A flat list of text nodes standing in for a rendered page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextDocument {
    body: Option<Vec<String>>,
    writes: usize,
}

impl TextDocument {
    /// A document whose body holds `nodes`.
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            body: Some(nodes.into_iter().map(Into::into).collect()),
            writes: 0,
        }
    }

    /// A document that has not parsed its body yet.
    pub fn without_body() -> Self {
        Self {
            body: None,
            writes: 0,
        }
    }

    /// Append text nodes, as a subtree insertion would.
    pub fn insert<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body
            .get_or_insert_with(Vec::new)
            .extend(nodes.into_iter().map(Into::into));
    }

    pub fn texts(&self) -> &[String] {
        self.body.as_deref().unwrap_or(&[])
    }

    /// Number of node writes performed so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl TextTree for TextDocument {
    fn for_each_text_node(
        &mut self,
        visit: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<(), DomError> {
        let Some(nodes) = self.body.as_mut() else {
            return Ok(());
        };
        for node in nodes.iter_mut() {
            if let Some(text) = visit(node.as_str()) {
                *node = text;
                self.writes += 1;
            }
        }
        Ok(())
    }
}

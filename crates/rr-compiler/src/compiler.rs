use rr_core::pattern::classify;
use rr_core::types::{CompiledFilterRule, MatchKind, ResourceTypes, StorageSnapshot, UrlRule};

/// Every compiled rule is declared with this priority; ties resolve by id.
pub const DEFAULT_PRIORITY: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Resource types each redirect is scoped to
    pub resource_types: ResourceTypes,
    pub priority: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            resource_types: ResourceTypes::REDIRECTABLE,
            priority: DEFAULT_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub total: usize,
    /// Rules with an empty `from` or `to`
    pub inert: usize,
    /// Rules switched off individually
    pub disabled: usize,
    pub compiled: usize,
    pub regex: usize,
    pub literal: usize,
}

/// Compile URL rules with the default options.
pub fn compile(rules: &[UrlRule]) -> Vec<CompiledFilterRule> {
    compile_with(rules, &CompileOptions::default()).0
}

/// Compile URL rules into declarative redirect rules.
///
/// Inert and disabled rules are dropped; survivors keep their relative order
/// and receive contiguous ids starting at 1.
pub fn compile_with(
    rules: &[UrlRule],
    options: &CompileOptions,
) -> (Vec<CompiledFilterRule>, CompileStats) {
    let mut stats = CompileStats {
        total: rules.len(),
        ..CompileStats::default()
    };
    let mut compiled = Vec::with_capacity(rules.len());

    for (index, rule) in rules.iter().enumerate() {
        if rule.is_inert() {
            stats.inert += 1;
            log::debug!("Rule {}: skipped, empty source or destination", index + 1);
            continue;
        }
        if !rule.enabled {
            stats.disabled += 1;
            log::debug!("Rule {}: skipped, disabled", index + 1);
            continue;
        }

        let kind = classify(&rule.from);
        match kind {
            MatchKind::Regex => stats.regex += 1,
            MatchKind::Literal => stats.literal += 1,
        }

        let id = compiled.len() as u32 + 1;
        log::debug!(
            "Rule {}: {} - Using {} filter",
            id,
            rule.from,
            match kind {
                MatchKind::Regex => "regex",
                MatchKind::Literal => "url",
            }
        );

        compiled.push(CompiledFilterRule::redirect(
            id,
            options.priority,
            kind,
            &rule.from,
            &rule.to,
            options.resource_types,
        ));
    }

    stats.compiled = compiled.len();
    (compiled, stats)
}

/// Compile the URL rules of a snapshot, honoring the global switch.
pub fn compile_snapshot(
    snapshot: &StorageSnapshot,
    options: &CompileOptions,
) -> (Vec<CompiledFilterRule>, CompileStats) {
    if !snapshot.enabled {
        let stats = CompileStats {
            total: snapshot.url_rules.len(),
            ..CompileStats::default()
        };
        return (Vec::new(), stats);
    }
    compile_with(&snapshot.url_rules, options)
}

use rr_compiler::{compile_with, CompileOptions, CompileStats};
use rr_core::types::{CompiledFilterRule, UrlRule};
use rr_core::FilterInstallError;

use crate::engine::{FilterEngine, RuleUpdate};

/// Outcome of a successful reinstall.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Previously installed rules that were removed
    pub removed: usize,
    pub installed: usize,
    pub stats: CompileStats,
}

/// Replace every dynamic rule with the compilation of `rules`.
///
/// All previously installed ids are removed in the same update that adds the
/// new rules. When `enabled` is false the engine ends up empty.
pub async fn install_filters(
    engine: &dyn FilterEngine,
    rules: &[UrlRule],
    enabled: bool,
    options: &CompileOptions,
) -> Result<InstallReport, FilterInstallError> {
    let (compiled, stats) = if enabled {
        compile_with(rules, options)
    } else {
        (Vec::new(), CompileStats::default())
    };

    let existing = engine.get_dynamic_rules().await?;
    let update = RuleUpdate {
        remove_rule_ids: existing.iter().map(|rule| rule.id).collect(),
        add_rules: compiled,
    };
    let installed = update.add_rules.len();
    engine.update_dynamic_rules(update).await?;

    log::info!(
        "Filters updated: removed {}, installed {} ({} regex, {} url)",
        existing.len(),
        installed,
        stats.regex,
        stats.literal
    );

    // Read back what the engine holds now
    match engine.get_dynamic_rules().await {
        Ok(current) => log_installed(&current),
        Err(e) => log::warn!("Could not read back installed filters: {}", e),
    }

    Ok(InstallReport {
        removed: existing.len(),
        installed,
        stats,
    })
}

fn log_installed(rules: &[CompiledFilterRule]) {
    for rule in rules {
        log::debug!(
            "Installed rule {}: {} -> {}",
            rule.id,
            rule.pattern(),
            rule.redirect_to().unwrap_or("")
        );
    }
}

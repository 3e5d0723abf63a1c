//! Rerouter CLI
//!
//! CLI tool for compiling redirect rules and checking rule files offline.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use rr_compiler::{build_ruleset, compile_snapshot, validate_ruleset, CompileOptions};
use rr_core::exchange::ExportFile;
use rr_core::storage::{detect_schema_version, StorageItems, MIGRATION_KEYS, SCHEMA_VERSION};
use rr_core::types::{ResourceType, StorageSnapshot, TextRule, UrlRule};
use rr_core::{apply_text_rules, plan_migration};
use rr_sync::{install_filters, MemoryFilterEngine};

mod rules_file;

use rules_file::{load_items, load_snapshot, write_text};

#[derive(Parser)]
#[command(name = "rr-cli")]
#[command(about = "Rerouter rule compiler and tools")]
struct Cli {
    /// Debug logging (otherwise RUST_LOG or info)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile URL rules into a declarative redirect ruleset
    Compile {
        /// Export file or storage items
        #[arg(short, long)]
        input: PathBuf,

        /// Output ruleset file
        #[arg(short, long, default_value = "ruleset.json")]
        output: PathBuf,

        /// Pretty-print the ruleset
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a rules file and check every compiled rule
    Validate {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show which rule redirects a URL
    TestUrl {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        url: String,

        /// Resource type of the request
        #[arg(short = 't', long = "type", default_value = "main_frame")]
        resource_type: String,
    },

    /// Apply text rules to a string
    TestText {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        text: String,
    },

    /// Migrate legacy storage items to the current format
    Migrate {
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to overwriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write an example export file
    ExportTemplate {
        #[arg(short, long, default_value = "rerouter-rules.json")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            pretty,
        } => cmd_compile(&input, &output, pretty),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::TestUrl {
            input,
            url,
            resource_type,
        } => cmd_test_url(&input, &url, &resource_type),
        Commands::TestText { input, text } => cmd_test_text(&input, &text),
        Commands::Migrate { input, output } => {
            let output = output.unwrap_or_else(|| input.clone());
            cmd_migrate(&input, &output)
        }
        Commands::ExportTemplate { output } => cmd_export_template(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(input: &Path, output: &Path, pretty: bool) -> Result<(), String> {
    let start = Instant::now();
    let snapshot = load_snapshot(input)?;
    let (rules, stats) = compile_snapshot(&snapshot, &CompileOptions::default());

    let errors = validate_ruleset(&rules);
    if let Some(first) = errors.first() {
        return Err(format!(
            "{} rule(s) would be rejected by the browser, first: {}",
            errors.len(),
            first
        ));
    }

    write_text(output, &build_ruleset(&rules, pretty))?;

    println!("Compiled {} URL rules to '{}'", stats.total, output.display());
    if !snapshot.enabled {
        println!("  Globally disabled: ruleset is empty");
    }
    println!(
        "  Rules:    {} compiled ({} regex, {} url), {} inert, {} disabled",
        stats.compiled, stats.regex, stats.literal, stats.inert, stats.disabled
    );
    println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}

fn cmd_validate(input: &Path) -> Result<(), String> {
    let snapshot = load_snapshot(input)?;
    // Compile regardless of the global switch so every rule gets checked
    let all = StorageSnapshot {
        enabled: true,
        ..snapshot.clone()
    };
    let (rules, stats) = compile_snapshot(&all, &CompileOptions::default());
    let errors = validate_ruleset(&rules);

    println!("Rules file '{}'", input.display());
    println!("  URL rules:   {} ({} active)", stats.total, stats.compiled);
    println!(
        "  Text rules:  {} ({} active)",
        snapshot.text_rules.len(),
        snapshot.text_rules.iter().filter(|r| r.is_active()).count()
    );
    println!("  Enabled:     {}", snapshot.enabled);

    if errors.is_empty() {
        println!("  All compiled rules are valid");
        return Ok(());
    }
    for error in &errors {
        println!("  {}", error);
    }
    Err(format!("{} invalid rule(s)", errors.len()))
}

fn cmd_test_url(input: &Path, url: &str, resource_type: &str) -> Result<(), String> {
    let resource_type = ResourceType::parse(resource_type)
        .ok_or_else(|| format!("Unknown resource type '{}'", resource_type))?;
    let snapshot = load_snapshot(input)?;

    let engine = MemoryFilterEngine::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    runtime
        .block_on(install_filters(
            &engine,
            &snapshot.url_rules,
            snapshot.enabled,
            &CompileOptions::default(),
        ))
        .map_err(|e| format!("Install failed: {}", e))?;

    match engine.match_request(url, resource_type) {
        Some(hit) => {
            let rule = engine
                .installed()
                .into_iter()
                .find(|rule| rule.id == hit.rule_id);
            println!("Redirect -> {}", hit.redirect_url);
            if let Some(rule) = rule {
                println!("  Rule {}: {} ({:?})", rule.id, rule.pattern(), rule.match_kind());
            }
        }
        None => println!("No rule matches"),
    }
    Ok(())
}

fn cmd_test_text(input: &Path, text: &str) -> Result<(), String> {
    let snapshot = load_snapshot(input)?;
    if !snapshot.enabled {
        println!("{}", text);
        return Ok(());
    }
    println!("{}", apply_text_rules(text, &snapshot.text_rules));
    Ok(())
}

fn cmd_migrate(input: &Path, output: &Path) -> Result<(), String> {
    let mut items = load_items(input)?;
    let relevant: StorageItems = MIGRATION_KEYS
        .iter()
        .filter_map(|key| items.get(*key).map(|value| (key.to_string(), value.clone())))
        .collect();
    let plan = plan_migration(&relevant).map_err(|e| format!("Migration failed: {}", e))?;
    let version = detect_schema_version(&relevant).map_err(|e| format!("Migration failed: {}", e))?;

    if plan.is_empty() {
        println!("'{}' is already in the current format", input.display());
        return Ok(());
    }

    items.extend(plan.writes);
    let json = serde_json::to_string_pretty(&items)
        .map_err(|e| format!("Failed to serialize JSON: {}", e))?;
    write_text(output, &json)?;

    println!("Migrated '{}' to '{}'", input.display(), output.display());
    println!("  Schema:      v{} -> v{}", version, SCHEMA_VERSION);
    if let Some(count) = plan.url_rules_migrated {
        println!("  URL rules:   {}", count);
    }
    if let Some(count) = plan.text_rules_migrated {
        println!("  Text rules:  {}", count);
    }
    Ok(())
}

fn cmd_export_template(output: &Path) -> Result<(), String> {
    let snapshot = StorageSnapshot {
        url_rules: vec![
            UrlRule::new("avatar-management", "https://example.com/avatar.png"),
            UrlRule::new("^https://old\\.example\\.com/(.*)", "https://new.example.com/"),
        ],
        text_rules: vec![TextRule::new("Hello", "Hi")],
        enabled: true,
    };
    write_text(output, &ExportFile::now(snapshot).to_json_pretty())?;
    println!("Wrote template to '{}'", output.display());
    Ok(())
}

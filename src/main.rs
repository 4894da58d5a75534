use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use metrics_gen::config::{self, PatcherConfig, DEFAULT_CONFIG_FILE};
use metrics_gen::directive::{Attachment, Directive};
use metrics_gen::manifest::{CargoAddFetcher, DependencyOutcome};
use metrics_gen::pipeline::{self, RunReport};
use metrics_gen::{ProviderKind, RunContext};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metrics-gen")]
#[command(about = "Generate instrumentation from `// +trace:` directives", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every directive and splice the generated code
    Generate {
        #[command(flatten)]
        roots: Roots,

        /// Overwrite the source files
        #[arg(short, long, conflicts_with = "suffix")]
        inplace: bool,

        /// Write `<stem>_<SUFFIX>.rs` next to each patched file
        #[arg(short, long)]
        suffix: Option<String>,

        /// Code generator to use
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// Prefix prepended to every metric name
        #[arg(long)]
        metrics_prefix: Option<String>,

        /// Dry run - report what would be written without touching files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Debug logging
        #[arg(short, long)]
        verbose: bool,

        /// Show unified diff of changes
        #[arg(long)]
        diff: bool,

        /// Do not run `cargo add` for missing dependencies
        #[arg(long)]
        no_fetch: bool,

        /// Config file (defaults to ./metrics-gen.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List the directives found under the source roots
    Scan {
        #[command(flatten)]
        roots: Roots,

        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Args)]
struct Roots {
    /// Directory to scan (not descending into subdirectories)
    #[arg(short, long = "dir", value_name = "DIR")]
    dirs: Vec<PathBuf>,

    /// Directory to scan recursively
    #[arg(short, long = "recursive", value_name = "DIR")]
    recursive: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            roots,
            inplace,
            suffix,
            provider,
            metrics_prefix,
            dry_run,
            verbose,
            diff,
            no_fetch,
            config,
        } => {
            let mut settings = base_config(config.as_deref())?;
            settings.dirs.extend(roots.dirs);
            settings.recursive_dirs.extend(roots.recursive);
            if inplace {
                settings.inplace = true;
                settings.suffix = None;
            }
            if let Some(suffix) = suffix {
                settings.suffix = Some(suffix);
                settings.inplace = false;
            }
            if let Some(provider) = provider {
                settings.provider = provider;
            }
            if metrics_prefix.is_some() {
                settings.metrics_prefix = metrics_prefix;
            }
            settings.dry_run |= dry_run;
            settings.verbose |= verbose;
            if no_fetch {
                settings.fetch_dependencies = false;
            }

            init_logging(settings.verbose);
            let settings = config::check(settings)?;
            cmd_generate(&settings, diff)
        }

        Commands::Scan { roots, verbose } => {
            init_logging(verbose);
            let settings = PatcherConfig {
                dirs: roots.dirs,
                recursive_dirs: roots.recursive,
                ..PatcherConfig::default()
            };
            if settings.dirs.is_empty() && settings.recursive_dirs.is_empty() {
                anyhow::bail!("no source directories given (use --dir or --recursive)");
            }
            cmd_scan(&settings)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Settings from `--config`, or from `./metrics-gen.toml` if it exists.
fn base_config(explicit: Option<&Path>) -> Result<PatcherConfig> {
    if let Some(path) = explicit {
        return Ok(config::parse_from_path(path)?);
    }
    let default = Path::new(DEFAULT_CONFIG_FILE);
    if default.is_file() {
        println!(
            "{}",
            format!("Using config {}", default.display()).dimmed()
        );
        return Ok(config::parse_from_path(default)?);
    }
    Ok(PatcherConfig::default())
}

/// Helper: Show unified diff between original and generated content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (generated)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn cmd_generate(settings: &PatcherConfig, show_diff: bool) -> Result<()> {
    let mut ctx = RunContext::new();
    let fetcher = CargoAddFetcher::new();

    if settings.dry_run {
        println!("{}", "[DRY RUN - nothing will be written]".cyan());
    }

    let report = pipeline::generate(settings, &mut ctx, &fetcher)
        .context("generation aborted; no file was written")?;

    for file in &report.written {
        let verb = if file.written { "Wrote" } else { "Would write" };
        println!(
            "{} {} {}",
            "✓".green(),
            verb,
            file.destination.display()
        );
        if show_diff {
            display_diff(&file.destination, &file.original, &file.contents);
        }
    }

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    println!("{}", "Summary:".bold());
    println!("  provider {}", report.provider.cyan());
    println!("  run {}", report.token.dimmed());
    println!(
        "  {} directive(s) applied in {} file(s)",
        format!("{}", report.summary.applied).green(),
        report.summary.files
    );
    println!(
        "  {} directive(s) without generated code",
        format!("{}", report.summary.skipped).yellow()
    );

    match &report.dependencies {
        DependencyOutcome::Skipped(reason) => {
            println!("  {} dependencies not checked ({})", "⊘".cyan(), reason)
        }
        DependencyOutcome::NoManifest => println!(
            "  {} no Cargo.toml found; add the dependencies by hand",
            "⊙".yellow()
        ),
        DependencyOutcome::UpToDate => println!("  {} dependencies up to date", "✓".green()),
        DependencyOutcome::Fetched(deps) => {
            for dep in deps {
                println!("  {} added {}", "✓".green(), dep);
            }
        }
        DependencyOutcome::Failed { missing, error } => {
            eprintln!("  {} {}", "✗".red(), error);
            for dep in missing {
                eprintln!("    add by hand: {}", dep);
            }
        }
    }
}

fn cmd_scan(settings: &PatcherConfig) -> Result<()> {
    let files = pipeline::scan(settings)?;
    let mut total = 0;

    for file in &files {
        println!("{}", file.path.display().to_string().bold());
        for directive in &file.directives {
            println!("  {}", describe(directive));
            total += 1;
        }
    }

    println!();
    println!(
        "{} directive(s) in {} file(s)",
        format!("{}", total).green(),
        files.len()
    );
    Ok(())
}

fn describe(directive: &Directive) -> String {
    let params = directive
        .params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    let target = match &directive.attachment {
        Attachment::Item {
            function: Some(function),
            ..
        } => format!("fn {}", function.name),
        Attachment::Item { kind, .. } => kind.clone(),
        Attachment::Statement { function, .. } => format!("statement in fn {}", function.name),
        Attachment::Detached => "detached".to_string(),
    };
    format!(
        "{:>5}  {:<16} {}  {}",
        directive.line,
        directive.kind.to_string().cyan(),
        target.dimmed(),
        params
    )
}

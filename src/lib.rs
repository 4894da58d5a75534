//! metrics-gen: directive-driven instrumentation for Rust sources
//!
//! Source files are annotated with `// +trace:<kind> key=value` comments.
//! The generator finds them, asks a template provider for the code each
//! one stands for, and splices that code next to the annotated item or
//! statement. Everything it inserts is wrapped in region markers carrying
//! a per-run token, so a second run over the same files is refused.
//!
//! # Architecture
//!
//! All splices compile down to a single primitive: [`Edit`], a verified
//! byte-span replacement. Files are parsed with tree-sitter and the tree
//! is updated incrementally after every splice, which keeps comments and
//! formatting exactly as written.
//!
//! - [`directive`] recognizes directive comments.
//! - [`source`] loads files, attaches directives and enforces the single
//!   `define` rule.
//! - [`provider`] renders directives into [`fragment::CodeFragment`]s.
//! - [`engine`] resolves imports and splices fragments.
//! - [`writer`] and [`manifest`] persist the result.
//!
//! # Example
//!
//! ```no_run
//! use metrics_gen::config::PatcherConfig;
//! use metrics_gen::manifest::CargoAddFetcher;
//! use metrics_gen::{generate, RunContext};
//!
//! let config = PatcherConfig {
//!     recursive_dirs: vec!["src".into()],
//!     inplace: true,
//!     ..PatcherConfig::default()
//! };
//! let mut ctx = RunContext::new();
//! match generate(&config, &mut ctx, &CargoAddFetcher::new()) {
//!     Ok(report) => println!("patched {} file(s)", report.written.len()),
//!     Err(e) => eprintln!("generation failed: {}", e),
//! }
//! ```

pub mod config;
pub mod context;
pub mod directive;
pub mod edit;
pub mod engine;
pub mod fragment;
pub mod manifest;
pub mod pipeline;
pub mod pool;
pub mod provider;
pub mod source;
pub mod ts;
pub mod writer;

// Re-exports
pub use config::{load_from_path, load_from_str, ConfigError, PatcherConfig};
pub use context::RunContext;
pub use directive::{scan_comment, Directive, DirectiveError, DirectiveKind};
pub use edit::{Edit, EditError, EditVerification};
pub use engine::{PatchEngine, PatchError};
pub use fragment::{CodeFragment, FragmentError};
pub use manifest::{CargoAddFetcher, Dependency, DependencyFetcher, ManifestError};
pub use pipeline::{generate, scan, RunError, RunReport};
pub use provider::{create_provider, ProviderError, ProviderKind, TemplateProvider};
pub use source::{SourceCollection, SourceError, SourceFile};
pub use ts::{QueryEngine, QueryMatch, RustParser, TreeSitterError};
pub use writer::{OutputMode, WriteError, Writer};

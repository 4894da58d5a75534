//! End-to-end runs of the generator over temporary source trees.

use metrics_gen::config::PatcherConfig;
use metrics_gen::manifest::{Dependency, DependencyFetcher, DependencyOutcome, ManifestError};
use metrics_gen::pipeline::{generate, scan};
use metrics_gen::{
    DirectiveKind, PatchError, ProviderError, ProviderKind, RunContext, RunError, SourceError,
};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MAIN: &str = r#"use std::thread;

// +trace:define prom-port=9400
fn main() {
    thread::spawn(worker::work).join().ok();
}
"#;

const WORKER: &str = r#"// +trace:func-exec-time
pub fn work() {
    let jobs = vec![1, 2, 3];
    // +trace:inner-counter name=jobs_seen
    for job in jobs {
        println!("{job}");
    }
}
"#;

const UTIL: &str = "pub fn helper() -> u32 {\n    42\n}\n";

#[derive(Default)]
struct RecordingFetcher {
    calls: RefCell<Vec<Vec<Dependency>>>,
}

impl DependencyFetcher for RecordingFetcher {
    fn fetch(&self, _manifest: &Path, deps: &[Dependency]) -> Result<(), ManifestError> {
        self.calls.borrow_mut().push(deps.to_vec());
        Ok(())
    }
}

fn workspace(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).unwrap();
    }
    dir
}

fn config(dir: &Path) -> PatcherConfig {
    PatcherConfig {
        dirs: vec![dir.to_path_buf()],
        inplace: true,
        fetch_dependencies: false,
        ..PatcherConfig::default()
    }
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

fn file_names(paths: impl Iterator<Item = PathBuf>) -> Vec<String> {
    paths
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_single_define_generates_everything() {
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER), ("util.rs", UTIL)]);
    let mut ctx = RunContext::with_seed("run-1", 11);

    let report = generate(&config(dir.path()), &mut ctx, &RecordingFetcher::default()).unwrap();

    assert_eq!(report.provider, "prometheus");
    assert_eq!(report.summary.files, 2);
    assert_eq!(report.summary.applied, 3);
    assert_eq!(
        file_names(report.written.iter().map(|w| w.destination.clone())),
        vec!["main.rs", "worker.rs"]
    );

    let main = read(dir.path(), "main.rs");
    assert!(main.starts_with(
        "// +trace:begin-generated uuid=run-1\nuse ::ctor;\nuse ::prometheus;\nuse ::tiny_http;\n// +trace:end-generated uuid=run-1\nuse std::thread;\n"
    ));
    assert!(main.contains(
        "// +trace:define prom-port=9400\n// +trace:begin-generated uuid=run-1\n#[ctor::ctor]\nfn metrics_gen_init() {"
    ));
    assert!(main.contains("\"0.0.0.0:9400\""));
    assert!(main.contains("// +trace:end-generated uuid=run-1\nfn main() {"));

    let worker = read(dir.path(), "worker.rs");
    // statement-level declarations land above the enclosing function's leading comments
    assert!(worker.starts_with(
        "// +trace:begin-generated uuid=run-1\nuse ::prometheus;\n// +trace:end-generated uuid=run-1\n\n// +trace:begin-generated uuid=run-1\nstatic METRICS_GEN_WORK_JOBS_SEEN_"
    ));
    assert!(worker.contains(
        "// +trace:end-generated uuid=run-1\n\n// +trace:func-exec-time\n// +trace:begin-generated uuid=run-1\nstatic METRICS_GEN_WORK_DURATION:"
    ));
    assert!(worker.contains(
        "pub fn work() {\n    // +trace:begin-generated uuid=run-1\n    let _metrics_gen_timer = METRICS_GEN_WORK_DURATION.start_timer();\n    // +trace:end-generated uuid=run-1\n    let jobs"
    ));
    assert!(worker.contains("\"worker_work_duration_seconds\""));
    assert!(worker.contains(
        "    // +trace:inner-counter name=jobs_seen\n    // +trace:begin-generated uuid=run-1\n    METRICS_GEN_WORK_JOBS_SEEN_"
    ));
    assert!(worker.contains(".inc();\n    // +trace:end-generated uuid=run-1\n    for job in jobs {"));

    assert_eq!(read(dir.path(), "util.rs"), UTIL);
}

#[test]
fn test_missing_define_writes_nothing() {
    let dir = workspace(&[("worker.rs", WORKER), ("util.rs", UTIL)]);
    let mut ctx = RunContext::with_seed("run", 1);

    let err = generate(&config(dir.path()), &mut ctx, &RecordingFetcher::default()).unwrap_err();

    assert!(matches!(
        err,
        RunError::Provider(ProviderError::NoDefinition)
    ));
    assert_eq!(read(dir.path(), "worker.rs"), WORKER);
}

#[test]
fn test_two_defines_write_nothing() {
    let second = "// +trace:define\npub fn other() {}\n";
    let dir = workspace(&[("main.rs", MAIN), ("other.rs", second), ("worker.rs", WORKER)]);
    let mut ctx = RunContext::with_seed("run", 1);

    let err = generate(&config(dir.path()), &mut ctx, &RecordingFetcher::default()).unwrap_err();

    assert!(matches!(
        err,
        RunError::Source(SourceError::MultipleDefinitions { .. })
    ));
    assert_eq!(read(dir.path(), "main.rs"), MAIN);
    assert_eq!(read(dir.path(), "other.rs"), second);
    assert_eq!(read(dir.path(), "worker.rs"), WORKER);
}

#[test]
fn test_second_run_is_refused() {
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER)]);
    generate(
        &config(dir.path()),
        &mut RunContext::with_seed("first", 1),
        &RecordingFetcher::default(),
    )
    .unwrap();
    let after_first = read(dir.path(), "worker.rs");

    let err = generate(
        &config(dir.path()),
        &mut RunContext::with_seed("second", 2),
        &RecordingFetcher::default(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        RunError::Provider(ProviderError::Patch(PatchError::AlreadyGenerated { .. }))
    ));
    assert_eq!(read(dir.path(), "worker.rs"), after_first);
}

#[test]
fn test_dry_run_touches_nothing() {
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER), ("Cargo.toml", "[package]\nname = \"app\"\n")]);
    let mut settings = config(dir.path());
    settings.dry_run = true;
    settings.fetch_dependencies = true;
    let fetcher = RecordingFetcher::default();

    let report = generate(&settings, &mut RunContext::with_seed("dry", 1), &fetcher).unwrap();

    assert_eq!(report.written.len(), 2);
    assert!(report.written.iter().all(|w| !w.written));
    assert!(report.written[1].contents.contains("start_timer()"));
    assert!(matches!(report.dependencies, DependencyOutcome::Skipped(_)));
    assert!(fetcher.calls.borrow().is_empty());
    assert_eq!(read(dir.path(), "main.rs"), MAIN);
    assert_eq!(read(dir.path(), "worker.rs"), WORKER);
}

#[test]
fn test_alias_collision_is_renamed_everywhere() {
    let colliding = r#"use crate::stats as prometheus;

// +trace:func-exec-time
pub fn work() {
    prometheus::record();
}
"#;
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", colliding)]);

    generate(
        &config(dir.path()),
        &mut RunContext::with_seed("alias", 3),
        &RecordingFetcher::default(),
    )
    .unwrap();

    let worker = read(dir.path(), "worker.rs");
    let marker = "use ::prometheus as ";
    let start = worker.find(marker).expect("renamed import") + marker.len();
    let alias = &worker[start..start + worker[start..].find(';').unwrap()];
    assert!(alias.starts_with("prometheus_"), "{alias}");

    assert!(worker.contains("use crate::stats as prometheus;"));
    assert!(worker.contains("    prometheus::record();"));
    assert!(worker.contains(&format!("::std::sync::LazyLock<{alias}::Histogram>")));
    assert!(worker.contains(&format!("{alias}::HistogramOpts::new(")));
    assert!(worker.contains(&format!("{alias}::default_registry().register(")));
    assert!(!worker.contains("LazyLock<prometheus::Histogram>"));
}

#[test]
fn test_existing_import_is_reused() {
    let existing = "use ::prometheus as prom;\n\n// +trace:func-exec-time\npub fn work() {}\n";
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", existing)]);

    generate(
        &config(dir.path()),
        &mut RunContext::with_seed("reuse", 3),
        &RecordingFetcher::default(),
    )
    .unwrap();

    let worker = read(dir.path(), "worker.rs");
    assert_eq!(worker.matches("use ::prometheus").count(), 1);
    assert!(worker.contains("LazyLock<prom::Histogram>"));
}

#[test]
fn test_suffix_output_naming() {
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER), ("util.rs", UTIL)]);
    let settings = PatcherConfig {
        dirs: vec![dir.path().to_path_buf()],
        suffix: Some("gen".to_string()),
        fetch_dependencies: false,
        ..PatcherConfig::default()
    };

    let report = generate(&settings, &mut RunContext::with_seed("sfx", 1), &RecordingFetcher::default()).unwrap();

    assert_eq!(
        file_names(report.written.iter().map(|w| w.destination.clone())),
        vec!["main_gen.rs", "worker_gen.rs"]
    );
    assert_eq!(read(dir.path(), "main.rs"), MAIN);
    assert_eq!(read(dir.path(), "worker.rs"), WORKER);
    assert!(read(dir.path(), "worker_gen.rs").contains("start_timer()"));
    assert!(!dir.path().join("util_gen.rs").exists());

    // outputs of the previous run are not picked up as sources
    let report = generate(&settings, &mut RunContext::with_seed("sfx2", 1), &RecordingFetcher::default()).unwrap();
    assert_eq!(report.written.len(), 2);
}

#[test]
fn test_missing_dependencies_are_fetched() {
    let manifest = "[package]\nname = \"app\"\n\n[dependencies]\nctor = \"0.2\"\n";
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER), ("Cargo.toml", manifest)]);
    let mut settings = config(dir.path());
    settings.fetch_dependencies = true;
    let fetcher = RecordingFetcher::default();

    let report = generate(&settings, &mut RunContext::with_seed("deps", 1), &fetcher).unwrap();

    assert!(matches!(report.dependencies, DependencyOutcome::Fetched(ref d) if d.len() == 2));
    let calls = fetcher.calls.borrow();
    assert_eq!(calls.len(), 1);
    let names: Vec<_> = calls[0].iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["prometheus", "tiny_http"]);
}

#[test]
fn test_metrics_provider_end_to_end() {
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER)]);
    let mut settings = config(dir.path());
    settings.provider = ProviderKind::Metrics;
    settings.metrics_prefix = Some("svc".to_string());

    generate(&settings, &mut RunContext::with_seed("m", 1), &RecordingFetcher::default()).unwrap();

    let main = read(dir.path(), "main.rs");
    assert!(main.contains("use ::metrics_util::debugging;"));
    assert!(main.contains("debugging::DebuggingRecorder::new()"));
    let worker = read(dir.path(), "worker.rs");
    assert!(worker.contains("struct MetricsGenWorkTimer(::std::time::Instant);"));
    assert!(worker.contains("metrics::histogram!(\"svc_worker_work_duration_seconds\")"));
    assert!(worker.contains("metrics::counter!(\"svc_jobs_seen\").increment(1);"));
}

#[test]
fn test_scan_lists_directives() {
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER), ("util.rs", UTIL)]);

    let files = scan(&config(dir.path())).unwrap();

    assert_eq!(files.len(), 2);
    let kinds: Vec<_> = files[1].directives.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![DirectiveKind::FunctionTime, DirectiveKind::InlineCounter]
    );
}

#[test]
fn test_metrics_provider_honours_define_params() {
    let main = "// +trace:define interval=30s duration=10m runtime-metrics=true\nfn main() {}\n";
    let dir = workspace(&[("main.rs", main), ("worker.rs", WORKER)]);
    let mut settings = config(dir.path());
    settings.provider = ProviderKind::Metrics;

    generate(&settings, &mut RunContext::with_seed("m", 1), &RecordingFetcher::default()).unwrap();

    let main = read(dir.path(), "main.rs");
    assert!(main.contains("::std::thread::sleep(::std::time::Duration::from_nanos(30000000000u64));"));
    assert!(main.contains("let window = ::std::time::Duration::from_nanos(600000000000u64);"));
    assert!(main.contains("metrics-gen-runtime"));
}

const QUEUE: &str = r#"pub struct Queue {
    items: Vec<u32>,
}

impl Queue {
    // +trace:func-exec-time
    pub fn push(&mut self, item: u32) {
        self.items.push(item);
        // +trace:set name=queue_depth value=self.items.len()
        self.trim();
    }

    fn trim(&mut self) {}
}
"#;

#[test]
fn test_impl_methods_are_instrumented() {
    let dir = workspace(&[("main.rs", MAIN), ("queue.rs", QUEUE)]);

    let report = generate(&config(dir.path()), &mut RunContext::with_seed("q", 1), &RecordingFetcher::default()).unwrap();
    assert_eq!(report.summary.applied, 3);

    let queue = read(dir.path(), "queue.rs");
    let declared = queue.find("static METRICS_GEN_QUEUE_PUSH_DURATION").unwrap();
    let gauge = queue.find("static METRICS_GEN_QUEUE_PUSH_QUEUE_DEPTH_").unwrap();
    let block = queue.find("impl Queue {").unwrap();
    assert!(declared < block && gauge < block);
    assert!(queue.contains("\"queue_Queue_push_duration_seconds\""));
    assert!(queue.contains(
        "    pub fn push(&mut self, item: u32) {\n        // +trace:begin-generated uuid=q\n        let _metrics_gen_timer = METRICS_GEN_QUEUE_PUSH_DURATION.start_timer();\n        // +trace:end-generated uuid=q\n        self.items.push(item);"
    ));
    assert!(queue.contains(".set((self.items.len()) as f64);\n        // +trace:end-generated uuid=q\n        self.trim();"));
}

const DRAIN: &str = r#"pub fn drain(batches: Vec<Vec<u32>>) {
    for batch in batches {
        // +trace:inner-counter name=batches
        if batch.is_empty() {
            // +trace:inner-counter name=empty_batches
            continue;
        }
    }
}
"#;

#[test]
fn test_nested_blocks_are_instrumented() {
    let dir = workspace(&[("main.rs", MAIN), ("drain.rs", DRAIN)]);

    let report = generate(&config(dir.path()), &mut RunContext::with_seed("n", 1), &RecordingFetcher::default()).unwrap();
    assert_eq!(report.summary.applied, 3);

    let drain = read(dir.path(), "drain.rs");
    assert!(drain.contains(
        "        // +trace:inner-counter name=batches\n        // +trace:begin-generated uuid=n\n        METRICS_GEN_DRAIN_BATCHES_"
    ));
    assert!(drain.contains(
        "            // +trace:inner-counter name=empty_batches\n            // +trace:begin-generated uuid=n\n            METRICS_GEN_DRAIN_EMPTY_BATCHES_"
    ));
    assert!(drain.find("static METRICS_GEN_DRAIN_EMPTY_BATCHES_").unwrap() < drain.find("pub fn drain").unwrap());
}

#[test]
fn test_directive_in_inline_module_is_rejected() {
    let nested = "mod inner {\n    // +trace:func-exec-time\n    pub fn f() {}\n}\n";
    let dir = workspace(&[("main.rs", MAIN), ("nested.rs", nested)]);

    let err = generate(&config(dir.path()), &mut RunContext::with_seed("u", 1), &RecordingFetcher::default()).unwrap_err();

    assert!(matches!(
        err,
        RunError::Source(SourceError::Unreachable { line: 2, .. })
    ));
    assert_eq!(read(dir.path(), "main.rs"), MAIN);
}

#[test]
fn test_duplicate_metric_names_write_nothing() {
    let second = "pub fn other() {\n    // +trace:inner-counter name=jobs_seen\n    println!();\n}\n";
    let dir = workspace(&[("main.rs", MAIN), ("worker.rs", WORKER), ("other.rs", second)]);

    let err = generate(&config(dir.path()), &mut RunContext::with_seed("d", 1), &RecordingFetcher::default()).unwrap_err();

    match err {
        RunError::Provider(ProviderError::DuplicateMetric { name, path, first_path, .. }) => {
            assert_eq!(name, "jobs_seen");
            assert!(first_path.ends_with("other.rs"));
            assert!(path.ends_with("worker.rs"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(read(dir.path(), "main.rs"), MAIN);
    assert_eq!(read(dir.path(), "worker.rs"), WORKER);
    assert_eq!(read(dir.path(), "other.rs"), second);
}

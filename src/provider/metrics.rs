//! Instrumentation through the `metrics` facade.
//!
//! The define site installs the in-process debugging recorder from
//! `metrics-util` and dumps a snapshot to stderr at a fixed interval.
//! Histogram samples are kept for a sliding window and summarized on every
//! dump. Timers are drop guards recording into a histogram.

use crate::context::RunContext;
use crate::directive::DirectiveKind;
use crate::fragment::{CodeFragment, FragmentBuilder};
use crate::manifest::Dependency;
use crate::provider::site::{static_ident, type_ident};
use crate::provider::{
    escape, fill, literal, nanos_literal, DirectiveSite, ProviderError, ProviderSettings,
    TemplateProvider,
};
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);
pub const DEFAULT_RUNTIME_INTERVAL: Duration = Duration::from_secs(10);

const COOLDOWN_KEYS: &[&str] = &["cooldown", "cooldown-time"];

const REPORTER: &str = r#"#[$ctor::ctor]
fn metrics_gen_init() {
    let recorder = $debugging::DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    if let Err(err) = $metrics::set_global_recorder(recorder) {
        eprintln!("metrics-gen: cannot install recorder: {}", err);
        return;
    }%RUNTIME%
    let _ = ::std::thread::Builder::new()
        .name("metrics-gen-reporter".to_string())
        .spawn(move || {
            let window = ::std::time::Duration::from_nanos(%WINDOW%);
            let mut samples: ::std::collections::BTreeMap<
                ::std::string::String,
                ::std::collections::VecDeque<(::std::time::Instant, f64)>,
            > = ::std::collections::BTreeMap::new();
            loop {
                ::std::thread::sleep(::std::time::Duration::from_nanos(%NANOS%));
                let now = ::std::time::Instant::now();
                for (key, _, _, value) in snapshotter.snapshot().into_vec() {
                    let name = key.key().name().to_string();
                    match value {
                        $debugging::DebugValue::Histogram(values) => samples
                            .entry(name)
                            .or_default()
                            .extend(values.into_iter().map(|v| (now, v.into_inner()))),
                        other => eprintln!("metrics-gen: {} {:?}", name, other),
                    }
                }
                for (name, kept) in samples.iter_mut() {
                    while kept.front().is_some_and(|(at, _)| now.duration_since(*at) > window) {
                        kept.pop_front();
                    }
                    if kept.is_empty() {
                        continue;
                    }
                    let (mut min, mut max, mut sum) = (f64::MAX, f64::MIN, 0.0);
                    for (_, v) in kept.iter() {
                        min = min.min(*v);
                        max = max.max(*v);
                        sum += *v;
                    }
                    eprintln!(
                        "metrics-gen: {} count={} mean={} min={} max={}",
                        name,
                        kept.len(),
                        sum / kept.len() as f64,
                        min,
                        max
                    );
                }
            }
        });
}"#;

const RUNTIME: &str = r#"
    let _ = ::std::thread::Builder::new()
        .name("metrics-gen-runtime".to_string())
        .spawn(|| {
            let started = ::std::time::Instant::now();
            loop {
                $metrics::gauge!(%UPTIME%).set(started.elapsed().as_secs_f64());
                if let Ok(status) = ::std::fs::read_to_string("/proc/self/status") {
                    for line in status.lines() {
                        let mut fields = line.split_whitespace();
                        let (name, scale) = match fields.next() {
                            Some("VmRSS:") => (%RSS%, 1024.0),
                            Some("Threads:") => (%THREADS%, 1.0),
                            _ => continue,
                        };
                        if let Some(value) = fields.next().and_then(|v| v.parse::<f64>().ok()) {
                            $metrics::gauge!(name).set(value * scale);
                        }
                    }
                }
                ::std::thread::sleep(::std::time::Duration::from_nanos(%NANOS%));
            }
        });"#;

const GUARD: &str = r#"struct %TYPE%(::std::time::Instant);

impl ::std::ops::Drop for %TYPE% {
    fn drop(&mut self) {
        $metrics::histogram!(%NAME%).record(self.0.elapsed().as_secs_f64());
    }
}"#;

const LAST_SEEN: &str = "static %IDENT%: ::std::sync::Mutex<::std::option::Option<::std::time::Instant>> = ::std::sync::Mutex::new(None);";

const THROTTLED_GUARD: &str = r#"let _metrics_gen_guard = {
    let now = ::std::time::Instant::now();
    let mut last = %LAST%.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match *last {
        Some(seen) if now.duration_since(seen) < ::std::time::Duration::from_nanos(%NANOS%) => None,
        _ => {
            *last = Some(now);
            Some(%TYPE%(now))
        }
    }
};"#;

pub struct MetricsProvider {
    settings: ProviderSettings,
}

impl MetricsProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    fn define(&self, site: &DirectiveSite<'_>) -> Result<Option<CodeFragment>, ProviderError> {
        site.require_item()?;
        if site.flag("empty")? {
            return Ok(None);
        }
        let interval = positive(site, "interval", DEFAULT_INTERVAL)?;
        let window = positive(site, "duration", DEFAULT_WINDOW)?;
        let runtime = if site.flag("runtime-metrics")? {
            let every = positive(site, "runtime-metrics-interval", DEFAULT_RUNTIME_INTERVAL)?;
            fill(
                RUNTIME,
                &[
                    ("UPTIME", literal(&site.metric_name("metrics_gen_process_uptime_seconds")).as_str()),
                    ("RSS", literal(&site.metric_name("metrics_gen_process_resident_memory_bytes")).as_str()),
                    ("THREADS", literal(&site.metric_name("metrics_gen_process_threads")).as_str()),
                    ("NANOS", nanos_literal(every).as_str()),
                ],
            )
        } else {
            site.reject(
                &["runtime-metrics-interval"],
                "requires `runtime-metrics=true`",
            )?;
            String::new()
        };

        let mut builder = packages();
        builder
            .declaration(&fill(
                REPORTER,
                &[
                    ("RUNTIME", runtime.as_str()),
                    ("WINDOW", nanos_literal(window).as_str()),
                    ("NANOS", nanos_literal(interval).as_str()),
                ],
            ))
            .map_err(|e| site.template(e))?;
        Ok(Some(builder.build()))
    }

    fn function_time(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<CodeFragment, ProviderError> {
        let function = site.require_function()?;
        let cooldown = site.duration_any(COOLDOWN_KEYS)?;
        let name = match site.param("name") {
            Some(name) => site.metric_name(name),
            None => site.metric_name(&format!(
                "{}_{function}_duration_seconds",
                site.file_stem()
            )),
        };
        site.claim(ctx, &name, "histogram", true)?;
        let guard = type_ident(&[function.as_str(), "Timer"]);

        let mut builder = packages();
        builder
            .declaration(&guard_type(&guard, &name))
            .map_err(|e| site.template(e))?;
        match cooldown {
            Some(cooldown) => {
                let last = static_ident(&[function.as_str(), "last"]);
                builder
                    .declaration(&fill(LAST_SEEN, &[("IDENT", last.as_str())]))
                    .map_err(|e| site.template(e))?;
                builder
                    .statement(&fill(
                        THROTTLED_GUARD,
                        &[
                            ("LAST", last.as_str()),
                            ("NANOS", nanos_literal(cooldown).as_str()),
                            ("TYPE", guard.as_str()),
                        ],
                    ))
                    .map_err(|e| site.template(e))?;
            }
            None => {
                builder
                    .statement(&format!(
                        "let _metrics_gen_guard = {guard}(::std::time::Instant::now());"
                    ))
                    .map_err(|e| site.template(e))?;
            }
        }
        Ok(builder.build())
    }

    fn inline_time(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<CodeFragment, ProviderError> {
        let function = site.require_statement()?;
        site.reject(
            COOLDOWN_KEYS,
            "cooldown is only supported on function-level timing",
        )?;
        let digits = ctx.random_digits(8);
        let name = match site.param("name") {
            Some(name) => site.metric_name(name),
            None => site.metric_name(&format!("{}_{function}_{digits}", site.file_stem())),
        };
        site.claim(ctx, &name, "histogram", true)?;
        let guard = type_ident(&[function.as_str(), "Timer", digits.as_str()]);

        let mut builder = packages();
        builder
            .declaration(&guard_type(&guard, &name))
            .map_err(|e| site.template(e))?;
        builder
            .statement(&format!(
                "let _metrics_gen_guard_{digits} = {guard}(::std::time::Instant::now());"
            ))
            .map_err(|e| site.template(e))?;
        Ok(builder.build())
    }

    fn inline_counter(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<CodeFragment, ProviderError> {
        site.require_statement()?;
        let name = site.metric_name(site.required("name")?);
        site.claim(ctx, &name, "counter", true)?;

        let mut builder = packages();
        builder
            .statement(&fill(
                "$metrics::counter!(%NAME%).increment(1);",
                &[("NAME", literal(&name).as_str())],
            ))
            .map_err(|e| site.template(e))?;
        Ok(builder.build())
    }

    /// Gauge updated with `value` each time the statement is reached.
    fn set(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<CodeFragment, ProviderError> {
        site.require_statement()?;
        let name = site.metric_name(site.required("name")?);
        let value = site.expression("value")?;
        site.claim(ctx, &name, "gauge", true)?;

        let mut builder = packages();
        builder
            .statement(&fill(
                "$metrics::gauge!(%NAME%).set((%VALUE%) as f64);",
                &[
                    ("NAME", literal(&name).as_str()),
                    ("VALUE", escape(value).as_str()),
                ],
            ))
            .map_err(|e| site.template(e))?;
        Ok(builder.build())
    }
}

impl TemplateProvider for MetricsProvider {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn render(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<Option<CodeFragment>, ProviderError> {
        match site.kind() {
            DirectiveKind::Define => self.define(site),
            DirectiveKind::FunctionTime => self.function_time(site, ctx).map(Some),
            DirectiveKind::InlineTime => self.inline_time(site, ctx).map(Some),
            DirectiveKind::InlineCounter => self.inline_counter(site, ctx).map(Some),
            DirectiveKind::Set => self.set(site, ctx).map(Some),
            DirectiveKind::Empty => Ok(None),
            kind @ (DirectiveKind::RegionBegin | DirectiveKind::RegionEnd) => {
                Err(ProviderError::Unsupported {
                    path: site.path.to_path_buf(),
                    line: site.line(),
                    kind,
                    provider: self.name(),
                })
            }
        }
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![
            Dependency::new("ctor", "0.2"),
            Dependency::new("metrics", "0.24"),
            Dependency::new("metrics-util", "0.19"),
        ]
    }
}

fn packages() -> FragmentBuilder {
    let mut builder = CodeFragment::builder();
    builder
        .package("ctor", "ctor")
        .package("metrics", "metrics")
        .package("debugging", "metrics_util::debugging");
    builder
}

/// Duration parameter `key`, `default` when absent; zero is rejected.
fn positive(site: &DirectiveSite<'_>, key: &str, default: Duration) -> Result<Duration, ProviderError> {
    let value = site.duration(key)?.unwrap_or(default);
    if value.is_zero() {
        return Err(site.invalid(key, site.param(key).unwrap_or("0"), "must be positive"));
    }
    Ok(value)
}

fn guard_type(ident: &str, name: &str) -> String {
    fill(
        GUARD,
        &[("TYPE", ident), ("NAME", literal(name).as_str())],
    )
}

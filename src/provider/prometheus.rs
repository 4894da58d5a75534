//! Pull-based instrumentation on top of the `prometheus` crate.
//!
//! Metrics live in the default registry and are served in text format by a
//! `tiny_http` server started from a `ctor` constructor. With
//! `prom-registry` on the define directive they are registered into the
//! application's own registry instead and no server is started.

use crate::context::RunContext;
use crate::directive::DirectiveKind;
use crate::fragment::{CodeFragment, FragmentBuilder};
use crate::manifest::Dependency;
use crate::provider::site::static_ident;
use crate::provider::{
    escape, fill, literal, nanos_literal, DirectiveSite, ProviderError, ProviderSettings,
    TemplateProvider,
};

pub const DEFAULT_PORT: u16 = 9123;
pub const DEFAULT_ROUTE: &str = "/metrics-gen";
pub const DEFAULT_BIND: &str = "0.0.0.0";

const COOLDOWN_KEYS: &[&str] = &["cooldown", "cooldown-time"];
const REGISTRY_KEY: &str = "prom-registry";
const DEFAULT_REGISTRY: &str = "$prometheus::default_registry()";

const EXPORTER: &str = r#"#[$ctor::ctor]
fn metrics_gen_init() {
    let _ = ::std::thread::Builder::new()
        .name("metrics-gen-exporter".to_string())
        .spawn(|| {
            let server = match $tiny_http::Server::http(%ADDR%) {
                Ok(server) => server,
                Err(err) => {
                    eprintln!("metrics-gen: cannot listen on {}: {}", %ADDR%, err);
                    return;
                }
            };
            for request in server.incoming_requests() {
                let route = request.url().split('?').next().unwrap_or_default().to_string();
                if route != %ROUTE% {
                    let _ = request.respond($tiny_http::Response::empty(404));
                    continue;
                }
                let encoder = $prometheus::TextEncoder::new();
                let mut body = ::std::vec::Vec::new();
                if let Err(err) = $prometheus::Encoder::encode(&encoder, &$prometheus::gather(), &mut body) {
                    eprintln!("metrics-gen: cannot encode metrics: {}", err);
                }
                let mut response = $tiny_http::Response::from_data(body);
                let content_type = format!("Content-Type: {}", $prometheus::Encoder::format_type(&encoder));
                if let Ok(header) = content_type.parse::<$tiny_http::Header>() {
                    response.add_header(header);
                }
                let _ = request.respond(response);
            }
        });
}"#;

const HISTOGRAM: &str = r#"static %IDENT%: ::std::sync::LazyLock<$prometheus::Histogram> = ::std::sync::LazyLock::new(|| {
    let opts = $prometheus::HistogramOpts::new(%NAME%, %HELP%)
        .buckets($prometheus::exponential_buckets(0.0005, 2.0, 24).unwrap_or_default());
    let metric = $prometheus::Histogram::with_opts(opts).expect("metrics-gen: invalid histogram");
    %REGISTER%
    metric
});"#;

const INT_COUNTER: &str = r#"static %IDENT%: ::std::sync::LazyLock<$prometheus::IntCounter> = ::std::sync::LazyLock::new(|| {
    let metric = $prometheus::IntCounter::new(%NAME%, %HELP%).expect("metrics-gen: invalid counter");
    %REGISTER%
    metric
});"#;

const GAUGE: &str = r#"static %IDENT%: ::std::sync::LazyLock<$prometheus::Gauge> = ::std::sync::LazyLock::new(|| {
    let metric = $prometheus::Gauge::new(%NAME%, %HELP%).expect("metrics-gen: invalid gauge");
    %REGISTER%
    metric
});"#;

const REGISTER: &str = r#"if let Err(err) = %REGISTRY%.register(::std::boxed::Box::new(metric.clone())) {
        eprintln!("metrics-gen: cannot register {}: {}", %NAME%, err);
    }"#;

const LAST_SEEN: &str = "static %IDENT%: ::std::sync::Mutex<::std::option::Option<::std::time::Instant>> = ::std::sync::Mutex::new(None);";

const THROTTLED_TIMER: &str = r#"let _metrics_gen_timer = {
    let now = ::std::time::Instant::now();
    let mut last = %LAST%.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match *last {
        Some(seen) if now.duration_since(seen) < ::std::time::Duration::from_nanos(%NANOS%) => None,
        _ => {
            *last = Some(now);
            Some(%IDENT%.start_timer())
        }
    }
};"#;

pub struct PrometheusProvider {
    settings: ProviderSettings,
}

impl PrometheusProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    fn define(&self, site: &DirectiveSite<'_>) -> Result<Option<CodeFragment>, ProviderError> {
        site.require_item()?;
        if site.flag("empty")? {
            return Ok(None);
        }
        if let Some(value) = site.param(REGISTRY_KEY) {
            registry(site, Some(value))?;
            site.reject(
                &["prom-port", "prom-route", "prom-bind"],
                "no exporter is started when `prom-registry` is set",
            )?;
            return Ok(None);
        }

        let port = site.port("prom-port", DEFAULT_PORT)?;
        let bind = site.param("prom-bind").unwrap_or(DEFAULT_BIND);
        let route = site.param("prom-route").unwrap_or(DEFAULT_ROUTE);
        if !route.starts_with('/') {
            return Err(site.invalid("prom-route", route, "route must start with `/`"));
        }

        let addr = format!("{bind}:{port}");
        let mut builder = packages();
        builder
            .declaration(&fill(
                EXPORTER,
                &[("ADDR", literal(&addr).as_str()), ("ROUTE", literal(route).as_str())],
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
        site.claim(ctx, &name, "histogram", false)?;
        let ident = static_ident(&[function.as_str(), "duration"]);
        let help = format!("Execution time of `{function}` in seconds.");

        let mut builder = packages();
        let declaration = metric(site, HISTOGRAM, &ident, &name, &help)?;
        builder.declaration(&declaration).map_err(|e| site.template(e))?;
        match cooldown {
            Some(cooldown) => {
                let last = static_ident(&[function.as_str(), "last"]);
                builder
                    .declaration(&fill(LAST_SEEN, &[("IDENT", last.as_str())]))
                    .map_err(|e| site.template(e))?;
                builder
                    .statement(&fill(
                        THROTTLED_TIMER,
                        &[
                            ("LAST", last.as_str()),
                            ("NANOS", nanos_literal(cooldown).as_str()),
                            ("IDENT", ident.as_str()),
                        ],
                    ))
                    .map_err(|e| site.template(e))?;
            }
            None => {
                builder
                    .statement(&format!("let _metrics_gen_timer = {ident}.start_timer();"))
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
        site.claim(ctx, &name, "histogram", false)?;
        let ident = static_ident(&[function.as_str(), digits.as_str()]);
        let help = format!(
            "Execution time in `{function}` from line {} to the end of its block.",
            site.line()
        );

        let mut builder = packages();
        let declaration = metric(site, HISTOGRAM, &ident, &name, &help)?;
        builder.declaration(&declaration).map_err(|e| site.template(e))?;
        builder
            .statement(&format!(
                "let _metrics_gen_timer_{digits} = {ident}.start_timer();"
            ))
            .map_err(|e| site.template(e))?;
        Ok(builder.build())
    }

    fn inline_counter(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<CodeFragment, ProviderError> {
        let function = site.require_statement()?;
        let raw = site.required("name")?;
        let name = site.metric_name(raw);
        site.claim(ctx, &name, "counter", false)?;
        let ident = static_ident(&[function.as_str(), raw, ctx.random_digits(4).as_str()]);
        let help = format!("Times `{function}` passed line {}.", site.line());

        let mut builder = packages();
        let declaration = metric(site, INT_COUNTER, &ident, &name, &help)?;
        builder.declaration(&declaration).map_err(|e| site.template(e))?;
        builder
            .statement(&format!("{ident}.inc();"))
            .map_err(|e| site.template(e))?;
        Ok(builder.build())
    }

    /// Gauge updated with `value` each time the statement is reached.
    fn set(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<CodeFragment, ProviderError> {
        let function = site.require_statement()?;
        let raw = site.required("name")?;
        let value = site.expression("value")?;
        let name = site.metric_name(raw);
        site.claim(ctx, &name, "gauge", false)?;
        let ident = static_ident(&[function.as_str(), raw, ctx.random_digits(4).as_str()]);
        let help = format!("Value of `{value}` in `{function}`.");

        let mut builder = packages();
        let declaration = metric(site, GAUGE, &ident, &name, &help)?;
        builder.declaration(&declaration).map_err(|e| site.template(e))?;
        builder
            .statement(&fill(
                "%IDENT%.set((%VALUE%) as f64);",
                &[("IDENT", ident.as_str()), ("VALUE", escape(value).as_str())],
            ))
            .map_err(|e| site.template(e))?;
        Ok(builder.build())
    }
}

impl TemplateProvider for PrometheusProvider {
    fn name(&self) -> &'static str {
        "prometheus"
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
            Dependency::new("prometheus", "0.13"),
            Dependency::new("tiny_http", "0.12"),
        ]
    }
}

fn packages() -> FragmentBuilder {
    let mut builder = CodeFragment::builder();
    builder
        .package("ctor", "ctor")
        .package("prometheus", "prometheus")
        .package("tiny_http", "tiny_http");
    builder
}

/// Registry expression for `prom-registry`, or the default registry.
///
/// Generated code lands in many modules, so the path must be absolute.
fn registry(site: &DirectiveSite<'_>, value: Option<&str>) -> Result<String, ProviderError> {
    let Some(value) = value else {
        return Ok(DEFAULT_REGISTRY.to_string());
    };
    let path = syn::parse_str::<syn::Path>(value)
        .map_err(|e| site.invalid(REGISTRY_KEY, value, &e.to_string()))?;
    let absolute = path.leading_colon.is_some()
        || path.segments.first().is_some_and(|s| s.ident == "crate");
    if !absolute {
        return Err(site.invalid(
            REGISTRY_KEY,
            value,
            "registry path must start with `crate::` or `::`",
        ));
    }
    Ok(escape(value))
}

fn metric(
    site: &DirectiveSite<'_>,
    template: &str,
    ident: &str,
    name: &str,
    help: &str,
) -> Result<String, ProviderError> {
    let name = literal(name);
    let registry = registry(site, site.define_param(REGISTRY_KEY))?;
    let register = fill(
        REGISTER,
        &[("REGISTRY", registry.as_str()), ("NAME", name.as_str())],
    );
    Ok(fill(
        template,
        &[
            ("IDENT", ident),
            ("NAME", name.as_str()),
            ("HELP", literal(help).as_str()),
            ("REGISTER", register.as_str()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;
    use crate::writer::OutputMode;

    fn provider() -> PrometheusProvider {
        let mut settings = ProviderSettings::new(OutputMode::InPlace);
        settings.metrics_prefix = Some("app".to_string());
        PrometheusProvider::new(settings)
    }

    fn render(source: &str) -> Result<Option<CodeFragment>, ProviderError> {
        render_with(source, None, &mut RunContext::with_seed("T", 3))
    }

    fn render_with(
        source: &str,
        define: Option<&str>,
        ctx: &mut RunContext,
    ) -> Result<Option<CodeFragment>, ProviderError> {
        let file = SourceFile::parse("src/server.rs", source).unwrap();
        let define = define.map(|d| SourceFile::parse("src/main.rs", d).unwrap());
        let site = DirectiveSite {
            path: file.path(),
            directive: &file.directives()[0],
            define: define.as_ref().map(|d| &d.directives()[0]),
            metrics_prefix: Some("app"),
        };
        provider().render(&site, ctx)
    }

    #[test]
    fn define_serves_registry() {
        let fragment = render("// +trace:define prom-port=9000 prom-route=/m\nfn main() {}\n")
            .unwrap()
            .unwrap();
        fragment.validate().unwrap();
        let code = fragment.declarations().join("\n");
        assert!(code.contains("#[ctor::ctor]"));
        assert!(code.contains("tiny_http::Server::http(\"0.0.0.0:9000\")"));
        assert!(code.contains("if route != \"/m\""));
        assert!(!fragment.has_statements());
    }

    #[test]
    fn define_can_be_empty() {
        assert!(render("// +trace:define empty=true\nfn main() {}\n")
            .unwrap()
            .is_none());
        assert!(matches!(
            render("// +trace:define prom-route=metrics\nfn main() {}\n"),
            Err(ProviderError::InvalidParam { .. })
        ));
    }

    #[test]
    fn function_time_uses_default_name() {
        let fragment = render("// +trace:func-exec-time\nfn handle() {}\n")
            .unwrap()
            .unwrap();
        fragment.validate().unwrap();
        let code = fragment.declarations().join("\n");
        assert!(code.contains("static METRICS_GEN_HANDLE_DURATION"));
        assert!(code.contains("\"app_server_handle_duration_seconds\""));
        assert_eq!(
            fragment.statements(),
            vec!["let _metrics_gen_timer = METRICS_GEN_HANDLE_DURATION.start_timer();"]
        );
    }

    #[test]
    fn function_time_with_cooldown() {
        let fragment = render("// +trace:func-exec-time name=req cooldown=2s\nfn handle() {}\n")
            .unwrap()
            .unwrap();
        fragment.validate().unwrap();
        assert_eq!(fragment.declarations().len(), 2);
        let statement = fragment.statements().join("\n");
        assert!(statement.contains("METRICS_GEN_HANDLE_LAST.lock()"));
        assert!(statement.contains("from_nanos(2000000000u64)"));
        assert!(fragment.declarations()[0].contains("\"app_req\""));
    }

    #[test]
    fn function_time_needs_function() {
        assert!(matches!(
            render("// +trace:func-exec-time\nstruct S;\n"),
            Err(ProviderError::NotAFunction { .. })
        ));
    }

    #[test]
    fn inline_kinds() {
        let fragment = render("fn f() {\n    // +trace:inner-counter name=hits\n    g();\n}\n")
            .unwrap()
            .unwrap();
        fragment.validate().unwrap();
        assert!(fragment.statements()[0].ends_with(".inc();"));

        let fragment = render("fn f() {\n    // +trace:set name=depth value=q.len()\n    g();\n}\n")
            .unwrap()
            .unwrap();
        fragment.validate().unwrap();
        assert!(fragment.statements()[0].contains(".set((q.len()) as f64);"));

        let fragment = render("fn f() {\n    // +trace:inner-exec-time\n    g();\n}\n")
            .unwrap()
            .unwrap();
        fragment.validate().unwrap();
        assert!(fragment.declarations()[0].contains("\"app_server_f_"));
    }

    #[test]
    fn inline_time_rejects_cooldown() {
        assert!(matches!(
            render("fn f() {\n    // +trace:inner-exec-time cooldown=1s\n    g();\n}\n"),
            Err(ProviderError::InvalidParam { ref key, .. }) if key == "cooldown"
        ));
    }

    #[test]
    fn counter_requires_name() {
        assert!(matches!(
            render("fn f() {\n    // +trace:inner-counter\n    g();\n}\n"),
            Err(ProviderError::MissingParam { key: "name", .. })
        ));
    }

    #[test]
    fn registration_failures_are_reported() {
        let fragment = render("// +trace:func-exec-time\nfn handle() {}\n")
            .unwrap()
            .unwrap();
        let code = fragment.declarations().join("\n");
        assert!(code.contains(
            "if let Err(err) = prometheus::default_registry().register(::std::boxed::Box::new(metric.clone()))"
        ));
        assert!(code.contains("cannot register {}: {}\", \"app_server_handle_duration_seconds\", err"));
        assert!(!code.contains("let _ ="));
    }

    #[test]
    fn define_with_registry_starts_no_exporter() {
        assert!(render("// +trace:define prom-registry=crate::telemetry::REGISTRY\nfn main() {}\n")
            .unwrap()
            .is_none());
        assert!(matches!(
            render("// +trace:define prom-registry=telemetry::REGISTRY\nfn main() {}\n"),
            Err(ProviderError::InvalidParam { ref key, .. }) if key == "prom-registry"
        ));
        assert!(matches!(
            render("// +trace:define prom-registry=::reg::R prom-port=9000\nfn main() {}\n"),
            Err(ProviderError::InvalidParam { ref key, .. }) if key == "prom-port"
        ));
    }

    #[test]
    fn sites_register_into_custom_registry() {
        let mut ctx = RunContext::with_seed("T", 3);
        let fragment = render_with(
            "fn f() {\n    // +trace:inner-counter name=hits\n    g();\n}\n",
            Some("// +trace:define prom-registry=crate::telemetry::REGISTRY\nfn main() {}\n"),
            &mut ctx,
        )
        .unwrap()
        .unwrap();
        fragment.validate().unwrap();
        let code = fragment.declarations().join("\n");
        assert!(code.contains("crate::telemetry::REGISTRY.register(::std::boxed::Box::new(metric.clone()))"));
        assert!(!code.contains("default_registry"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut ctx = RunContext::with_seed("T", 3);
        let source = "fn f() {\n    // +trace:inner-counter name=hits\n    g();\n}\n";
        assert!(render_with(source, None, &mut ctx).is_ok());
        let err = render_with(source, None, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::DuplicateMetric { ref name, first_line: 2, .. } if name == "app_hits"
        ));

        let gauge = "fn f() {\n    // +trace:set name=hits value=1\n    g();\n}\n";
        assert!(matches!(
            render_with(gauge, None, &mut ctx),
            Err(ProviderError::DuplicateMetric { .. })
        ));
    }

    #[test]
    fn dollar_signs_stay_literal() {
        let fragment = render(
            "fn f() {\n    // +trace:set name=cost value=price(\"$\")\n    g();\n}\n",
        )
        .unwrap()
        .unwrap();
        fragment.validate().unwrap();
        assert!(fragment.statements()[0].ends_with(".set((price(\"$\")) as f64);"));
        assert!(fragment.declarations()[0].contains("Value of `price(\\\"$\\\")`"));

        let fragment = render("// +trace:define prom-route=/$metrics\nfn main() {}\n")
            .unwrap()
            .unwrap();
        assert!(fragment.declarations()[0].contains("if route != \"/$metrics\""));
    }

    #[test]
    fn methods_use_qualified_names() {
        let fragment = render(
            "struct Api;\nimpl Api {\n    // +trace:func-exec-time\n    fn get(&self) {}\n}\n",
        )
        .unwrap()
        .unwrap();
        let code = fragment.declarations().join("\n");
        assert!(code.contains("static METRICS_GEN_API_GET_DURATION"));
        assert!(code.contains("\"app_server_Api_get_duration_seconds\""));
    }

    #[test]
    fn declared_dependencies() {
        let names: Vec<_> = provider()
            .dependencies()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["ctor", "prometheus", "tiny_http"]);
    }
}

//! Tracing subscriber setup. JSON lines in production, human-readable output
//! in sandbox. `RUST_LOG` overrides the default filter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Environment;

fn default_filter(environment: Environment) -> String {
    let level = match environment {
        Environment::Sandbox => "debug",
        Environment::Production => "info",
    };
    format!(
        "{}={},tower_http=debug,mongodb=warn,hyper=warn,reqwest=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        level
    )
}

pub fn init_tracing(environment: Environment) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(environment)));

    let layer = match environment {
        Environment::Production => fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed(),
        Environment::Sandbox => fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed(),
    };

    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

//! tracing-subscriber setup. Logs go to stderr; `RUST_LOG` wins over flags.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Default filter directive implied by the flags.
pub fn level(cfg: &LogConfig) -> &'static str {
    match (cfg.quiet, cfg.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}

pub fn init(cfg: &LogConfig) -> anyhow::Result<()> {
    let level = level(cfg);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let with_caller = cfg.add_caller || matches!(level, "debug" | "trace");

    let registry = tracing_subscriber::registry().with(filter);
    if cfg.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(with_caller)
                    .with_line_number(with_caller),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(!cfg.no_color)
                    .with_file(with_caller)
                    .with_line_number(with_caller),
            )
            .try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_flags() {
        assert_eq!(level(&LogConfig::default()), "info");
        assert_eq!(level(&LogConfig { verbose: 1, ..Default::default() }), "debug");
        assert_eq!(level(&LogConfig { verbose: 3, ..Default::default() }), "trace");
        assert_eq!(level(&LogConfig { verbose: 2, quiet: true, ..Default::default() }), "warn");
    }
}

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

/// Pipeline events at `info`, dependencies (reqwest, hyper) only at `warn`.
const DEFAULT_FILTER: &str = "warn,technote=info";

/// Installs the stderr subscriber. A non-empty, parseable `RUST_LOG`
/// replaces [`DEFAULT_FILTER`], e.g. `RUST_LOG=technote=debug`.
pub fn init() -> anyhow::Result<()> {
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}

fn log_filter(directives: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Some(directives) = directives.map(str::trim).filter(|d| !d.is_empty())
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return Ok(filter);
    }
    EnvFilter::try_new(DEFAULT_FILTER).context("build log filter")
}

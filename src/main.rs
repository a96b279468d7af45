use kestrel_bake::cli::CliOverrides;
use kestrel_bake::{logging, run_with_overrides};

fn main() {
    logging::init();
    let cli_overrides = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    match run_with_overrides(cli_overrides) {
        Ok(summary) => {
            tracing::info!(
                mode = %summary.mode,
                loaded = summary.loaded.len(),
                failed = summary.failed.len(),
                phases = summary.completions.len(),
                "run finished"
            );
            if let Some((units, chunks)) = summary.exported {
                tracing::info!(units, chunks, "baked expressions written");
            }
        }
        Err(err) => {
            tracing::error!("run failed: {err:#}");
            std::process::exit(1);
        }
    }
}

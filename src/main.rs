use std::process;

use clap::Parser;

use gitfleet::cancel::CancelToken;
use gitfleet::cli::{Cli, run};

/// Seed the logger from `--log-level`, falling back to `RUST_LOG`, then the
/// configuration document's `common.log_level`, then `info`.
fn init_logger(cli_level: Option<&str>, config_level: Option<&str>) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(config_level.unwrap_or("info").to_string()),
    );
    if let Some(level) = cli_level {
        builder.parse_filters(level);
    }
    builder.format_timestamp(None).init();
}

#[cfg(unix)]
fn install_signal_handler(token: &CancelToken) {
    use signal_hook::consts::SIGINT;
    use signal_hook::iterator::Signals;

    let token = token.clone();
    match Signals::new([SIGINT]) {
        Ok(mut signals) => {
            std::thread::spawn(move || {
                for _ in signals.forever() {
                    if token.is_cancelled() {
                        // Second interrupt: give up on a graceful stop
                        process::exit(130);
                    }
                    log::warn!("interrupt received, finishing in-flight work");
                    token.cancel();
                }
            });
        }
        Err(err) => log::debug!("signal handler unavailable: {err}"),
    }
}

#[cfg(not(unix))]
fn install_signal_handler(_token: &CancelToken) {}

fn main() {
    let cli = Cli::parse();

    // The config-level fallback needs the document, which needs the CLI; a
    // cheap pre-read keeps logger setup ahead of everything else.
    let config_level = gitfleet::config::ConfigDocument::load(cli.config.as_deref())
        .ok()
        .and_then(|doc| doc.common.log_level);
    init_logger(cli.log_level.as_deref(), config_level.as_deref());

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    match run(cli, cancel) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("gf: {err:#}");
            process::exit(1);
        }
    }
}

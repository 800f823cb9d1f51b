use clap::Parser;

#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use dupmark::config::{effective_threads, Config};
use dupmark::pipeline;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(config.verbose);

    let threads = effective_threads(&config);
    if threads > 1 {
        rayon::ThreadPoolBuilder::new().num_threads(threads).build_global().ok();
    }
    log::info!(
        "dupmark: using {} thread(s){}",
        threads,
        if threads == 1 { " (single-threaded mode)" } else { "" }
    );

    pipeline::run(&config)
}

/// `env_logger` initialization keyed off an occurrence-counted `-v` flag (A3),
/// grounded on `log`/`env_logger`'s presence in the wider genomics-tooling
/// corpus (`examples/PROSIC-libprosic/Cargo.toml`).
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).format_timestamp_millis().init();
}

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init_logging(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "tunelog=warn",
        1 => "tunelog=info",
        _ => "tunelog=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}

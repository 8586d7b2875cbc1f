use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = fieldopsctl::Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = fieldopsctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}

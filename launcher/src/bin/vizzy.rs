use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use vizzy_launcher::*;

/// Records every heap operation of a command into a CSV file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the log file (appended to, created if missing)
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    log:        PathBuf,

    /// Where to drop the patched tracer library
    #[arg(short, long, default_value = DEFAULT_DEPLOY_PATH)]
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    library:    PathBuf,

    /// The command to trace, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command:    Vec<OsString>,
}

fn run(cli: Args) -> Result<ChildOutcome> {
    let launcher = Launcher::new(Deployment::new(EmbeddedImage::tracer(), &cli.library));
    let (command, args) = cli.command.split_first().context("No command given")?;

    launcher.run(&cli.log, command, args)
        .with_context(|| format!("Tracing {} failed", command.to_string_lossy()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Usage problems are ours to report, not clap's to exit on.
    let cli = match Args::try_parse() {
        Ok(cli) => cli,
        Err(e)  => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    match run(cli) {
        Ok(_)   => std::process::exit(0),
        Err(e)  => {
            log::error!("{e:#}");
            std::process::exit(1);
        }
    }
}

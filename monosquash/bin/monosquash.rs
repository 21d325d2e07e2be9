use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use monosquash::{
    cli::{AnsiStyles, MonosquashArgs},
    image, management, SquashResult,
};
use tracing_subscriber::{fmt, EnvFilter};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let args = MonosquashArgs::parse();
    if args.version {
        println!("monosquash {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    // Logs go to stderr, stdout may carry the image
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".error());
            ExitCode::FAILURE
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

async fn run(args: &MonosquashArgs) -> SquashResult<()> {
    let options = args.to_options()?;
    tracing::trace!("running squash: options={options:?}");

    let outcome = management::squash::squash_image(&options).await?;
    if let Some(work_dir) = outcome.get_kept_work_dir() {
        eprintln!(
            "working directory kept at {}",
            work_dir.display().to_string().literal()
        );
    }

    let rendered = image::render_history(outcome.get_history(), Utc::now());
    if options.output.is_some() {
        print!("{rendered}");
    } else {
        let mut lines = rendered.lines();
        if let Some(header) = lines.next() {
            eprintln!("{}", header.header());
        }
        for line in lines {
            eprintln!("{line}");
        }
    }

    Ok(())
}

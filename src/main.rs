mod args;
mod survey;

use clap::Parser;
use log::{info, LevelFilter};
use snafu::ErrorCompat;

use crate::args::{Args, Command};
use crate::survey::*;

fn run(args: Args) -> SurveyResult<()> {
    match args.command {
        Command::Check { config } => run_check(&config),
        Command::Select {
            config,
            user,
            count,
            seed,
            stable,
            out,
            reference,
        } => {
            let req = SelectRequest {
                config_path: config,
                user_id: user,
                count,
                seed,
                stable,
                out,
                reference,
            };
            run_select(&req).map(|_| ())
        }
        Command::Rate {
            config,
            user,
            video,
            scale,
            not_recognized,
        } => {
            let record = run_rate(&config, &user, &video, &scale, not_recognized)?;
            info!("Rating saved: {:?}", record);
            Ok(())
        }
        Command::Rated { config, user } => run_rated(&config, &user).map(|_| ()),
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run(args) {
        eprintln!("An error occured:");
        for cause in ErrorCompat::iter_chain(&e) {
            eprintln!("  {}", cause);
        }
        std::process::exit(1);
    }
}

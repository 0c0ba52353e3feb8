use clap::{Parser, Subcommand};

/// Video rating surveys: selection of the videos shown to each participant and storage of the ratings.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, global = true, takes_value = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Reads the configuration and the video metadata, and reports the size of each level.
    Check {
        /// (file path) The JSON file describing the study.
        #[clap(short, long, value_parser)]
        config: String,
    },
    /// Selects the videos for a participant.
    Select {
        /// (file path) The JSON file describing the study.
        #[clap(short, long, value_parser)]
        config: String,
        /// The id of the participant. The videos already rated by this participant are left out.
        #[clap(short, long, value_parser)]
        user: String,
        /// (optional) The number of videos to select. Overrides the targetCount of the configuration.
        #[clap(long, value_parser)]
        count: Option<usize>,
        /// (optional) The random seed. Overrides the randomSeed of the configuration.
        #[clap(long, value_parser)]
        seed: Option<u64>,
        /// If passed as an argument, the videos are returned in stratum order instead of shuffled.
        #[clap(long, takes_value = false)]
        stable: bool,
        /// (file path, 'stdout' or empty) Where to write the plan in JSON format.
        #[clap(short, long, value_parser)]
        out: Option<String>,
        /// (file path) A reference plan in JSON format. If provided, vrsurvey will
        /// check that the computed plan matches the reference.
        #[clap(short, long, value_parser)]
        reference: Option<String>,
    },
    /// Validates and stores the rating of a video.
    Rate {
        /// (file path) The JSON file describing the study.
        #[clap(short, long, value_parser)]
        config: String,
        #[clap(short, long, value_parser)]
        user: String,
        #[clap(long, value_parser)]
        video: String,
        /// (name=value, repeated) The answer to one rating scale.
        #[clap(long, value_parser)]
        scale: Vec<String>,
        /// If passed as an argument, the participant could not recognize the action of the video.
        #[clap(long, takes_value = false)]
        not_recognized: bool,
    },
    /// Prints the videos already rated by a participant.
    Rated {
        /// (file path) The JSON file describing the study.
        #[clap(short, long, value_parser)]
        config: String,
        #[clap(short, long, value_parser)]
        user: String,
    },
}

//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(name = "tagctl", about = "Provision RFID readers, issue tags and run reader cycles")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Generate the issuer keys and one config file per reader.
    Provision {
        /// Scheme. Valid values are "stepauth", "baseline" and "tracker".
        #[clap(long)]
        scheme: String,
        /// Reader ids, separated by commas.
        #[clap(long = "reader", required = true, value_delimiter = ',')]
        readers: Vec<u32>,
        /// Directory to write the config files to.
        #[clap(short, long)]
        out: PathBuf,
        /// Tracker path the manager accepts, reader ids separated by commas.
        /// Can be repeated.
        #[clap(long = "valid-path")]
        valid_paths: Vec<String>,
        /// Tracker readers add this value instead of tracking the path.
        #[clap(long)]
        counter_delta: Option<u64>,
        /// MQTT broker the readers publish to.
        #[clap(long)]
        broker: Option<String>,
        /// WiFi network the readers join.
        #[clap(long, requires = "wifi_password")]
        wifi_ssid: Option<String>,
        #[clap(long, requires = "wifi_ssid")]
        wifi_password: Option<String>,
        /// Seed for key generation, for reproducible test setups only.
        #[clap(long)]
        seed: Option<u64>,
    },
    /// Write a fresh tag image.
    Issue {
        /// Path to authority.toml.
        #[clap(short, long)]
        config: PathBuf,
        /// The tag image file to write.
        #[clap(short, long)]
        tag: PathBuf,
        /// Tag id embedded in the content.
        #[clap(long)]
        tag_id: u32,
        /// StepAuth path, reader ids separated by commas.
        #[clap(long, value_delimiter = ',')]
        path: Vec<u32>,
        /// Baseline: only this reader may update the fresh tag.
        #[clap(long)]
        first_reader: Option<u32>,
        /// Tracker: issue a counter tag starting at this value.
        #[clap(long)]
        counter: Option<u64>,
        #[clap(long)]
        seed: Option<u64>,
    },
    /// Run one reader cycle against a tag image.
    Scan {
        /// Path to the reader config.
        #[clap(short, long)]
        config: PathBuf,
        /// The tag image file, updated in place.
        #[clap(short, long)]
        tag: PathBuf,
        /// Append the telemetry frame to this file.
        #[clap(long)]
        telemetry: Option<PathBuf>,
        /// Also print the display contents.
        #[clap(long)]
        screen: bool,
        #[clap(long)]
        seed: Option<u64>,
    },
    /// Check a tag image at the manager.
    Verify {
        /// Path to authority.toml.
        #[clap(short, long)]
        config: PathBuf,
        /// The tag image file.
        #[clap(short, long)]
        tag: PathBuf,
        /// Tracker: decode the counter, searching values up to this bound.
        #[clap(long)]
        counter_bound: Option<u64>,
        /// Tracker: recover the tag id, searching ids up to this bound.
        #[clap(long)]
        max_tag_id: Option<u32>,
    },
    /// Dump the tag record fields to stdout.
    Dump {
        /// The tag image file.
        #[clap(short, long)]
        tag: PathBuf,
        /// Scheme. Valid values are "stepauth", "baseline" and "tracker".
        #[clap(long)]
        scheme: String,
    },
    /// Decode a file of telemetry frames.
    Telemetry {
        #[clap(short, long)]
        input: PathBuf,
    },
}

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "mentor-pairing",
    version,
    about = "Mentor-student pairing lifecycle service"
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

//! Training Arguments - CLI configuration for training

use clap::Args;
use std::path::PathBuf;

use crate::config::SummarizerConfig;

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub config: SummarizerConfig,

    /// Resume weights from a safetensors checkpoint
    #[arg(long)]
    pub load: Option<PathBuf>,

    /// Batches between progress log lines
    #[arg(long, default_value_t = 50)]
    pub log_interval: usize,

    /// Run the test split with the trained weights once training ends
    #[arg(long, action)]
    pub do_test: bool,
}

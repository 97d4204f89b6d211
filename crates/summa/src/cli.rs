use crate::evaluate::TestArgs;
use crate::export::ExportArgs;
use crate::inference::PredictArgs;
use crate::train::TrainArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Summa - abstractive summarization trainer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a summarizer (optionally followed by a test pass)
    Train(TrainArgs),

    /// Score an exported model on the test split (ROUGE)
    Test(TestArgs),

    /// Summarize text with an exported model
    Predict(PredictArgs),

    /// Export a checkpoint to a portable model directory
    Export(ExportArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::ScheduleKind;

    #[test]
    fn test_parse_train_command() {
        let cli = Cli::try_parse_from([
            "summa",
            "train",
            "--batch-size",
            "8",
            "--use-scheduler",
            "linear",
            "--accumulate-grad-batches",
            "2",
            "--do-test",
        ])
        .unwrap();
        match cli.command {
            Commands::Train(args) => {
                assert_eq!(args.config.batch_size, 8);
                assert_eq!(args.config.use_scheduler, ScheduleKind::Linear);
                assert_eq!(args.config.accumulate_grad_batches, 2);
                assert!(args.do_test);
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_unknown_scheduler_is_rejected() {
        assert!(Cli::try_parse_from(["summa", "train", "--use-scheduler", "cosine"]).is_err());
    }

    #[test]
    fn test_parse_predict_command() {
        let cli = Cli::try_parse_from(["summa", "predict", "-t", "a long story", "--cpu"]).unwrap();
        match cli.command {
            Commands::Predict(args) => {
                assert_eq!(args.text, vec!["a long story".to_string()]);
                assert!(args.cpu);
            }
            _ => panic!("expected predict"),
        }
    }
}

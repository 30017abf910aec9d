use crate::device::Device;
use clap::{Parser, ValueEnum};
use fnnlm_core::{
    feed_forward_language_model::FeedForwardLanguageModelOptions, trainer::OptimizerKind,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Optimizer {
    Adam,
    Adamw,
}

impl From<Optimizer> for OptimizerKind {
    fn from(value: Optimizer) -> Self {
        match value {
            Optimizer::Adam => OptimizerKind::Adam,
            Optimizer::Adamw => OptimizerKind::AdamW,
        }
    }
}

/// Train a feed-forward n-gram language model, report perplexity on a
/// held-out set and sample sentences from it.
#[derive(Parser)]
pub struct Args {
    /// Whether to display information about the variables in the network.
    #[arg(long, default_value_t = false)]
    pub vars: bool,

    /// Random number seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Training corpus: one sentence per line, words separated by whitespace.
    #[arg(long, default_value_t = String::from("data/ptb/train.txt"))]
    pub train: String,

    /// Held-out corpus used for perplexity, learning rate decay and picking
    /// the model to save.
    #[arg(long, default_value_t = String::from("data/ptb/valid.txt"))]
    pub dev: String,

    /// Number of passes over the training data.
    #[arg(long, default_value_t = 5)]
    pub epochs: usize,

    /// Number of preceding words used to predict the next one.
    #[arg(long, default_value_t = 2)]
    pub context_size: usize,

    /// Number of dimensions in embedding space.
    #[arg(long, default_value_t = 128)]
    pub embedding_dims: usize,

    /// Size of the hidden layer.
    #[arg(long, default_value_t = 128)]
    pub hidden_dims: usize,

    /// Dropout probability after the hidden layer.
    #[arg(long, default_value_t = 0.2)]
    pub dropout: f32,

    /// The initial learning rate. It's halved whenever the dev loss gets worse.
    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    #[arg(long, value_enum, default_value_t = Optimizer::Adam)]
    pub optimizer: Optimizer,

    /// Print throughput after this many training sentences (0 disables it).
    #[arg(long, default_value_t = 500)]
    pub report_interval: usize,

    /// Number of sentences to generate after each epoch.
    #[arg(long, default_value_t = 5)]
    pub samples: usize,

    /// Maximum length of a generated sentence, in words.
    #[arg(long, default_value_t = fnnlm_core::language_model::DEFAULT_MAX_SENTENCE_LEN)]
    pub max_len: usize,

    /// Temperature to use when generating sentences (0 always picks the most
    /// likely word).
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    /// The file to save the best model to, in safetensors format.
    #[arg(long, default_value_t = String::from("model"))]
    pub save: String,

    /// Don't save the model at all.
    #[arg(long, default_value_t = false)]
    pub no_save: bool,

    /// Evaluate and sample from a saved model instead of training one.
    #[arg(
        long,
        conflicts_with_all = [
            "vars",
            "train",
            "epochs",
            "context_size",
            "embedding_dims",
            "hidden_dims",
            "dropout",
            "lr",
            "optimizer",
            "report_interval",
            "save",
            "no_save",
        ]
    )]
    pub load: Option<String>,

    #[arg(long, value_enum, default_value_t = Device::Cpu)]
    pub device: Device,
}

impl Args {
    pub fn model_options(&self, vocab_size: usize) -> FeedForwardLanguageModelOptions {
        FeedForwardLanguageModelOptions {
            vocab_size,
            embedding_dims: self.embedding_dims,
            hidden_dims: self.hidden_dims,
            context_size: self.context_size,
            drop_p: self.dropout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_accepts_evaluation_flags() {
        let args = Args::try_parse_from([
            "fnnlm",
            "--load",
            "model",
            "--dev",
            "dev.txt",
            "--samples",
            "3",
            "--temperature",
            "0",
            "--max-len",
            "20",
        ])
        .unwrap();
        assert_eq!(args.load.as_deref(), Some("model"));
        assert_eq!(args.dev, "dev.txt");
        assert_eq!(args.samples, 3);
    }

    #[test]
    fn load_rejects_training_flags() {
        for flags in [
            &["--vars"][..],
            &["--train", "train.txt"],
            &["--epochs", "2"],
            &["--context-size", "3"],
            &["--embedding-dims", "16"],
            &["--hidden-dims", "16"],
            &["--dropout", "0.5"],
            &["--lr", "0.1"],
            &["--optimizer", "adamw"],
            &["--report-interval", "10"],
            &["--save", "other"],
            &["--no-save"],
        ] {
            let argv = ["fnnlm", "--load", "model"].iter().chain(flags);
            assert!(
                Args::try_parse_from(argv).is_err(),
                "--load should not accept {flags:?}"
            );
        }
    }

    #[test]
    fn training_flags_are_accepted_without_load() {
        let args = Args::try_parse_from([
            "fnnlm",
            "--lr",
            "0.1",
            "--optimizer",
            "adamw",
            "--save",
            "other",
            "--dropout",
            "0.5",
        ])
        .unwrap();
        assert!(args.load.is_none());
        assert_eq!(args.lr, 0.1);
        assert_eq!(args.save, "other");
        let options = args.model_options(10);
        assert_eq!(options.vocab_size, 10);
        assert_eq!(options.drop_p, 0.5);
    }
}

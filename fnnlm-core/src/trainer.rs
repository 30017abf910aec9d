use std::time::{Duration, Instant};

use anyhow::Result;
use candle_core::{Device, Var, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use rand::{rngs::StdRng, seq::SliceRandom};

use crate::{
    corpus::{Sentence, count_words},
    language_model::{LanguageModel, sentence_loss},
};

/// Dev loss we pretend to have seen before the first epoch, so the first
/// real one is always an improvement.
const INITIAL_DEV_LOSS: f64 = 1e20;

/// Totals for one pass over a dataset.
#[derive(Clone, Copy, Debug, Default)]
pub struct EpochStats {
    /// Summed negative log-likelihood, in nats.
    pub loss: f64,
    pub words: usize,
    pub elapsed: Duration,
}

impl EpochStats {
    /// NaN when no words were seen.
    pub fn loss_per_word(&self) -> f64 {
        if self.words == 0 {
            return f64::NAN;
        }
        self.loss / self.words as f64
    }

    pub fn perplexity(&self) -> f64 {
        self.loss_per_word().exp()
    }

    pub fn words_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.words as f64 / secs
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OptimizerKind {
    Adam,
    AdamW,
}

/// The optimizers we can train with. `candle_nn::Optimizer` has a
/// constructor in it, so it can't be boxed and we wrap them in an enum.
pub enum TrainingOptimizer {
    Adam(Adam),
    AdamW(AdamW),
}

impl TrainingOptimizer {
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, lr: f64) -> Result<Self> {
        Ok(match kind {
            OptimizerKind::Adam => Self::Adam(Adam::new(
                vars,
                ParamsAdam {
                    lr,
                    ..Default::default()
                },
            )?),
            OptimizerKind::AdamW => Self::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    ..Default::default()
                },
            )?),
        })
    }

    pub fn step(&mut self, gradients: &GradStore) -> Result<()> {
        match self {
            Self::Adam(optimizer) => optimizer.step(gradients)?,
            Self::AdamW(optimizer) => optimizer.step(gradients)?,
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Adam(optimizer) => optimizer.learning_rate(),
            Self::AdamW(optimizer) => optimizer.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Adam(optimizer) => optimizer.set_learning_rate(lr),
            Self::AdamW(optimizer) => optimizer.set_learning_rate(lr),
        }
    }

    /// Halves the learning rate and returns the new one.
    pub fn decay_learning_rate(&mut self) -> f64 {
        let lr = self.learning_rate() / 2.0;
        self.set_learning_rate(lr);
        lr
    }
}

/// What to do after an evaluation pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DevObservation {
    /// The dev loss went up since the previous epoch.
    pub decay_lr: bool,
    /// The dev loss is the lowest seen so far, so this model is worth saving.
    pub is_best: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct DevTracker {
    last: f64,
    best: f64,
}

impl Default for DevTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DevTracker {
    pub fn new() -> Self {
        Self {
            last: INITIAL_DEV_LOSS,
            best: INITIAL_DEV_LOSS,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn observe(&mut self, dev_loss: f64) -> DevObservation {
        let decay_lr = self.last < dev_loss;
        self.last = dev_loss;
        let is_best = dev_loss < self.best;
        if is_best {
            self.best = dev_loss;
        }
        DevObservation { decay_lr, is_best }
    }
}

/// Owns the training and dev sentences and runs passes over them, one
/// sentence per optimizer step.
pub struct Trainer {
    train: Vec<Sentence>,
    dev: Vec<Sentence>,
}

impl Trainer {
    pub fn new(train: Vec<Sentence>, dev: Vec<Sentence>) -> Self {
        log::info!(
            "Training data is {} sentences ({} words).",
            train.len(),
            count_words(&train)
        );
        log::info!(
            "Dev data is {} sentences ({} words).",
            dev.len(),
            count_words(&dev)
        );
        Self { train, dev }
    }

    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn dev_len(&self) -> usize {
        self.dev.len()
    }

    /// Shuffles the training data and takes one optimizer step per sentence.
    /// `on_progress` is called after each sentence with the number of
    /// sentences done and the running totals.
    pub fn train_epoch<M, F>(
        &mut self,
        model: &M,
        optimizer: &mut TrainingOptimizer,
        rng: &mut StdRng,
        device: &Device,
        mut on_progress: F,
    ) -> Result<EpochStats>
    where
        M: LanguageModel + ?Sized,
        F: FnMut(usize, &EpochStats),
    {
        self.train.shuffle(rng);
        let start = Instant::now();
        let mut stats = EpochStats::default();
        for (i, sentence) in self.train.iter().enumerate() {
            let loss = sentence_loss(model, sentence, device)?;
            stats.loss += loss.to_scalar::<f32>()? as f64;
            stats.words += sentence.len();
            let gradients = loss.backward()?;
            optimizer.step(&gradients)?;
            stats.elapsed = start.elapsed();
            on_progress(i + 1, &stats);
        }
        Ok(stats)
    }

    /// Sums the loss over the dev data. Pass a model built with
    /// `build_no_grad` so dropout stays off and no gradients are tracked.
    pub fn evaluate<M, F>(&self, model: &M, device: &Device, on_progress: F) -> Result<EpochStats>
    where
        M: LanguageModel + ?Sized,
        F: FnMut(usize, &EpochStats),
    {
        evaluate(model, &self.dev, device, on_progress)
    }
}

pub fn evaluate<M, F>(
    model: &M,
    sentences: &[Sentence],
    device: &Device,
    mut on_progress: F,
) -> Result<EpochStats>
where
    M: LanguageModel + ?Sized,
    F: FnMut(usize, &EpochStats),
{
    let start = Instant::now();
    let mut stats = EpochStats::default();
    for (i, sentence) in sentences.iter().enumerate() {
        let loss = sentence_loss(model, sentence, device)?;
        stats.loss += loss.to_scalar::<f32>()? as f64;
        stats.words += sentence.len();
        stats.elapsed = start.elapsed();
        on_progress(i + 1, &stats);
    }
    Ok(stats)
}

use anyhow::{Result, anyhow};
use approx::relative_eq;
use candle_core::{D, Device, Tensor};
use candle_nn::{Module, loss::cross_entropy, ops::softmax};
use rand::rngs::StdRng;

use crate::{
    context::{ContextWindow, ngram_examples},
    util::multinomial,
    vocabulary::BOUNDARY_ID,
};

/// Longest sentence the generator will produce, in words.
pub const DEFAULT_MAX_SENTENCE_LEN: usize = 100;

/// A model that maps a `[batch, context_size]` tensor of word ids to
/// `[batch, vocab_size]` next-word logits.
pub trait LanguageModel: Module {
    fn context_size(&self) -> usize;
}

/// Summed negative log-likelihood of every word in `sentence` and of the
/// closing boundary, each given the words before it.
///
/// All windows of the sentence go through the model in a single forward
/// pass; the result is the same as adding up one loss per word.
pub fn sentence_loss<M: LanguageModel + ?Sized>(
    model: &M,
    sentence: &[u32],
    device: &Device,
) -> Result<Tensor> {
    let context_size = model.context_size();
    let (contexts, targets) = ngram_examples(sentence, context_size);
    let num_examples = targets.len();
    let xs = Tensor::from_vec(contexts, (num_examples, context_size), device)?;
    let ys = Tensor::from_vec(targets, (num_examples,), device)?;
    let logits = model.forward(&xs)?;

    if cfg!(debug_assertions) {
        let sm = softmax(&logits, D::Minus1)?;
        let total = sm.get(0)?.sum(0)?.to_scalar::<f32>()?;
        if !relative_eq!(total, 1.0, epsilon = 0.0001) {
            return Err(anyhow!(
                "softmax of the model's logits sums to {total}, the model has probably diverged"
            ));
        }
    }

    // cross_entropy averages over the examples, we want the total.
    let loss = (cross_entropy(&logits, &ys)? * num_examples as f64)?;
    Ok(loss)
}

/// Samples sentences one word at a time, feeding each word back into the
/// context window.
pub struct SentenceGenerator<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    max_len: usize,
}

impl<'a, M: LanguageModel + ?Sized> SentenceGenerator<'a, M> {
    pub fn new(model: &'a M, max_len: usize) -> Self {
        Self { model, max_len }
    }

    pub fn logits(&self, context: &ContextWindow, device: &Device) -> Result<Tensor> {
        let xs = Tensor::from_slice(context.ids(), (1, context.len()), device)?;
        Ok(self.model.forward(&xs)?)
    }

    /// Picks the word that follows `context`. A temperature of zero always
    /// takes the most likely word.
    pub fn next_word(
        &self,
        context: &ContextWindow,
        rng: &mut StdRng,
        temperature: f32,
        device: &Device,
    ) -> Result<u32> {
        if temperature < 0.0 {
            return Err(anyhow!("temperature must not be negative, got {temperature}"));
        }
        let logits = self.logits(context, device)?;
        if temperature == 0.0 {
            Ok(logits.argmax(1)?.get(0)?.to_scalar()?)
        } else {
            let logits = (logits / temperature as f64)?;
            let sm = softmax(&logits, 1)?;
            multinomial(&sm, rng)
        }
    }

    /// Generates word ids until the model predicts the sentence boundary or
    /// the sentence is `max_len` words long. The boundary itself is not
    /// included.
    pub fn generate(&self, rng: &mut StdRng, temperature: f32, device: &Device) -> Result<Vec<u32>> {
        let mut context = ContextWindow::new(self.model.context_size());
        let mut sentence = Vec::new();
        loop {
            let word = self.next_word(&context, rng, temperature, device)?;
            if word == BOUNDARY_ID || sentence.len() == self.max_len {
                break;
            }
            sentence.push(word);
            context.push(word);
        }
        Ok(sentence)
    }
}

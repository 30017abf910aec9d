use std::collections::HashMap;

use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, Linear, Module, VarBuilder, VarMap, ops::dropout};
use serde::{Deserialize, Serialize};

use crate::language_model::LanguageModel;

/// This is similar to candle_nn::Dropout, except that instead of
/// implementing `ModuleT` it detects whether we're training by checking
/// whether the input tensor is part of a computation graph. Models built
/// with [`FeedForwardLanguageModelOptions::build_no_grad`] therefore never
/// drop anything.
struct Dropout {
    drop_p: f32,
}

impl Dropout {
    pub fn new(drop_p: f32) -> Dropout {
        Self { drop_p }
    }
}

impl Module for Dropout {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let is_training = xs.track_op();

        if self.drop_p > 0.0 && is_training {
            dropout(xs, self.drop_p)
        } else {
            Ok(xs.clone())
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardLanguageModelOptions {
    pub vocab_size: usize,
    pub embedding_dims: usize,
    pub hidden_dims: usize,
    /// Number of preceding words the model sees, i.e. the n-gram order minus one.
    pub context_size: usize,
    pub drop_p: f32,
}

impl FeedForwardLanguageModelOptions {
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(anyhow!("vocabulary must not be empty!"));
        }
        if self.embedding_dims == 0 || self.hidden_dims == 0 {
            return Err(anyhow!(
                "embedding ({}) and hidden ({}) dimensions must be positive!",
                self.embedding_dims,
                self.hidden_dims
            ));
        }
        if self.context_size == 0 {
            return Err(anyhow!("context size must be at least one word!"));
        }
        if !(0.0..1.0).contains(&self.drop_p) {
            return Err(anyhow!(
                "dropout probability must be in [0, 1), got {}",
                self.drop_p
            ));
        }
        Ok(())
    }

    pub fn build(self, vb: VarBuilder) -> Result<FeedForwardLanguageModel> {
        FeedForwardLanguageModel::new(self, vb)
    }

    /// Builds the model from detached copies of the parameters in `varmap`,
    /// so nothing done with it can feed gradients back into training. This
    /// is also what switches dropout off for evaluation and generation.
    pub fn build_no_grad(
        self,
        varmap: &VarMap,
        device: &Device,
    ) -> Result<FeedForwardLanguageModel> {
        let detached_vars = {
            let varmap_data = varmap
                .data()
                .lock()
                .map_err(|err| anyhow!("unable to read model parameters: {err}"))?;
            let mut detached_vars: HashMap<String, Tensor> =
                HashMap::with_capacity(varmap_data.len());
            for (path, var) in varmap_data.iter() {
                detached_vars.insert(path.clone(), var.as_detached_tensor());
            }
            detached_vars
        };
        self.build(VarBuilder::from_tensors(detached_vars, DType::F32, device))
    }
}

/// Bengio-style neural n-gram model: the embeddings of the context words
/// are concatenated and fed through one tanh hidden layer.
pub struct FeedForwardLanguageModel {
    options: FeedForwardLanguageModelOptions,
    embedding: Embedding,
    hidden: Linear,
    dropout: Dropout,
    output: Linear,
}

impl FeedForwardLanguageModel {
    pub fn new(options: FeedForwardLanguageModelOptions, vb: VarBuilder) -> Result<Self> {
        options.validate()?;
        let FeedForwardLanguageModelOptions {
            vocab_size,
            embedding_dims,
            hidden_dims,
            context_size,
            drop_p,
        } = options;

        let embedding = candle_nn::embedding(vocab_size, embedding_dims, vb.pp("embedding"))?;
        let hidden = candle_nn::linear(context_size * embedding_dims, hidden_dims, vb.pp("hidden"))?;
        let output = candle_nn::linear(hidden_dims, vocab_size, vb.pp("output"))?;
        Ok(Self {
            options,
            embedding,
            hidden,
            dropout: Dropout::new(drop_p),
            output,
        })
    }

    pub fn options(&self) -> FeedForwardLanguageModelOptions {
        self.options
    }
}

impl Module for FeedForwardLanguageModel {
    /// Maps `[batch, context_size]` word ids to `[batch, vocab_size]` logits.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch_size, context_size) = xs.dims2()?;
        let emb = self.embedding.forward(xs)?;
        let emb = emb.reshape((batch_size, context_size * self.options.embedding_dims))?;
        let hidden = self.hidden.forward(&emb)?.tanh()?;
        let hidden = self.dropout.forward(&hidden)?;
        self.output.forward(&hidden)
    }
}

impl LanguageModel for FeedForwardLanguageModel {
    fn context_size(&self) -> usize {
        self.options.context_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{assert_equal_tensors, count_params};

    fn options() -> FeedForwardLanguageModelOptions {
        FeedForwardLanguageModelOptions {
            vocab_size: 10,
            embedding_dims: 4,
            hidden_dims: 6,
            context_size: 2,
            drop_p: 0.5,
        }
    }

    #[test]
    fn test_forward_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = options().build(vb).unwrap();
        let xs = Tensor::new(&[[0u32, 0], [0, 3], [3, 9]], &Device::Cpu).unwrap();

        assert_eq!(model.forward(&xs).unwrap().dims2().unwrap(), (3, 10));
        assert_eq!(model.context_size(), 2);
    }

    #[test]
    fn test_param_count() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        options().build(vb).unwrap();

        // embedding + hidden (weights, bias) + output (weights, bias)
        assert_eq!(count_params(&varmap), 10 * 4 + (8 * 6 + 6) + (6 * 10 + 10));
    }

    #[test]
    fn test_no_grad_model_is_deterministic() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        options().build(vb).unwrap();
        let model = options().build_no_grad(&varmap, &Device::Cpu).unwrap();
        let xs = Tensor::new(&[[1u32, 2], [4, 5]], &Device::Cpu).unwrap();

        let a = model.forward(&xs).unwrap();
        let b = model.forward(&xs).unwrap();
        assert!(!a.track_op());
        assert_equal_tensors(a, b).unwrap();
    }

    #[test]
    fn test_invalid_options() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut bad = options();
        bad.context_size = 0;
        assert!(bad.build(vb.clone()).is_err());

        let mut bad = options();
        bad.drop_p = 1.0;
        assert!(bad.build(vb).is_err());
    }
}

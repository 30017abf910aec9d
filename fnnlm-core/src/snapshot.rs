use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use candle_core::{
    DType, Device, Tensor,
    safetensors::{MmapedSafetensors, SliceSafetensors},
};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::{
    feed_forward_language_model::FeedForwardLanguageModelOptions, vocabulary::Vocabulary,
};

/// Key of the tensor holding the MessagePack-encoded [`SnapshotMetadata`].
/// It's a byte vector sitting next to the model parameters.
pub const SNAPSHOT_METADATA_KEY: &str = "fnnlm.metadata";

/// Everything besides the parameters needed to use a saved model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub words: Vec<String>,
    pub options: FeedForwardLanguageModelOptions,
    /// Zero-based epoch the snapshot was taken after.
    pub epoch: usize,
    pub dev_loss_per_word: f64,
}

/// Named tensors a snapshot can be read back from: a memory-mapped file or
/// an in-memory buffer.
pub trait TensorStore {
    fn read_tensor(&self, name: &str, device: &Device) -> candle_core::Result<Tensor>;
}

impl TensorStore for MmapedSafetensors {
    fn read_tensor(&self, name: &str, device: &Device) -> candle_core::Result<Tensor> {
        self.load(name, device)
    }
}

impl TensorStore for SliceSafetensors<'_> {
    fn read_tensor(&self, name: &str, device: &Device) -> candle_core::Result<Tensor> {
        self.load(name, device)
    }
}

/// Appends `.safetensors` to `filename` unless it already has an extension.
pub fn snapshot_path<P: AsRef<Path>>(filename: P) -> PathBuf {
    let path = filename.as_ref();
    if path.extension().is_none() {
        path.with_extension("safetensors")
    } else {
        path.to_path_buf()
    }
}

/// Writes the parameters in `varmap` together with `metadata` to `path`.
pub fn save_snapshot<P: AsRef<Path>>(
    path: P,
    varmap: &VarMap,
    metadata: &SnapshotMetadata,
) -> Result<()> {
    let mut tensors: HashMap<String, Tensor> = {
        let varmap_data = varmap
            .data()
            .lock()
            .map_err(|err| anyhow!("unable to read model parameters: {err}"))?;
        varmap_data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    };
    if tensors.contains_key(SNAPSHOT_METADATA_KEY) {
        return Err(anyhow!(
            "model parameter name clashes with {SNAPSHOT_METADATA_KEY}"
        ));
    }
    let bytes = rmp_serde::to_vec_named(metadata)?;
    let len = bytes.len();
    tensors.insert(
        SNAPSHOT_METADATA_KEY.to_owned(),
        Tensor::from_vec(bytes, (len,), &Device::Cpu)?,
    );
    candle_core::safetensors::save(&tensors, path)?;
    Ok(())
}

/// A saved model, ready to be turned back into a language model with
/// `metadata.options.build_no_grad(&snapshot.varmap, device)`.
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub vocabulary: Vocabulary,
    pub varmap: VarMap,
}

impl Snapshot {
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        // Same as what VarMap::load() does. It's unsafe because the file
        // could be changed underneath us while it's mapped.
        let safetensors = unsafe { MmapedSafetensors::new(path.as_ref())? };
        Self::from_safetensors(&safetensors, device)
    }

    pub fn from_bytes(bytes: &[u8], device: &Device) -> Result<Self> {
        let safetensors = SliceSafetensors::new(bytes)?;
        Self::from_safetensors(&safetensors, device)
    }

    pub fn from_safetensors<T: TensorStore>(safetensors: &T, device: &Device) -> Result<Self> {
        let Ok(metadata_tensor) = safetensors.read_tensor(SNAPSHOT_METADATA_KEY, &Device::Cpu)
        else {
            return Err(anyhow!(
                "snapshot has no {SNAPSHOT_METADATA_KEY} entry, was it written by fnnlm?"
            ));
        };
        let metadata: SnapshotMetadata =
            rmp_serde::from_slice(&metadata_tensor.to_vec1::<u8>()?)?;
        let vocabulary = Vocabulary::from_words(metadata.words.clone())?;
        if vocabulary.len() != metadata.options.vocab_size {
            return Err(anyhow!(
                "snapshot vocabulary has {} words but the model expects {}",
                vocabulary.len(),
                metadata.options.vocab_size
            ));
        }

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        metadata.options.build(vb)?;
        restore_parameters(&mut varmap, safetensors)?;

        Ok(Self {
            metadata,
            vocabulary,
            varmap,
        })
    }
}

/// Overwrites each parameter already registered in `varmap` with the tensor
/// of the same name in `store`. A missing or misshapen tensor is an error.
pub fn restore_parameters<T: TensorStore>(varmap: &mut VarMap, store: &T) -> Result<()> {
    let mut vars = varmap
        .data()
        .lock()
        .map_err(|err| anyhow!("unable to write model parameters: {err}"))?;
    vars.iter_mut().try_for_each(|(name, var)| {
        let saved = store.read_tensor(name, var.device())?;
        var.set(&saved)
            .map_err(|err| anyhow!("snapshot parameter {name} doesn't fit the model: {err}"))
    })
}

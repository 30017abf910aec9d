use anyhow::Result;
use candle_core::Tensor;
use candle_nn::VarMap;
use rand::{
    distr::{Distribution, weighted::WeightedIndex},
    rngs::StdRng,
};

/// Candle doesn't have multinomial sampling built-in, so we draw from the
/// first row of a `[1, vocab_size]` probability tensor with `rand`.
pub fn multinomial(probs: &Tensor, rng: &mut StdRng) -> Result<u32> {
    // Zero-probability words can never be drawn, so leave them out entirely.
    let (ids, weights): (Vec<u32>, Vec<f32>) = (0u32..)
        .zip(probs.get(0)?.to_vec1::<f32>()?)
        .filter(|&(_, prob)| prob > 0.0)
        .unzip();
    let picked = WeightedIndex::new(&weights)?.sample(rng);
    Ok(ids[picked])
}

pub fn count_params(varmap: &VarMap) -> usize {
    varmap
        .all_vars()
        .iter()
        .map(|var| var.as_tensor().elem_count())
        .sum()
}

/// Candle doesn't have an easy way of comparing tensors for equality.
#[cfg(test)]
pub fn assert_equal_tensors(a: Tensor, b: Tensor) -> Result<()> {
    let eq = a.eq(&b)?.flatten_all()?.to_vec1::<u8>()?;
    for item in eq {
        assert_eq!(item, 1);
    }
    Ok(())
}

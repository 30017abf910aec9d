use crate::vocabulary::BOUNDARY_ID;

/// The `size` most recent word ids, oldest first.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextWindow {
    ids: Vec<u32>,
}

impl ContextWindow {
    /// A fresh window at the start of a sentence, filled with boundaries.
    pub fn new(size: usize) -> Self {
        Self {
            ids: vec![BOUNDARY_ID; size],
        }
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn push(&mut self, id: u32) {
        if self.ids.is_empty() {
            return;
        }
        self.ids.remove(0);
        self.ids.push(id);
    }
}

/// Builds the training examples for one sentence: one context window for
/// each word plus one for the closing boundary.
///
/// Returns the windows flattened row by row (`targets.len() * context_size`
/// ids) together with the targets.
pub fn ngram_examples(sentence: &[u32], context_size: usize) -> (Vec<u32>, Vec<u32>) {
    let num_examples = sentence.len() + 1;
    let mut contexts = Vec::with_capacity(num_examples * context_size);
    let mut targets = Vec::with_capacity(num_examples);
    let mut window = ContextWindow::new(context_size);

    for &next in sentence.iter().chain(std::iter::once(&BOUNDARY_ID)) {
        contexts.extend_from_slice(window.ids());
        targets.push(next);
        window.push(next);
    }

    (contexts, targets)
}

use std::collections::HashMap;

use anyhow::{Result, anyhow};

/// Sentence boundary. Every context window starts out filled with it, and
/// predicting it ends a sentence.
pub const BOUNDARY: &str = "<s>";

/// Stand-in for any word that wasn't seen in the training data.
pub const UNKNOWN: &str = "<unk>";

pub const BOUNDARY_ID: u32 = 0;

pub const UNKNOWN_ID: u32 = 1;

/// Word-level vocabulary.
///
/// Ids are handed out in order of first appearance while the vocabulary is
/// open. Once it's frozen (after the training data has been read) it never
/// grows again, and words it doesn't know map to [`UNKNOWN_ID`].
#[derive(Clone, Debug)]
pub struct Vocabulary {
    wtoi: HashMap<String, u32>,
    itow: Vec<String>,
    frozen: bool,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        let mut vocabulary = Vocabulary {
            wtoi: HashMap::new(),
            itow: Vec::new(),
            frozen: false,
        };
        vocabulary.insert(BOUNDARY);
        vocabulary.insert(UNKNOWN);
        vocabulary
    }

    /// Rebuilds a frozen vocabulary from its ordered word list, e.g. the one
    /// stored in a snapshot.
    pub fn from_words(words: Vec<String>) -> Result<Self> {
        if words.first().map(String::as_str) != Some(BOUNDARY)
            || words.get(1).map(String::as_str) != Some(UNKNOWN)
        {
            return Err(anyhow!(
                "vocabulary must start with '{BOUNDARY}' and '{UNKNOWN}'"
            ));
        }
        let mut wtoi = HashMap::with_capacity(words.len());
        for (i, word) in words.iter().enumerate() {
            if wtoi.insert(word.clone(), i as u32).is_some() {
                return Err(anyhow!("'{}' appears more than once in vocabulary", word));
            }
        }
        Ok(Vocabulary {
            wtoi,
            itow: words,
            frozen: true,
        })
    }

    pub fn words(&self) -> &[String] {
        &self.itow
    }

    pub fn len(&self) -> usize {
        self.itow.len()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Returns the id for `word`, adding it first if the vocabulary is still
    /// open. A frozen vocabulary answers [`UNKNOWN_ID`] for new words.
    pub fn insert(&mut self, word: &str) -> u32 {
        if let Some(&id) = self.wtoi.get(word) {
            return id;
        }
        if self.frozen {
            return UNKNOWN_ID;
        }
        let id = self.itow.len() as u32;
        self.wtoi.insert(word.to_owned(), id);
        self.itow.push(word.to_owned());
        id
    }

    /// Looks `word` up without ever growing the vocabulary.
    pub fn id(&self, word: &str) -> u32 {
        self.wtoi.get(word).copied().unwrap_or(UNKNOWN_ID)
    }

    pub fn word(&self, id: u32) -> Result<&str> {
        let Some(word) = self.itow.get(id as usize) else {
            return Err(anyhow!("'{}' is not a valid word id", id));
        };
        Ok(word)
    }

    pub fn encode(&self, content: &str) -> Result<Vec<u32>> {
        let mut result = Vec::new();

        for word in content.split_whitespace() {
            let Some(&id) = self.wtoi.get(word) else {
                return Err(anyhow!("'{}' is not in the vocabulary", word));
            };
            result.push(id);
        }

        Ok(result)
    }

    /// Like `encode` but maps anything outside the vocabulary to `<unk>`.
    pub fn encode_lossy(&self, content: &str) -> Vec<u32> {
        content.split_whitespace().map(|word| self.id(word)).collect()
    }

    /// Turns ids back into a sentence with words joined by single spaces.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let words = ids
            .iter()
            .map(|&id| self.word(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(words.join(" "))
    }
}

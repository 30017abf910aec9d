use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Result, anyhow};

use crate::vocabulary::Vocabulary;

/// A sentence as word ids, without boundary symbols.
pub type Sentence = Vec<u32>;

/// Splits a corpus into sentences, one per line, with words separated by
/// whitespace. Blank lines are skipped.
pub fn read_sentences<R: BufRead>(reader: R) -> Result<Vec<Vec<String>>> {
    let mut sentences = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let words: Vec<String> = line.split_whitespace().map(String::from).collect();
        if !words.is_empty() {
            sentences.push(words);
        }
    }
    Ok(sentences)
}

/// Encodes sentences through `vocabulary`, which grows as needed unless
/// it's frozen.
pub fn encode_sentences(sentences: &[Vec<String>], vocabulary: &mut Vocabulary) -> Vec<Sentence> {
    sentences
        .iter()
        .map(|words| words.iter().map(|word| vocabulary.insert(word)).collect())
        .collect()
}

pub fn read_dataset<P: AsRef<Path>>(path: P, vocabulary: &mut Vocabulary) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|err| anyhow!("unable to open corpus {}: {err}", path.display()))?;
    let sentences = read_sentences(BufReader::new(file))?;
    log::debug!("Read {} sentences from {}.", sentences.len(), path.display());
    Ok(encode_sentences(&sentences, vocabulary))
}

/// Number of words in `sentences`, not counting boundaries. This is what
/// losses get divided by to report them per word.
pub fn count_words(sentences: &[Sentence]) -> usize {
    sentences.iter().map(Vec::len).sum()
}

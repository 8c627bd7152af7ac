use std::io::BufRead;

/// One tokenized document: an ordered sequence of sentences, each an ordered
/// sequence of tokens. Documents are streamed one at a time and never
/// materialized in bulk.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub sentences: Vec<Vec<String>>,
}

impl Document {
    pub fn is_empty(&self) -> bool {
        self.sentences.iter().all(|s| s.is_empty())
    }

    pub fn word_count(&self) -> usize {
        self.sentences.iter().map(|s| s.len()).sum()
    }

    /// Flattens the document into `(token, sentence_index)` pairs, the shape
    /// the co-occurrence window scan works on.
    pub fn flatten(&self) -> Vec<(&str, usize)> {
        let mut words = Vec::with_capacity(self.word_count());
        for (index, sentence) in self.sentences.iter().enumerate() {
            for word in sentence {
                words.push((word.as_str(), index));
            }
        }
        words
    }
}

/// Pull-based reader over the tokenized-corpus line format: one document per
/// line, tab-separated sentences, space-separated tokens.
///
/// Lines that produce no tokens are skipped and counted, never surfaced as
/// errors. I/O failures from the underlying reader do surface; the stream is
/// restartable only at the process level.
pub struct DocumentReader<R> {
    reader: R,
    max_sentences_per_doc: usize,
    lowercase: bool,
    line: String,
    /// Lines skipped because they held no tokens.
    pub num_skipped: u64,
}

impl<R: BufRead> DocumentReader<R> {
    pub fn new(reader: R, max_sentences_per_doc: usize, lowercase: bool) -> Self {
        Self {
            reader,
            max_sentences_per_doc,
            lowercase,
            line: String::new(),
            num_skipped: 0,
        }
    }

    fn parse_line(&self, line: &str) -> Document {
        let mut sentences = Vec::new();
        for sentence in line.split('\t').take(self.max_sentences_per_doc) {
            let sentence = if self.lowercase {
                sentence.to_lowercase()
            } else {
                sentence.to_string()
            };
            let words: Vec<String> = sentence
                .split(' ')
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect();
            if !words.is_empty() {
                sentences.push(words);
            }
        }
        Document { sentences }
    }
}

impl<R: BufRead> Iterator for DocumentReader<R> {
    type Item = std::io::Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    let doc = self.parse_line(self.line.trim_end_matches(['\n', '\r']));
                    if doc.is_empty() {
                        self.num_skipped += 1;
                        continue;
                    }
                    return Some(Ok(doc));
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(input: &str, lowercase: bool) -> (Vec<Document>, u64) {
        let mut reader = DocumentReader::new(Cursor::new(input.to_string()), 64, lowercase);
        let docs: Vec<Document> = reader.by_ref().map(|d| d.unwrap()).collect();
        (docs, reader.num_skipped)
    }

    #[test]
    fn parses_tab_separated_sentences() {
        let (docs, skipped) = read_all("the cat sat\tthe cat ran\na dog ran fast\n", true);
        assert_eq!(skipped, 0);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].sentences.len(), 2);
        assert_eq!(docs[0].sentences[0], vec!["the", "cat", "sat"]);
        assert_eq!(docs[1].sentences[0], vec!["a", "dog", "ran", "fast"]);
    }

    #[test]
    fn skips_empty_lines_and_counts_them() {
        let (docs, skipped) = read_all("\n\t \t\nreal doc\n", true);
        assert_eq!(docs.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn truncates_to_max_sentences() {
        let mut reader = DocumentReader::new(Cursor::new("a\tb\tc\td\n".to_string()), 2, true);
        let doc = reader.next().unwrap().unwrap();
        assert_eq!(doc.sentences.len(), 2);
    }

    #[test]
    fn preserves_case_when_asked() {
        let (docs, _) = read_all("The Cat\n", false);
        assert_eq!(docs[0].sentences[0], vec!["The", "Cat"]);
        let (docs, _) = read_all("The Cat\n", true);
        assert_eq!(docs[0].sentences[0], vec!["the", "cat"]);
    }

    #[test]
    fn flatten_tracks_sentence_indexes() {
        let (docs, _) = read_all("a b\tc\n", true);
        assert_eq!(
            docs[0].flatten(),
            vec![("a", 0), ("b", 0), ("c", 1)]
        );
    }
}

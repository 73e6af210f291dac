//! Sentence-aware passage splitting for retrieval.
//!
//! Documents are broken into bounded-length passages before embedding so that
//! long abstracts do not dilute a single vector. Splitting is recursive: the
//! text is first cut at the most significant delimiter (paragraph breaks),
//! and any piece that is still too long is cut at the next delimiter
//! (sentence endings, then line breaks, then spaces). Atomic segments are then
//! packed greedily into passages no longer than the configured budget.
//!
//! Every [`Passage`] carries its byte span in the source text, so callers can
//! persist a `row -> (document, span)` mapping and recover the exact passage
//! text later without re-running the splitter.
//!
//! ```
//! use quire_context::text::PassageSplitter;
//!
//! let splitter = PassageSplitter::sentences(40);
//! let text = "Graphs are everywhere. Trees are graphs too. Forests are sets of trees.";
//! let passages = splitter.split(text);
//!
//! assert!(passages.len() > 1);
//! for passage in &passages {
//!     assert!(passage.text.len() <= 40);
//!     assert_eq!(&text[passage.start..passage.end], passage.text);
//! }
//! ```
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::LazyLock;

/// Delimiters used for sentence-boundary splitting, from most to least significant.
///
/// - `\n\s*\n`: paragraph breaks.
/// - `[.!?]+["')\]]*\s+`: sentence endings, including closing quotes or brackets.
/// - `\n`: line breaks.
/// - ` `: spaces.
pub const SENTENCE_DELIMITERS: &[&str] = &[
    r"\n\s*\n",              // Paragraphs
    r#"[.!?]+["')\]]*\s+"#, // Sentence endings
    r"\n",                   // Line breaks
    r" ",                    // Spaces
];

static SENTENCE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    SENTENCE_DELIMITERS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

static SENTENCE_END: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(SENTENCE_DELIMITERS[1]).ok());

/// A bounded-length slice of a source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Passage<'a> {
    /// Position of this passage among the passages of its source text (0-indexed).
    pub sequence: usize,
    /// Byte offset of the first character of the passage.
    pub start: usize,
    /// Byte offset one past the last character of the passage.
    pub end: usize,
    /// The passage text, trimmed of surrounding whitespace.
    pub text: &'a str,
}

impl Passage<'_> {
    /// The byte range of this passage in its source text.
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Splits text into passages no longer than `max_passage_len` bytes.
///
/// A budget of `0` disables splitting: the whole (trimmed) text becomes a
/// single passage.
#[derive(Debug, Clone)]
pub struct PassageSplitter {
    delimiters: Vec<Regex>,
    max_passage_len: usize,
}

impl PassageSplitter {
    /// Creates a splitter from custom delimiter patterns.
    ///
    /// Patterns are applied in order, from most significant to least
    /// significant. Returns an error if any pattern is not a valid regex.
    pub fn new(delimiter_patterns: &[&str], max_passage_len: usize) -> Result<Self, regex::Error> {
        let delimiters = delimiter_patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            delimiters,
            max_passage_len,
        })
    }

    /// Creates a splitter that cuts at paragraph and sentence boundaries first.
    pub fn sentences(max_passage_len: usize) -> Self {
        Self {
            delimiters: SENTENCE_REGEXES.clone(),
            max_passage_len,
        }
    }

    /// The configured passage budget in bytes. `0` means splitting is disabled.
    pub fn max_passage_len(&self) -> usize {
        self.max_passage_len
    }

    /// Splits `text` into passages.
    ///
    /// Passages are returned in source order, never overlap, and contain no
    /// leading or trailing whitespace. Whitespace-only text produces no
    /// passages.
    pub fn split<'a>(&self, text: &'a str) -> Vec<Passage<'a>> {
        if self.max_passage_len == 0 {
            return trimmed(text, 0..text.len())
                .map(|span| Passage {
                    sequence: 0,
                    start: span.start,
                    end: span.end,
                    text: &text[span],
                })
                .into_iter()
                .collect();
        }

        let segments = self.split_recursively_into_segments(text, 0, 0);

        let mut spans: Vec<Range<usize>> = Vec::new();
        let mut current_start = 0;
        let mut current_end = 0;

        for segment in segments {
            // Flush the running passage when this segment would overflow it.
            if current_end - current_start + segment.len() > self.max_passage_len
                && current_start != current_end
            {
                spans.push(current_start..current_end);
                current_start = segment.start;
                current_end = segment.end;
            } else {
                if current_start == current_end {
                    current_start = segment.start;
                }
                current_end = segment.end;
            }
        }

        if current_start != current_end {
            spans.push(current_start..current_end);
        }

        spans
            .into_iter()
            .filter_map(|span| trimmed(text, span))
            .enumerate()
            .map(|(sequence, span)| Passage {
                sequence,
                start: span.start,
                end: span.end,
                text: &text[span],
            })
            .collect()
    }

    // Returns byte ranges of "atomic" segments: either delimiters themselves or
    // pieces that fit in the budget (or could not be split further).
    fn split_recursively_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        offset: usize,
    ) -> Vec<Range<usize>> {
        let mut segments = Vec::new();

        if text.is_empty() {
            return segments;
        }

        if text.len() <= self.max_passage_len {
            segments.push(offset..offset + text.len());
            return segments;
        }

        // Out of delimiters: fall back to cutting on character boundaries.
        if delimiter_idx >= self.delimiters.len() {
            let mut local_start = 0;
            while local_start < text.len() {
                let mut local_end = (local_start + self.max_passage_len).min(text.len());
                while !text.is_char_boundary(local_end) {
                    local_end -= 1;
                }
                if local_end == local_start {
                    // A single character wider than the budget.
                    local_end = local_start + 1;
                    while !text.is_char_boundary(local_end) {
                        local_end += 1;
                    }
                }
                segments.push(offset + local_start..offset + local_end);
                local_start = local_end;
            }
            return segments;
        }

        let delimiter = &self.delimiters[delimiter_idx];
        let mut local_start = 0;

        for mat in delimiter.find_iter(text) {
            if mat.start() > local_start {
                segments.extend(self.split_recursively_into_segments(
                    &text[local_start..mat.start()],
                    delimiter_idx + 1,
                    offset + local_start,
                ));
            }
            segments.push(offset + mat.start()..offset + mat.end());
            local_start = mat.end();
        }

        if local_start < text.len() {
            segments.extend(self.split_recursively_into_segments(
                &text[local_start..],
                delimiter_idx + 1,
                offset + local_start,
            ));
        }

        segments
    }
}

/// Splits `text` into sentences at `.`, `!` or `?` followed by whitespace.
///
/// Terminal punctuation stays with its sentence. Blank sentences are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let Some(sentence_end) = SENTENCE_END.as_ref() else {
        return vec![text.trim()].into_iter().filter(|s| !s.is_empty()).collect();
    };

    let mut sentences = Vec::new();
    let mut start = 0;
    for mat in sentence_end.find_iter(text) {
        let sentence = text[start..mat.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = mat.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn trimmed(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[span.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return None;
    }
    Some(span.start + leading..span.end - trailing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic_respects_budget() {
        let splitter = PassageSplitter::sentences(50);
        let text = "The first sentence is here. The second sentence follows it. \
                    A third one closes the paragraph.\n\nA new paragraph starts. It is short.";
        let passages = splitter.split(text);

        assert!(passages.len() > 1);
        for (i, passage) in passages.iter().enumerate() {
            assert_eq!(passage.sequence, i);
            assert!(passage.text.len() <= 50, "too long: {:?}", passage.text);
            assert_eq!(&text[passage.span()], passage.text);
            assert_eq!(passage.text, passage.text.trim());
        }
    }

    #[test]
    fn test_split_prefers_sentence_boundaries() {
        let splitter = PassageSplitter::sentences(30);
        let text = "Short one here. Another short one. Last bit.";
        let passages = splitter.split(text);

        let texts: Vec<&str> = passages.iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["Short one here.", "Another short one. Last bit."]);
    }

    #[test]
    fn test_split_single_passage_when_small() {
        let splitter = PassageSplitter::sentences(500);
        let text = "  Fits easily. Nothing to split.  ";
        let passages = splitter.split(text);

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "Fits easily. Nothing to split.");
        assert_eq!(passages[0].start, 2);
    }

    #[test]
    fn test_zero_budget_disables_splitting() {
        let splitter = PassageSplitter::sentences(0);
        let text = "One. Two. Three. ".repeat(200);
        let passages = splitter.split(&text);

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, text.trim());
    }

    #[test]
    fn test_empty_and_blank_text() {
        let splitter = PassageSplitter::sentences(100);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n\n  ").is_empty());
        assert!(PassageSplitter::sentences(0).split(" ").is_empty());
    }

    #[test]
    fn test_character_fallback_keeps_utf8_boundaries() {
        let splitter = PassageSplitter::sentences(5);
        let text = "ééééééééééé";
        let passages = splitter.split(text);

        assert!(passages.len() > 1);
        let rebuilt: String = passages.iter().map(|p| p.text).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_custom_delimiters() -> Result<(), regex::Error> {
        let splitter = PassageSplitter::new(&[r";"], 8)?;
        let passages = splitter.split("alpha;beta;gamma");
        let texts: Vec<&str> = passages.iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["alpha;", "beta;", "gamma"]);
        Ok(())
    }

    #[test]
    fn test_invalid_delimiter_is_an_error() {
        assert!(PassageSplitter::new(&["("], 10).is_err());
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Cats purr. Dogs bark!  Do fish sing? Maybe");
        assert_eq!(
            sentences,
            vec!["Cats purr.", "Dogs bark!", "Do fish sing?", "Maybe"]
        );
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_sentence_delimiters_compile() {
        assert_eq!(SENTENCE_REGEXES.len(), SENTENCE_DELIMITERS.len());
        assert!(SENTENCE_END.is_some());
    }
}

pub mod text;

// Re-export the splitter for external use
pub use text::{Passage, PassageSplitter, SENTENCE_DELIMITERS, split_sentences};

use clap::Parser;
use quire_context::text::{PassageSplitter, SENTENCE_DELIMITERS};
use std::fs;
use std::io::{self, Read};

/// Split a text file into retrieval passages and print them as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Maximum passage length in bytes. 0 keeps the whole text as one passage.
    #[arg(short, long, default_value_t = 1000)]
    max_passage_len: usize,

    /// Comma-separated list of regex patterns for delimiters.
    /// Defaults to paragraph and sentence delimiters if not provided.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let splitter = match args.delimiters {
        Some(patterns) => {
            let patterns: Vec<&str> = patterns.iter().map(|s| s.as_str()).collect();
            PassageSplitter::new(&patterns, args.max_passage_len)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
        }
        None => PassageSplitter::new(SENTENCE_DELIMITERS, args.max_passage_len)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
    };

    let passages = splitter.split(&content);
    let json_output = serde_json::to_string_pretty(&passages)?;
    println!("{}", json_output);

    Ok(())
}

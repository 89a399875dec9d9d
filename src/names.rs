use std::collections::HashSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SUFFIX_LEN: usize = 4;
const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Lowercases and maps punctuation/whitespace to `_`, then drops anything
/// outside `[a-z0-9_-]`.
pub fn normalize(human_name: &str) -> String {
    let mapped: String = human_name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '\t' | '\n' | '.' | '/' | '\\' | ':' | ',' | ';' | '(' | ')' | '[' | ']' | '{' | '}' | '@' | '#' => '_',
            other => other,
        })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();

    // HCL identifiers must not start with a digit or '-'
    match mapped.chars().next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => mapped,
        _ => format!("_{}", mapped),
    }
}

/// Hands out `normalize(name) + "_" + 4 random chars`, never the same name twice
/// in one run. Seedable so tests get stable names.
pub struct NameGenerator {
    rng: StdRng,
    issued: HashSet<String>,
}

impl NameGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng, issued: HashSet::new() }
    }

    pub fn generate(&mut self, human_name: &str) -> String {
        let prefix = normalize(human_name);
        loop {
            let candidate = format!("{}_{}", prefix, self.suffix());
            if self.issued.insert(candidate.clone()) {
                return candidate;
            }
            tracing::debug!(name = %candidate, "local name collision, drawing a new suffix");
        }
    }

    /// Marks names that already exist in a document so they are never handed out.
    pub fn reserve(&mut self, name: &str) {
        self.issued.insert(name.to_string());
    }

    fn suffix(&mut self) -> String {
        (0..SUFFIX_LEN)
            .map(|_| SUFFIX_CHARS[self.rng.gen_range(0..SUFFIX_CHARS.len())] as char)
            .collect()
    }
}

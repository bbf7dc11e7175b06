// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Lexical signals: code/math detection and character-trigram entropy.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"```").unwrap(),
        Regex::new(r"\bfn\s+\w+\s*\(").unwrap(),
        Regex::new(r"\bdef\s+\w+\s*\(").unwrap(),
        Regex::new(r"\bfunction\s+\w+\s*\(").unwrap(),
        Regex::new(r"\bclass\s+\w+").unwrap(),
        Regex::new(r"\b(import|from|require|include|use)\s+[\w.:/]+").unwrap(),
        Regex::new(r"\b(SELECT|INSERT|UPDATE|DELETE)\s+.+\s+(FROM|INTO|SET)\b").unwrap(),
        Regex::new(r"[{};]\s*\n").unwrap(),
        Regex::new(r"\b(const|let|var)\s+\w+\s*=").unwrap(),
    ]
});

static MATH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\\(frac|sum|int|sqrt|alpha|beta|gamma|partial|nabla)\b").unwrap(),
        Regex::new(r"\$[^$\n]+\$").unwrap(),
        Regex::new(r"\b(theorem|lemma|proof|derivative|integral|eigenvalue)\b").unwrap(),
        Regex::new(r"[∑∫∂√∞≤≥≈≠±×÷]").unwrap(),
        Regex::new(r"\b\d+\s*[+\-*/^]\s*\d+\s*=").unwrap(),
    ]
});

pub fn has_code(text: &str) -> bool {
    CODE_PATTERNS.iter().any(|re| re.is_match(text))
}

pub fn has_math(text: &str) -> bool {
    MATH_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Shannon entropy (bits) of the character-trigram distribution.
///
/// Natural prose lands around 6-9 bits; highly repetitive or templated
/// input scores lower. Texts shorter than one trigram score 0.
pub fn trigram_entropy(text: &str) -> f32 {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 3 {
        return 0.0;
    }
    let mut counts: HashMap<[char; 3], u32> = HashMap::new();
    for w in chars.windows(3) {
        *counts.entry([w[0], w[1], w[2]]).or_insert(0) += 1;
    }
    let total = (chars.len() - 2) as f32;
    -counts
        .values()
        .map(|&c| {
            let p = c as f32 / total;
            p * p.log2()
        })
        .sum::<f32>()
}

/// Input token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

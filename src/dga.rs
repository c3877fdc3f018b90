//! Domain-generation-algorithm scoring
//!
//! Pure, stateless scorer: the final label (TLD) is dropped and the rest
//! of the name is scored on entropy, digit share, consonant share, vowel
//! share and length. Each flag adds a fixed weight; a name is DGA-like
//! when the sum reaches the threshold.

use crate::types::AnomalyScore;
use std::collections::HashMap;

const ENTROPY_LIMIT: f64 = 3.5;
const DIGIT_RATIO_LIMIT: f64 = 0.3;
const CONSONANT_RATIO_LIMIT: f64 = 0.7;
const VOWEL_RATIO_RANGE: (f64, f64) = (0.1, 0.5);
const LENGTH_RANGE: (usize, usize) = (6, 20);

// Weights in tenths so sums compare exactly against decimal thresholds
const ENTROPY_WEIGHT: u32 = 3;
const DIGIT_WEIGHT: u32 = 2;
const CONSONANT_WEIGHT: u32 = 2;
const VOWEL_WEIGHT: u32 = 2;
const LENGTH_WEIGHT: u32 = 1;

/// DGA scorer with a fixed threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DgaDetector {
    threshold: f64,
}

impl Default for DgaDetector {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl DgaDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a name. Single-label names score zero.
    pub fn detect(&self, subject: &str) -> AnomalyScore {
        let Some((name, _tld)) = subject.rsplit_once('.') else {
            return AnomalyScore {
                score: 0.0,
                is_dga: false,
                entropy: 0.0,
                length: subject.chars().count(),
                digit_ratio: 0.0,
                consonant_ratio: 0.0,
                vowel_ratio: 0.0,
            };
        };

        let length = name.chars().count();
        let entropy = shannon_entropy(name);
        let digit_ratio = ratio(name.chars().filter(|c| c.is_ascii_digit()).count(), length);
        let letters = name.chars().filter(|c| c.is_alphabetic()).count();
        let vowels = name.chars().filter(|c| is_vowel(*c)).count();
        let consonant_ratio = ratio(letters - vowels, letters);
        let vowel_ratio = ratio(vowels, letters);

        let mut points = 0;
        if entropy > ENTROPY_LIMIT {
            points += ENTROPY_WEIGHT;
        }
        if digit_ratio > DIGIT_RATIO_LIMIT {
            points += DIGIT_WEIGHT;
        }
        if consonant_ratio > CONSONANT_RATIO_LIMIT {
            points += CONSONANT_WEIGHT;
        }
        if vowel_ratio < VOWEL_RATIO_RANGE.0 || vowel_ratio > VOWEL_RATIO_RANGE.1 {
            points += VOWEL_WEIGHT;
        }
        if length < LENGTH_RANGE.0 || length > LENGTH_RANGE.1 {
            points += LENGTH_WEIGHT;
        }

        let score = f64::from(points) / 10.0;
        AnomalyScore {
            score,
            is_dga: score >= self.threshold,
            entropy,
            length,
            digit_ratio,
            consonant_ratio,
            vowel_ratio,
        }
    }
}

/// Shannon entropy in bits per character
pub fn shannon_entropy(s: &str) -> f64 {
    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    freq.values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum::<f64>()
        .max(0.0)
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'A' | 'E' | 'I' | 'O' | 'U')
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

//! String similarity used to match citation text against page text blocks.

/// A similarity score between two strings, from 0 (nothing shared) to 100
/// (identical).
///
/// The evidence locator lowercases both inputs before calling
/// [`Similarity::ratio`]; implementations need not normalise case.
pub trait Similarity: Send + Sync {
    fn ratio(&self, a: &str, b: &str) -> u8;
}

/// Levenshtein ratio with substitutions counted as a delete plus an insert:
/// `100 * (len_a + len_b - distance) / (len_a + len_b)`, rounded half to even.
///
/// Lengths are in `char`s. An empty input scores 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevenshteinRatio;

impl Similarity for LevenshteinRatio {
    fn ratio(&self, a: &str, b: &str) -> u8 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        // With insert/delete only, matched characters = longest common subsequence.
        let matched = lcs_len(&a, &b);
        let total = a.len() + b.len();
        round_half_even(200 * matched, total)
    }
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// `num / den` rounded to the nearest integer, ties to even.
fn round_half_even(num: usize, den: usize) -> u8 {
    let q = num / den;
    let r = num % den;
    let q = match (2 * r).cmp(&den) {
        std::cmp::Ordering::Greater => q + 1,
        std::cmp::Ordering::Equal if q % 2 == 1 => q + 1,
        _ => q,
    };
    q.min(100) as u8
}

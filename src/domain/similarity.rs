//! Levenshtein-style similarity ratio used for fuzzy matching
//!
//! The ratio is `100 * (len(a) + len(b) - indel(a, b)) / (len(a) + len(b))`
//! where `indel` is the edit distance counting only insertions and
//! deletions (a substitution costs 2). Rounded to the nearest integer.

/// Similarity of two strings in percent, 0..=100
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }

    let lcs = longest_common_subsequence(&a, &b);
    let score = (200 * lcs) as f64 / total as f64;
    score.round() as u8
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(ratio("echo", "echo"), 100);
        assert_eq!(ratio("", ""), 100);
    }

    #[test]
    fn single_substitution() {
        // one substitution in four characters: (8 - 2) / 8
        assert_eq!(ratio("ecgo", "echo"), 75);
    }

    #[test]
    fn prefix_boundary_is_exactly_sixty() {
        assert_eq!(ratio("abc", "abcdefg"), 60);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(ratio("abc", "xyz"), 0);
        assert_eq!(ratio("abc", ""), 0);
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(ratio("über", "uber"), 75);
    }
}

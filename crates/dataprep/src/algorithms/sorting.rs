//! Natural (numeric-aware) ordering of file names, so `img_2` sorts before `img_10`.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

/// Split a name into alternating runs of digits and non-digits
fn chunks(name: &str) -> Vec<Chunk<'_>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut in_digits = None;

    for (idx, ch) in name.char_indices() {
        let is_digit = ch.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != is_digit => {
                chunks.push(make_chunk(&name[start..idx], prev));
                start = idx;
            }
            _ => {}
        }
        in_digits = Some(is_digit);
    }

    if let Some(is_digit) = in_digits {
        chunks.push(make_chunk(&name[start..], is_digit));
    }

    chunks
}

fn make_chunk(run: &str, is_digit: bool) -> Chunk<'_> {
    if is_digit {
        Chunk::Digits(run)
    } else {
        Chunk::Text(run)
    }
}

/// Compare digit runs by integer value without overflowing on long runs
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_text(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Natural comparison: digit runs compare as integers, text runs case-insensitively.
///
/// Names whose keys are equal (`a01` vs `a1`, `A` vs `a`) fall back to a plain
/// byte comparison so the ordering stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = chunks(a);
    let right = chunks(b);

    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (l, r) {
            (Chunk::Digits(l), Chunk::Digits(r)) => cmp_digits(l, r),
            (Chunk::Text(l), Chunk::Text(r)) => cmp_text(l, r),
            (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

/// Sort names in natural order
pub fn sort_names<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

/// Sort paths in natural order of their full textual form
pub fn sort_paths(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| natural_cmp(&path_key(a), &path_key(b)));
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

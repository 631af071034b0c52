//! Frame-set scanner (spec §4.1).
//!
//! Enumerates already-rendered frames in an output directory by extracting
//! trailing integers from filenames. Missing directory is an empty set, not
//! an error. Tolerant of mixed image extensions: only the numeric component
//! matters.

use std::collections::BTreeSet;
use std::path::Path;

use walkdir::WalkDir;

/// `ExistingFrames(output_dir)` — every regular file directly within `dir`
/// whose stem yields a parseable frame number.
pub fn existing_frames(dir: &Path) -> BTreeSet<i64> {
    let mut frames = BTreeSet::new();

    if !dir.is_dir() {
        return frames;
    }

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(n) = parse_frame_number(stem) {
            frames.insert(n);
        }
    }

    frames
}

/// Extract the maximal run of trailing digits from `stem`; if none is
/// found, try the first digit run instead. Returns `None` for names with no
/// digits at all.
pub(crate) fn parse_frame_number(stem: &str) -> Option<i64> {
    let bytes = stem.as_bytes();

    // Maximal trailing digit run.
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_digit() {
        end -= 1;
    }
    if end < bytes.len() {
        return stem[end..].parse().ok();
    }

    // Fall back to the first digit run anywhere in the stem.
    let mut start = None;
    let mut run_end = 0;
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            if start.is_none() {
                start = Some(i);
            }
            run_end = i + 1;
        } else if start.is_some() {
            break;
        }
    }
    start.and_then(|s| stem[s..run_end].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_directory_is_empty() {
        assert!(existing_frames(Path::new("/does/not/exist/at/all")).is_empty());
    }

    #[test]
    fn scans_mixed_extensions() {
        let dir = tempdir().unwrap();
        for name in ["0001.png", "0002.jpg", "0003.exr"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(existing_frames(dir.path()), BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn ignores_subdirectories_and_unparseable_names() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        fs::write(dir.path().join("0007.png"), b"x").unwrap();
        fs::create_dir(dir.path().join("0099")).unwrap();
        assert_eq!(existing_frames(dir.path()), BTreeSet::from([7]));
    }

    #[test]
    fn trailing_digit_run_wins_over_leading() {
        assert_eq!(parse_frame_number("render_v2_0042"), Some(42));
    }

    #[test]
    fn falls_back_to_first_digit_run_when_no_trailing_digits() {
        assert_eq!(parse_frame_number("0042_final"), Some(42));
    }

    #[test]
    fn no_digits_at_all() {
        assert_eq!(parse_frame_number("final"), None);
    }
}

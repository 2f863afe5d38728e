//! Range-list syntax for node and core selections
//!
//! `"0,2-4,7"` names the set `{0, 2, 3, 4, 7}`. The same syntax is used by
//! `--nodes-list`, `--cores-list` and the kernel's `cpulist` files.

use crate::error::{LaunchError, Result};
use std::collections::BTreeSet;

/// Parse a comma-separated list of integers and `low-high` ranges
///
/// Blank input yields an empty set. Duplicates collapse.
pub fn parse_list_argument(text: &str) -> Result<BTreeSet<usize>> {
    let mut ids = BTreeSet::new();
    let text = text.trim();
    if text.is_empty() {
        return Ok(ids);
    }

    for token in text.split(',') {
        let token = token.trim();
        if !token.contains('-') {
            ids.insert(parse_id(token, token)?);
            continue;
        }

        let bounds = token
            .split('-')
            .map(|part| parse_id(part.trim(), token))
            .collect::<Result<Vec<_>>>()?;

        let [begin, end] = bounds[..] else {
            return Err(LaunchError::invalid_range(
                token,
                format!("expected 2 bounds, found {}", bounds.len()),
            ));
        };
        if begin > end {
            return Err(LaunchError::RangeOrder { begin, end });
        }
        ids.extend(begin..=end);
    }

    Ok(ids)
}

/// Plain decimal digits only, so signs and blanks are format errors
fn parse_id(part: &str, token: &str) -> Result<usize> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LaunchError::invalid_range(token, format!("'{}' is not an integer", part)));
    }
    part.parse()
        .map_err(|_| LaunchError::invalid_range(token, format!("'{}' is out of range", part)))
}

/// Render ids as compact range text (`[0, 1, 2, 3, 8]` -> `"0-3,8"`)
pub fn format_ranges<I>(ids: I) -> String
where
    I: IntoIterator<Item = usize>,
{
    let sorted: BTreeSet<usize> = ids.into_iter().collect();
    let mut parts: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter();

    let Some(first) = iter.next() else {
        return String::new();
    };
    let (mut start, mut prev) = (first, first);

    for id in iter {
        if id == prev + 1 {
            prev = id;
            continue;
        }
        parts.push(render_span(start, prev));
        start = id;
        prev = id;
    }
    parts.push(render_span(start, prev));

    parts.join(",")
}

fn render_span(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(ids: &[usize]) -> BTreeSet<usize> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_mixed_singles_and_ranges() {
        assert_eq!(parse_list_argument("0,2-4,7").unwrap(), set(&[0, 2, 3, 4, 7]));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_list_argument("").unwrap().is_empty());
        assert!(parse_list_argument("   ").unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_collapse() {
        assert_eq!(parse_list_argument("1,1,1").unwrap(), set(&[1]));
        assert_eq!(parse_list_argument("0-3,2-5").unwrap(), set(&[0, 1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_whitespace_is_ignored() {
        assert_eq!(parse_list_argument(" 0 , 2 - 3 ").unwrap(), set(&[0, 2, 3]));
    }

    #[test]
    fn test_inverted_range() {
        let err = parse_list_argument("5-3").unwrap_err();
        assert!(matches!(err, LaunchError::RangeOrder { begin: 5, end: 3 }));
    }

    #[test]
    fn test_malformed_tokens() {
        for bad in ["1-2-3", "a", "1-b", "1,,2", "-4", "3-", "+5", "1-+3", "99999999999999999999999"] {
            let err = parse_list_argument(bad).unwrap_err();
            assert!(
                matches!(err, LaunchError::InvalidRange { .. }),
                "expected format error for {:?}, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_format_ranges() {
        assert_eq!(format_ranges(vec![0, 1, 2, 3, 8]), "0-3,8");
        assert_eq!(format_ranges(vec![5]), "5");
        assert_eq!(format_ranges(vec![4, 2, 3, 10, 12, 11]), "2-4,10-12");
        assert_eq!(format_ranges(Vec::<usize>::new()), "");
    }

    proptest! {
        #[test]
        fn formatted_sets_parse_back(ids in proptest::collection::btree_set(0usize..512, 0..64)) {
            let text = format_ranges(ids.iter().copied());
            prop_assert_eq!(parse_list_argument(&text).unwrap(), ids);
        }
    }
}

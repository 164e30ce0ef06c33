//! Node range syntax.
//!
//! ```text
//! INPUT         EXPANDED
//! 0             0
//! [0]           0
//! [0-4]         0,1,2,3,4
//! [0,2-4]       0,2,3,4
//! [2-4,0]       2,3,4,0
//! [0,2,4]       0,2,4
//! ```
//!
//! Order and duplicates are preserved exactly as written.

use crate::error::{Result, TestbedError};

/// Largest number of indices a single `low-high` token may expand to.
pub const MAX_RANGE_SPAN: usize = 1 << 16;

/// Expand a range expression into node indices.
pub fn parse_range(s: &str) -> Result<Vec<usize>> {
    let s = s.trim();

    if let Some(inner) = s.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| TestbedError::Parse(format!("unterminated range `{}`", s)))?;

        if inner.contains('[') || inner.contains(']') {
            return Err(TestbedError::Parse(format!("nested brackets in range `{}`", s)));
        }
        if inner.trim().is_empty() {
            return Err(TestbedError::Parse(format!("empty range `{}`", s)));
        }

        let mut out = Vec::new();
        for token in inner.split(',') {
            out.extend(expand_dash_range(token)?);
        }
        return Ok(out);
    }

    if s.ends_with(']') {
        return Err(TestbedError::Parse(format!("unbalanced brackets in range `{}`", s)));
    }

    Ok(vec![parse_index(s)?])
}

/// Expand a single token: `N` or inclusive `low-high`.
fn expand_dash_range(token: &str) -> Result<Vec<usize>> {
    let token = token.trim();
    let parts: Vec<&str> = token.split('-').collect();

    match parts.as_slice() {
        [single] => Ok(vec![parse_index(single)?]),
        [low, high] => {
            let low = parse_index(low)?;
            let high = parse_index(high)?;
            if low > high {
                return Err(TestbedError::Parse(format!(
                    "range `{}` has low bound greater than high bound",
                    token
                )));
            }
            if high - low >= MAX_RANGE_SPAN {
                return Err(TestbedError::Parse(format!(
                    "range `{}` spans more than {} nodes",
                    token, MAX_RANGE_SPAN
                )));
            }
            Ok((low..=high).collect())
        }
        _ => Err(TestbedError::Parse(format!("invalid range token `{}`", token))),
    }
}

fn parse_index(s: &str) -> Result<usize> {
    let s = s.trim();
    s.parse::<usize>()
        .map_err(|_| TestbedError::Parse(format!("`{}` is not a valid node index", s)))
}

/// Check that every index is below `total`.
pub fn validate_range(list: &[usize], total: usize) -> Result<()> {
    let max = match list.iter().max() {
        Some(&max) => max,
        None => return Ok(()),
    };

    if max >= total {
        return Err(TestbedError::Validation(format!(
            "Node range contains value ({}) outside of valid range [0-{}]",
            max,
            total as i64 - 1
        )));
    }

    Ok(())
}

/// The full range `[0-(count-1)]`.
pub fn full_range(count: usize) -> Vec<usize> {
    (0..count).collect()
}

/// Resolve the zero/one/two argument `from to` forms used by `connect`.
///
/// No arguments selects every node on both sides; one argument is used
/// for both sides.
pub fn parse_pair(args: &[String], count: usize) -> Result<(Vec<usize>, Vec<usize>)> {
    match args {
        [] => Ok((full_range(count), full_range(count))),
        [both] => {
            let list = parse_range(both)?;
            Ok((list.clone(), list))
        }
        [from, to] => Ok((parse_range(from)?, parse_range(to)?)),
        _ => Err(TestbedError::Validation(
            "expected between 0 and 2 range arguments".into(),
        )),
    }
}

/// Parse `key,value` pairs; a bare `key` means `"true"`.
pub fn parse_attr_pairs(raw: &[String]) -> Vec<(String, String)> {
    raw.iter()
        .map(|attr| match attr.split_once(',') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (attr.clone(), "true".to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_range_forms() {
        let cases: &[(&str, &[usize])] = &[
            ("0", &[0]),
            ("[0]", &[0]),
            ("[0-1]", &[0, 1]),
            ("[0-5]", &[0, 1, 2, 3, 4, 5]),
            ("[4-7]", &[4, 5, 6, 7]),
            ("[0,1]", &[0, 1]),
            ("[1,4]", &[1, 4]),
            ("[1,3,5-8]", &[1, 3, 5, 6, 7, 8]),
            ("[2-4,0]", &[2, 3, 4, 0]),
            ("[1,1,0]", &[1, 1, 0]),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_range(input).unwrap(), expected.to_vec(), "input {}", input);
        }
    }

    #[test]
    fn parse_range_rejects_malformed() {
        for input in ["", "x", "[]", "[ ]", "[1,x]", "[3-1]", "[1", "1]", "[[1]]", "[1-2-3]", "-1", "[1,]"] {
            let err = parse_range(input).unwrap_err();
            assert!(matches!(err, TestbedError::Parse(_)), "input {:?} gave {:?}", input, err);
        }
    }

    #[test]
    fn oversized_span_is_a_parse_error() {
        for input in ["[0-18446744073709551615]", "[5-70000]", "[1,0-65536]"] {
            let err = parse_range(input).unwrap_err();
            assert!(matches!(err, TestbedError::Parse(_)), "input {:?} gave {:?}", input, err);
        }
        assert!(matches!(
            parse_range("18446744073709551616"),
            Err(TestbedError::Parse(_))
        ));
        assert_eq!(parse_range("[0-65535]").unwrap().len(), MAX_RANGE_SPAN);
    }

    #[test]
    fn validate_range_bounds() {
        assert!(validate_range(&[0, 1], 2).is_ok());
        assert!(validate_range(&[], 0).is_ok());

        let err = validate_range(&[0, 3], 2).unwrap_err();
        assert!(matches!(err, TestbedError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Node range contains value (3) outside of valid range [0-1]"
        );
    }

    #[test]
    fn parse_pair_defaults() {
        let (from, to) = parse_pair(&[], 3).unwrap();
        assert_eq!(from, vec![0, 1, 2]);
        assert_eq!(to, vec![0, 1, 2]);

        let (from, to) = parse_pair(&strings(&["[1-2]"]), 3).unwrap();
        assert_eq!(from, vec![1, 2]);
        assert_eq!(from, to);

        let (from, to) = parse_pair(&strings(&["0", "[1,2]"]), 3).unwrap();
        assert_eq!(from, vec![0]);
        assert_eq!(to, vec![1, 2]);

        assert!(parse_pair(&strings(&["0", "1", "2"]), 3).is_err());
    }

    #[test]
    fn attr_pairs() {
        let pairs = parse_attr_pairs(&strings(&["image,ipfs/go-ipfs", "mdns", "args,a,b"]));
        assert_eq!(
            pairs,
            vec![
                ("image".to_string(), "ipfs/go-ipfs".to_string()),
                ("mdns".to_string(), "true".to_string()),
                ("args".to_string(), "a,b".to_string()),
            ]
        );
    }
}

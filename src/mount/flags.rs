//! Mount flag parsing and merging.

use crate::error::MountError;

/// Parses a whitespace-separated flag string. Every flag must begin with `-`.
pub(crate) fn parse_mount_flags(raw: &str) -> Result<Vec<String>, MountError> {
    let mut flags = Vec::new();
    for token in raw.split_whitespace() {
        if !token.starts_with('-') {
            return Err(MountError::InvalidMountParameter(format!(
                "mount flag must begin with '-': {token}"
            )));
        }
        flags.push(token.to_owned());
    }
    Ok(flags)
}

/// Key a flag is deduplicated by: the token up to its `=`, if any.
fn flag_key(flag: &str) -> &str {
    flag.split('=').next().unwrap_or(flag)
}

/// Combines explicitly set flags with builder-derived ones.
///
/// Explicit flags win: a derived flag is dropped when any earlier flag shares
/// its key, so `set_mount_flags("-ovolname=x")` overrides the builder's own
/// volume name.
pub(crate) fn merge_mount_flags(explicit: &[String], derived: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(explicit.len() + derived.len());
    for flag in explicit.iter().chain(derived) {
        if merged.iter().any(|m| flag_key(m) == flag_key(flag)) {
            continue;
        }
        merged.push(flag.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whitespace_separated_flags() {
        let flags = parse_mount_flags("-ovolname=vault  -orwsize=262144 -r").unwrap();
        assert_eq!(flags, vec!["-ovolname=vault", "-orwsize=262144", "-r"]);
    }

    #[test]
    fn rejects_tokens_without_dash() {
        assert!(matches!(
            parse_mount_flags("-ovolname=vault rwsize=1"),
            Err(MountError::InvalidMountParameter(_))
        ));
    }

    #[test]
    fn empty_string_parses_to_no_flags() {
        assert!(parse_mount_flags("").unwrap().is_empty());
    }

    #[test]
    fn explicit_flags_override_derived() {
        let explicit = vec!["-ovolname=custom".to_owned()];
        let derived = vec!["-ovolname=default".to_owned(), "-r".to_owned()];
        let merged = merge_mount_flags(&explicit, &derived);
        assert_eq!(merged, vec!["-ovolname=custom", "-r"]);
    }

    #[test]
    fn keyless_flags_deduplicate_exactly() {
        let explicit = vec!["-r".to_owned()];
        let derived = vec!["-r".to_owned(), "-l2049".to_owned()];
        let merged = merge_mount_flags(&explicit, &derived);
        assert_eq!(merged, vec!["-r", "-l2049"]);
    }
}

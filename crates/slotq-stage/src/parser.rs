//! Payload scanning.
//!
//! Arguments after a bare `--` belong to the wrapped tool and are never
//! inspected for markers.

/// Separator after which arguments pass through untouched.
pub const PASSTHROUGH_SEPARATOR: &str = "--";

/// A payload with the chain marker removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedPayload {
    /// Payload without marker occurrences.
    pub args: Vec<String>,

    /// Whether the marker appeared before the passthrough separator.
    pub chained: bool,
}

/// Strip every whole-argument occurrence of `marker` that precedes the
/// passthrough separator.
pub fn scan_payload(payload: &[String], marker: &str) -> ScannedPayload {
    let mut scanned = ScannedPayload::default();
    let mut passthrough = false;

    for arg in payload {
        if !passthrough && arg == marker {
            scanned.chained = true;
            continue;
        }
        if arg == PASSTHROUGH_SEPARATOR {
            passthrough = true;
        }
        scanned.args.push(arg.clone());
    }

    scanned
}

/// Append stage arguments ahead of the passthrough section, if any.
pub fn with_stage_args(args: &[String], extra: &[String]) -> Vec<String> {
    if extra.is_empty() {
        return args.to_vec();
    }
    let split = args
        .iter()
        .position(|a| a == PASSTHROUGH_SEPARATOR)
        .unwrap_or(args.len());

    let mut out = Vec::with_capacity(args.len() + extra.len());
    out.extend_from_slice(&args[..split]);
    out.extend_from_slice(extra);
    out.extend_from_slice(&args[split..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_marker_stripped() {
        let scanned = scan_payload(&argv("mkv_720p in.avs --two-pass --crf 20"), "--two-pass");
        assert!(scanned.chained);
        assert_eq!(scanned.args, argv("mkv_720p in.avs --crf 20"));
    }

    #[test]
    fn test_no_marker() {
        let scanned = scan_payload(&argv("mkv_720p in.avs"), "--two-pass");
        assert!(!scanned.chained);
        assert_eq!(scanned.args, argv("mkv_720p in.avs"));
    }

    #[test]
    fn test_marker_as_substring_ignored() {
        let scanned = scan_payload(&argv("--two-pass-stats out.log"), "--two-pass");
        assert!(!scanned.chained);
    }

    #[test]
    fn test_marker_after_separator_passes_through() {
        let scanned = scan_payload(&argv("mkv_720p in.avs -- --two-pass"), "--two-pass");
        assert!(!scanned.chained);
        assert_eq!(scanned.args, argv("mkv_720p in.avs -- --two-pass"));
    }

    #[test]
    fn test_stage_args_inserted_before_separator() {
        let out = with_stage_args(&argv("t in.avs -- --tune film"), &argv("--1pass-only"));
        assert_eq!(out, argv("t in.avs --1pass-only -- --tune film"));
    }

    #[test]
    fn test_stage_args_appended_without_separator() {
        let out = with_stage_args(&argv("t in.avs"), &argv("--pass 2"));
        assert_eq!(out, argv("t in.avs --pass 2"));
    }
}

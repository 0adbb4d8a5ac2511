//! Kubernetes resource quantity parsing and formatting
//!
//! CPU is handled in cores and memory in MB (2^20 bytes), matching the
//! units used throughout the scaler.

const MIB: f64 = 1024.0 * 1024.0;

/// Binary suffixes, checked before the decimal ones they end with
const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

/// Decimal SI suffixes; `K` is accepted as a common misspelling of `k`
const DECIMAL_SUFFIXES: [(&str, f64); 10] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse any quantity into base units (cores or bytes)
fn parse_quantity(s: &str) -> Option<f64> {
    let s = s.trim();
    let (number, scale) = BINARY_SUFFIXES
        .iter()
        .chain(DECIMAL_SUFFIXES.iter())
        .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|v| (v, *scale)))
        .unwrap_or((s, 1.0));
    let value = number.parse::<f64>().ok()? * scale;
    value.is_finite().then_some(value)
}

/// Parse a CPU quantity (`250m`, `1.5`, `500000000n`, `20u`, `2k`) into cores
pub fn parse_cpu(s: &str) -> Option<f64> {
    parse_quantity(s)
}

/// Parse a memory quantity (`512Mi`, `1Gi`, `128974848`, `129M`, `1Pi`) into MB
pub fn parse_memory(s: &str) -> Option<f64> {
    parse_quantity(s).map(|bytes| bytes / MIB)
}

/// Render cores as a millicore quantity, never below `1m`
pub fn format_cpu(cores: f64) -> String {
    let millis = (cores * 1000.0).round().max(1.0);
    format!("{}m", millis as u64)
}

/// Render MB as a whole `Mi` quantity, never below `1Mi`
pub fn format_memory(mb: f64) -> String {
    let mb = mb.round().max(1.0);
    format!("{}Mi", mb as u64)
}

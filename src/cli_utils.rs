/// CLI output helpers
use std::io::IsTerminal;

/// `[stagecache]` prefix, bright cyan when stderr is a TTY.
pub fn stagecache_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[stagecache]\x1b[0m"
    } else {
        "[stagecache]"
    }
}

/// `1.5 KiB`-style sizes for listings.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}

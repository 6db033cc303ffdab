//! Quoting for commands sent through the remote shell.

/// Quote a single argument for a POSIX shell.
///
/// Plain words made of safe characters pass through untouched so logged
/// commands stay readable.
pub fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '=' | ','));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_path() {
        assert_eq!(quote("/var/lib/columnstore/data1"), "/var/lib/columnstore/data1");
    }

    #[test]
    fn test_quote_with_spaces_and_quotes() {
        assert_eq!(quote("my dir"), "'my dir'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }
}

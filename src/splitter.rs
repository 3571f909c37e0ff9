const QUOTE: char = '"';

/// Split one physical line into fields.
///
/// Quoted fields may contain the delimiter, and `""` inside quotes stands for
/// a literal quote. Malformed quoting never fails: an unterminated quote just
/// runs to the end of the line.
pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    if !line.contains(QUOTE) {
        return line.split(delimiter).map(String::from).collect();
    }

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(chr) = chars.next() {
        if chr == QUOTE {
            if in_quotes && chars.peek() == Some(&QUOTE) {
                current.push(QUOTE);
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if chr == delimiter && !in_quotes {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(chr);
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &str, delimiter: char) -> Vec<String> {
        split_line(line, delimiter)
    }

    #[test]
    fn plain_split() {
        assert_eq!(split("a\tb\tc", '\t'), vec!["a", "b", "c"]);
        assert_eq!(split("a,,c,", ','), vec!["a", "", "c", ""]);
        assert_eq!(split("", ','), vec![""]);
    }

    #[test]
    fn quoted_delimiter_is_kept() {
        assert_eq!(split("a,\"b,c\",d", ','), vec!["a", "b,c", "d"]);
    }

    #[test]
    fn doubled_quote_is_literal() {
        assert_eq!(split("a,\"b\"\"c\",d", ','), vec!["a", "b\"c", "d"]);
    }

    #[test]
    fn unterminated_quote_runs_to_end_of_line() {
        assert_eq!(split("a,\"b,c", ','), vec!["a", "b,c"]);
    }

    #[test]
    fn quotes_inside_unquoted_field_toggle() {
        assert_eq!(split("ab\"c|d\"e|f", '|'), vec!["abc|de", "f"]);
    }

    #[test]
    fn multibyte_content_survives() {
        assert_eq!(split("ä;\"ö;ü\";ß", ';'), vec!["ä", "ö;ü", "ß"]);
    }

    #[test]
    fn empty_quoted_field() {
        assert_eq!(split("\"\",x", ','), vec!["", "x"]);
    }
}

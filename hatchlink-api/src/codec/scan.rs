/// Returns the first balanced `{...}` span of `text`.
///
/// Braces inside JSON string literals do not count towards the balance, so a
/// payload such as `{"msg":"}"}` is returned whole. An opening brace that is
/// never closed does not hide a balanced span starting after it.
pub(crate) fn first_object(text: &str) -> Option<&str> {
    let mut from = 0;

    while let Some(found) = text[from..].find('{') {
        let start = from + found;
        if let Some(end) = balanced_end(&text.as_bytes()[start..]) {
            return Some(&text[start..=start + end]);
        }
        from = start + 1;
    }

    None
}

/// Offset of the brace closing the one at `bytes[0]`.
fn balanced_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes.iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }

    None
}

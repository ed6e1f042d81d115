use std::borrow::Cow;

/// Returns true for bytes that must never appear in a single-line label.
///
/// Covers the C0 range, DEL and ESC. Tab, newline and carriage return are
/// included: tags and titles are rendered on one line.
fn is_label_control(b: u8) -> bool {
    b < 0x20 || b == 0x7f
}

/// Like [`is_label_control`], but lets line breaks and tabs through for
/// multi-line text such as podcast descriptions.
fn is_text_control(b: u8) -> bool {
    is_label_control(b) && b != b'\n' && b != b'\t'
}

/// Strip control characters and ANSI escape sequences from a label.
///
/// Removes:
/// - C0 control bytes (0x00-0x1F) including tab and newline
/// - DEL (0x7F)
/// - ANSI CSI sequences: `\x1b[` ... final byte (0x40-0x7E)
///
/// Returns `Cow::Borrowed` when the input is already clean.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    strip_matching(s, is_label_control)
}

fn strip_matching(s: &str, is_control: fn(u8) -> bool) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| is_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == 0x1b && i + 1 < bytes.len() && bytes[i + 1] == b'[' {
            i += 2;
            while i < bytes.len() {
                let c = bytes[i];
                i += 1;
                if (0x40..=0x7e).contains(&c) {
                    break;
                }
            }
        } else if is_control(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < bytes.len() && !is_control(bytes[i]) {
                i += 1;
            }
            // Control bytes are ASCII and never occur mid-codepoint, so
            // s[start..i] lies on char boundaries.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

/// Sanitize a user-supplied label (tag, title).
///
/// Strips control characters and surrounding whitespace. Returns `None`
/// when nothing printable remains.
pub fn clean_label(s: &str) -> Option<String> {
    let stripped = strip_control_chars(s);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Sanitize multi-line text (podcast descriptions).
///
/// Same as [`clean_label`] except that newlines and tabs survive; CRLF is
/// folded to LF.
pub fn clean_text(s: &str) -> Option<String> {
    let unified: Cow<'_, str> = if s.contains('\r') {
        Cow::Owned(s.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(s)
    };
    let stripped = strip_matching(&unified, is_text_control);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Case-folded comparison key for tags.
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

/// Estimates how large a file becomes once it is rendered with highlighting.
///
/// Only used to enforce the paste size limit; highlighted output is never
/// stored.
pub trait SizeEstimator: Send + Sync {
    fn formatted_size(&self, lexer: &str, raw: &str) -> usize;
}

/// Markup added around every rendered line (`<span class="line">` plus line
/// number anchor and closing tags).
const LINE_OVERHEAD: usize = 48;

/// Size of the HTML-escaped text plus per-line markup. Plain text is rendered
/// without the line wrapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupEstimate;

impl SizeEstimator for MarkupEstimate {
    fn formatted_size(&self, lexer: &str, raw: &str) -> usize {
        let escaped: usize = raw.chars().map(escaped_len).sum();
        if lexer == "text" {
            return escaped;
        }
        escaped + raw.lines().count().max(1) * LINE_OVERHEAD
    }
}

fn escaped_len(c: char) -> usize {
    match c {
        '&' => "&amp;".len(),
        '<' => "&lt;".len(),
        '>' => "&gt;".len(),
        '"' => "&quot;".len(),
        '\'' => "&#x27;".len(),
        _ => c.len_utf8(),
    }
}

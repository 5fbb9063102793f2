//! HTML body to plain text for recipients who asked for `text/plain`.
//!
//! Block-level tags become line breaks and other tags are stripped. Comments
//! are dropped whole.
//! Common entities are decoded. Output lines end in CRLF.

/// Render `html` as CRLF-terminated plain text.
pub fn html_to_plain_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        push_decoded(&mut text, &rest[..start]);
        if let Some(comment) = rest[start..].strip_prefix("<!--") {
            // Comments may contain `>`; an unclosed one runs to the end.
            rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
            continue;
        }
        let Some(end) = rest[start..].find('>') else {
            // Unterminated tag: keep the remainder as text.
            push_decoded(&mut text, &rest[start..]);
            rest = "";
            break;
        };
        let tag = &rest[start + 1..start + end];
        if let Some(skip_to) = skipped_element_end(tag, &rest[start + end + 1..]) {
            rest = &rest[start + end + 1 + skip_to..];
            continue;
        }
        if breaks_line(tag) {
            text.push('\n');
        }
        rest = &rest[start + end + 1..];
    }
    push_decoded(&mut text, rest);

    normalize_newlines(text.trim_matches('\n'))
}

/// `<head>`, `<style>` and `<script>` contribute no text at all.
fn skipped_element_end(tag: &str, after: &str) -> Option<usize> {
    let name = tag_name(tag);
    if !matches!(name.as_str(), "head" | "style" | "script") {
        return None;
    }
    let close = format!("</{name}");
    let lower = after.to_ascii_lowercase();
    let at = lower.find(&close)?;
    let end = after[at..].find('>').map_or(after.len(), |i| at + i + 1);
    Some(end)
}

fn breaks_line(tag: &str) -> bool {
    let closing = tag.starts_with('/');
    match tag_name(tag).as_str() {
        "br" => true,
        "p" | "div" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "ul"
        | "ol" | "table" => closing,
        "li" => !closing,
        _ => false,
    }
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn push_decoded(out: &mut String, fragment: &str) {
    let mut rest = fragment;
    while let Some(amp) = rest.find('&') {
        out.push_str(&collapse_whitespace(&rest[..amp]));
        let after = &rest[amp..];
        match after.find(';').filter(|&i| i <= 8) {
            Some(semi) => {
                match decode_entity(&after[1..semi]) {
                    Some(c) => out.push(c),
                    None => out.push_str(&after[..=semi]),
                }
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(&collapse_whitespace(rest));
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Source newlines and runs of spaces inside HTML text are insignificant.
fn collapse_whitespace(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut last_space = false;
    for c in fragment.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}

fn normalize_newlines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_and_breaks_become_crlf() {
        let html = "<p>Hello</p><p>second<br>line</p>";
        assert_eq!(html_to_plain_text(html), "Hello\r\nsecond\r\nline");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            html_to_plain_text("<div>fish &amp; chips &lt;3 &#233;&#x21;</div>"),
            "fish & chips <3 é!"
        );
    }

    #[test]
    fn style_and_script_are_dropped() {
        let html = "<html><head><title>t</title></head><style>p{color:red}</style>\
                    <body><p>visible</p><script>alert(1)</script></body></html>";
        assert_eq!(html_to_plain_text(html), "visible");
    }

    #[test]
    fn comments_are_dropped_even_with_angle_brackets() {
        assert_eq!(
            html_to_plain_text("<p>a</p><!-- x > y --><style>p{}</style>b &lt;c&gt;"),
            "a\r\nb <c>"
        );
        let outlook = "<!--[if mso]><table><tr><td>x</td></tr></table><![endif]--><p>body</p>";
        assert_eq!(html_to_plain_text(outlook), "body");
    }

    #[test]
    fn unclosed_comment_hides_the_rest() {
        assert_eq!(html_to_plain_text("<p>keep</p><!-- never <b>closed</b>"), "keep");
    }

    #[test]
    fn list_items_start_lines() {
        assert_eq!(
            html_to_plain_text("<ul><li>one</li><li>two</li></ul>"),
            "one\r\ntwo"
        );
    }

    #[test]
    fn plain_input_passes_through() {
        assert_eq!(html_to_plain_text("just text"), "just text");
        assert_eq!(html_to_plain_text("a & b"), "a & b");
    }
}

/// Chat-template markers some open models leak into their output.
const TEMPLATE_MARKERS: &[&str] = &["[b_inst]", "[/b_inst]", "[inst]", "[/inst]", "[sys]", "[/sys]"];

/// Normalizes raw model output into plain summary text: drops template
/// markers and `<|...|>` tokens, markdown fences and conversational
/// preambles, then collapses runs of blank lines.
pub fn clean_summary(raw: &str) -> String {
    let mut text = raw.to_string();
    for marker in TEMPLATE_MARKERS {
        text = remove_ignore_case(&text, marker);
    }
    text = remove_special_tokens(&text);

    let mut out = strip_fences(text.trim()).trim().to_string();
    out = strip_preamble(&out).to_string();
    collapse_blank_lines(out.trim())
}

fn remove_ignore_case(text: &str, needle: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(found) = lower[pos..].find(needle) {
        out.push_str(&text[pos..pos + found]);
        pos += found + needle.len();
    }
    out.push_str(&text[pos..]);
    out
}

fn remove_special_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<|") {
        match rest[start + 2..].find("|>") {
            Some(len) => {
                out.push_str(&rest[..start]);
                rest = &rest[start + 2 + len + 2..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

fn strip_fences(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let mut inner = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    if let Some(end) = inner.rfind("```") {
        inner = &inner[..end];
    }
    inner
}

fn strip_preamble(text: &str) -> &str {
    let lower = text.to_ascii_lowercase();

    if lower.starts_with("here is ") || lower.starts_with("here's ") {
        if let Some(colon) = lower.find(':') {
            if lower[..colon].contains("summary") {
                return text[colon + 1..].trim_start();
            }
        }
    }
    for label in ["summary:", "analysis:"] {
        if lower.starts_with(label) {
            return text[label.len()..].trim_start();
        }
    }
    if lower.starts_with("based on ") {
        if let Some(comma) = lower.find(", ") {
            return &text[comma + 2..];
        }
    }
    text
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(ch);
    }
    out
}

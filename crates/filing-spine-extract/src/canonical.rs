//! Offset-preserving HTML canonicalization.
//!
//! Filings arrive as HTML; sections, mentions and evidence all carry byte
//! offsets into one canonical text buffer per document. The canonicalizer
//! strips markup while recording, for every emitted byte, the raw-byte
//! offset it came from, so any canonical span can be mapped back to the
//! original document on demand.

/// Canonical text plus the shadow table back to raw bytes
#[derive(Debug, Clone)]
pub struct CanonicalDocument {
    text: String,
    /// canon_to_raw[i] = offset into the raw input of the byte that
    /// produced text[i]
    canon_to_raw: Vec<usize>,
}

impl CanonicalDocument {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Raw-byte offset for a canonical offset. The document end maps to the
    /// raw length so half-open spans stay well-formed.
    pub fn raw_offset(&self, canon: usize) -> Option<usize> {
        if canon == self.canon_to_raw.len() {
            return self.canon_to_raw.last().map(|last| last + 1);
        }
        self.canon_to_raw.get(canon).copied()
    }

    /// Canonical slice by byte offsets
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        self.text.get(start..end)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Text,
    Tag,
    Comment,
    /// Inside <script> or <style>; content is dropped entirely
    RawContent,
}

/// Tags that terminate a text run; each emits one newline into the
/// canonical buffer so section heading regexes can anchor on line starts.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "tr", "table", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "td", "th",
];

fn is_block_tag(name: &str) -> bool {
    let name = name.trim_start_matches('/');
    BLOCK_TAGS.contains(&name)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "rsquo" | "lsquo" | "#8217" | "#8216" => Some('\''),
        "rdquo" | "ldquo" | "#8220" | "#8221" => Some('"'),
        "#160" => Some(' '),
        _ => {
            let num = entity.strip_prefix("#x").map(|h| u32::from_str_radix(h, 16))
                .or_else(|| entity.strip_prefix('#').map(|d| d.parse::<u32>()))?;
            char::from_u32(num.ok()?)
        }
    }
}

/// Strip HTML to canonical text. Whitespace runs collapse to one space,
/// block boundaries to one newline; script/style/comment content is
/// dropped. Every emitted byte maps back to the raw byte that produced it.
pub fn canonicalize(raw: &str) -> CanonicalDocument {
    let bytes = raw.as_bytes();
    let mut text = String::with_capacity(raw.len() / 2);
    let mut map = Vec::with_capacity(raw.len() / 2);

    let mut state = State::Text;
    let mut raw_tag_name = String::new();
    let mut pending_ws: Option<(usize, u8)> = None;
    let mut i = 0;

    // Emit one char with its originating raw offset
    let emit = |text: &mut String, map: &mut Vec<usize>, ch: char, at: usize| {
        let mut buf = [0u8; 4];
        let encoded = ch.encode_utf8(&mut buf);
        for _ in 0..encoded.len() {
            map.push(at);
        }
        text.push_str(encoded);
    };

    while i < bytes.len() {
        match state {
            State::Text => {
                if bytes[i] == b'<' {
                    if raw[i..].starts_with("<!--") {
                        state = State::Comment;
                        i += 4;
                        continue;
                    }
                    // Read the tag name to decide block behavior
                    let rest = &raw[i + 1..];
                    let name: String = rest
                        .chars()
                        .take_while(|c| c.is_ascii_alphanumeric() || *c == '/')
                        .collect::<String>()
                        .to_lowercase();
                    if name == "script" || name == "style" {
                        state = State::RawContent;
                        raw_tag_name = name.clone();
                    } else {
                        state = State::Tag;
                    }
                    if is_block_tag(&name) {
                        pending_ws = Some((i, b'\n'));
                    }
                    i += 1;
                } else if bytes[i] == b'&' {
                    // Entity: decode up to the ';' within a short window
                    if let Some(end) = raw[i + 1..].find(';').filter(|e| *e <= 10) {
                        let entity = &raw[i + 1..i + 1 + end];
                        if let Some(ch) = decode_entity(entity) {
                            if ch.is_whitespace() {
                                pending_ws.get_or_insert((i, b' '));
                            } else {
                                flush_ws(&mut text, &mut map, &mut pending_ws);
                                emit(&mut text, &mut map, ch, i);
                            }
                            i += end + 2;
                            continue;
                        }
                    }
                    flush_ws(&mut text, &mut map, &mut pending_ws);
                    emit(&mut text, &mut map, '&', i);
                    i += 1;
                } else if bytes[i].is_ascii_whitespace() {
                    pending_ws.get_or_insert((i, b' '));
                    i += 1;
                } else {
                    flush_ws(&mut text, &mut map, &mut pending_ws);
                    // Copy one UTF-8 scalar through with its offset
                    let ch_len = utf8_len(bytes[i]);
                    for k in 0..ch_len {
                        if i + k < bytes.len() {
                            map.push(i + k);
                        }
                    }
                    text.push_str(&raw[i..(i + ch_len).min(bytes.len())]);
                    i += ch_len;
                }
            }
            State::Tag => {
                if bytes[i] == b'>' {
                    state = State::Text;
                }
                i += 1;
            }
            State::Comment => {
                // Byte-wise scan: i may sit inside a multi-byte character
                if bytes[i..].starts_with(b"-->") {
                    state = State::Text;
                    i += 3;
                } else {
                    i += 1;
                }
            }
            State::RawContent => {
                let closing = format!("</{}", raw_tag_name);
                let end = (i + closing.len()).min(bytes.len());
                if bytes[i..end].eq_ignore_ascii_case(closing.as_bytes()) {
                    state = State::Tag;
                    i += closing.len();
                } else {
                    i += 1;
                }
            }
        }
    }

    // Trailing whitespace is dropped
    CanonicalDocument {
        text,
        canon_to_raw: map,
    }
}

fn flush_ws(text: &mut String, map: &mut Vec<usize>, pending: &mut Option<(usize, u8)>) {
    if let Some((at, kind)) = pending.take() {
        if text.is_empty() {
            return;
        }
        map.push(at);
        text.push(if kind == b'\n' { '\n' } else { ' ' });
    }
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >> 5 == 0b110 => 2,
        b if b >> 4 == 0b1110 => 3,
        _ => 4,
    }
}

/// Count words the way section rows report them
pub fn word_count(text: &str) -> i32 {
    text.split_whitespace().count() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags_and_collapse_whitespace() {
        let doc = canonicalize("<html><body><p>Hello   <b>world</b></p></body></html>");
        assert_eq!(doc.text(), "Hello world");
    }

    #[test]
    fn test_block_tags_become_newlines() {
        let doc = canonicalize("<p>Item 1. Business</p><p>We design products.</p>");
        assert_eq!(doc.text(), "Item 1. Business\nWe design products.");
    }

    #[test]
    fn test_entities_are_decoded() {
        let doc = canonicalize("Johnson &amp; Johnson&nbsp;reported&#46;");
        assert_eq!(doc.text(), "Johnson & Johnson reported.");
    }

    #[test]
    fn test_script_style_and_comments_are_dropped() {
        let doc = canonicalize(
            "<style>.x{color:red}</style>before<script>var a = '<p>';</script> after<!-- note -->!",
        );
        assert_eq!(doc.text(), "before after!");
    }

    #[test]
    fn test_shadow_table_maps_back_to_raw_bytes() {
        // REQUIREMENT: Offsets are into the canonicalized text with a shadow
        // table back to raw bytes on demand
        // PURPOSE: A canonical span must locate its source in the raw HTML

        let raw = "<p>We rely on <b>TSMC</b> for wafers.</p>";
        let doc = canonicalize(raw);
        assert_eq!(doc.text(), "We rely on TSMC for wafers.");

        let canon_start = doc.text().find("TSMC").unwrap();
        let raw_start = doc.raw_offset(canon_start).unwrap();
        assert_eq!(&raw[raw_start..raw_start + 4], "TSMC");

        // The end-of-document offset is mapped too
        assert!(doc.raw_offset(doc.len()).is_some());
        assert!(doc.raw_offset(doc.len() + 1).is_none());
    }

    #[test]
    fn test_span_end_at_final_byte_is_accepted() {
        // A section spanning the final byte has char_end == len(document)
        let doc = canonicalize("<p>Tail text</p>");
        let end = doc.len();
        assert_eq!(doc.slice(0, end).unwrap(), "Tail text");
    }

    #[test]
    fn test_decoded_entity_keeps_raw_offset() {
        let raw = "A&amp;B";
        let doc = canonicalize(raw);
        assert_eq!(doc.text(), "A&B");
        // The decoded '&' maps to the start of the entity in the raw bytes
        assert_eq!(doc.raw_offset(1), Some(1));
        assert_eq!(&raw[1..6], "&amp;");
    }

    #[test]
    fn test_non_ascii_survives_and_dropped_regions_may_contain_it() {
        // EDGAR documents carry UTF-8 names and punctuation, including
        // inside comments and scripts that are dropped wholesale
        let doc = canonicalize(
            "<p>Société Générale</p><!-- café – note -->after<script>var s = \"日本語\";</script>!",
        );
        assert_eq!(doc.text(), "Société Générale\nafter!");
    }

    #[test]
    fn test_canonicalize_is_deterministic() {
        let raw = "<div>Item 1A. Risk Factors</div><p>We rely on TSMC.</p>";
        let a = canonicalize(raw);
        let b = canonicalize(raw);
        assert_eq!(a.text(), b.text());
        assert_eq!(a.raw_offset(5), b.raw_offset(5));
    }
}

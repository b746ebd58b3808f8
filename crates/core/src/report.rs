use crate::message::{Message, Role};

/// Renders the transcript and the final grade into a Latin-1 text document.
/// Characters outside Latin-1 are transliterated where a sensible mapping
/// exists and replaced with `?` otherwise, never rejected, so a stray emoji
/// in an LLM reply cannot sink the report.
pub fn render_report(transcript: &[Message], grade_text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    push_line(&mut out, "Prüfungsprotokoll Schweißtechnik");
    push_line(&mut out, "================================");
    push_line(&mut out, "");

    for msg in transcript {
        // The persona prompt is internal and does not belong in the document.
        let speaker = match msg.role {
            Role::System => continue,
            Role::User => "Schüler",
            Role::Assistant => "Prüfer",
        };
        push_line(&mut out, &format!("{speaker}: {}", msg.content));
        push_line(&mut out, "");
    }

    push_line(&mut out, "Bewertung");
    push_line(&mut out, "---------");
    push_line(&mut out, grade_text);
    out
}

fn push_line(out: &mut Vec<u8>, line: &str) {
    encode_latin1(line, out);
    out.push(b'\n');
}

fn encode_latin1(text: &str, out: &mut Vec<u8>) {
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push(b'\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' => out.push(b'"'),
            '\u{2013}' | '\u{2014}' => out.push(b'-'),
            '\u{2026}' => out.extend_from_slice(b"..."),
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
}

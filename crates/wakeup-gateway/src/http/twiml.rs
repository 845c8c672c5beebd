//! Minimal TwiML rendering for voice sessions.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use wakeup_scheduler::VoiceScript;

/// Wrap a TwiML document in an XML response.
pub fn respond(status: StatusCode, doc: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/xml")], doc).into_response()
}

/// Greeting lines, then a one-digit/speech gather that posts to `action`,
/// then the closing line for callers who stay silent.
pub fn voice_script(script: &VoiceScript, action: &str) -> String {
    let mut doc = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
    for line in &script.lines {
        push_say(&mut doc, line);
    }
    doc.push_str(&format!(
        r#"<Gather input="dtmf speech" numDigits="1" timeout="10" action="{}" method="POST">"#,
        escape(action)
    ));
    push_say(&mut doc, &script.prompt);
    doc.push_str("</Gather>");
    push_say(&mut doc, &script.closing);
    doc.push_str("</Response>");
    doc
}

/// Say `text` and hang up.
pub fn say_and_hangup(text: &str) -> String {
    let mut doc = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
    push_say(&mut doc, text);
    doc.push_str("<Hangup/></Response>");
    doc
}

fn push_say(doc: &mut String, text: &str) {
    doc.push_str("<Say>");
    doc.push_str(&escape(text));
    doc.push_str("</Say>");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

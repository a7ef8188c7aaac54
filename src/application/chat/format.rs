//! Message formatting: Markdown rendering, tag stripping, disclosure blocks

use once_cell::sync::Lazy;
use pulldown_cmark::{html, Options, Parser};
use regex_lite::Regex;
use serde_json::{json, Value};

pub const HTML_FORMAT: &str = "org.matrix.custom.html";

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

/// Render Markdown to HTML
pub fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() + text.len() / 2);
    html::push_html(&mut out, parser);
    out
}

/// Remove HTML tags and decode the common character references
pub fn strip_tags(text: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(text, "");
    stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// HTML disclosure: `header` always visible, `body` after expanding
pub fn expandable_message_body(header: &str, body: &str) -> String {
    format!(
        "<details><summary>{}</summary><br>{}</details>",
        markdown_to_html(header),
        markdown_to_html(body)
    )
}

/// `body` and `formatted_body` for a message
pub fn render(message: &str, markdown_convert: bool) -> (String, String) {
    let formatted = if markdown_convert {
        markdown_to_html(message)
    } else {
        message.to_string()
    };
    (strip_tags(message), formatted)
}

/// Content of an `m.room.message` with HTML formatting
pub fn message_content(message: &str, msgtype: &str, markdown_convert: bool) -> Value {
    let (body, formatted_body) = render(message, markdown_convert);
    json!({
        "msgtype": msgtype,
        "format": HTML_FORMAT,
        "body": body,
        "formatted_body": formatted_body,
    })
}

/// Content of an `m.replace` edit of `event_id`
pub fn replace_content(event_id: &str, message: &str, msgtype: &str) -> Value {
    let (body, formatted_body) = render(message, true);
    json!({
        "msgtype": msgtype,
        "format": HTML_FORMAT,
        "body": body,
        "formatted_body": formatted_body,
        "m.new_content": {
            "msgtype": msgtype,
            "format": HTML_FORMAT,
            "body": body,
            "formatted_body": formatted_body,
        },
        "m.relates_to": {
            "rel_type": "m.replace",
            "event_id": event_id,
        },
    })
}

/// Content of an `m.reaction` annotation
pub fn reaction_content(event_id: &str, key: &str) -> Value {
    json!({
        "m.relates_to": {
            "event_id": event_id,
            "rel_type": "m.annotation",
            "key": key,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_for_plain_body() {
        assert_eq!(strip_tags("<b>bold</b> &amp; <i>it</i>"), "bold & it");
        assert_eq!(strip_tags("plain"), "plain");
    }

    #[test]
    fn renders_markdown() {
        assert_eq!(markdown_to_html("**hi**"), "<p><strong>hi</strong></p>\n");
    }

    #[test]
    fn body_keeps_source_text_while_formatted_is_html() {
        let content = message_content("hello world", "m.text", true);
        assert_eq!(content["body"], "hello world");
        assert_eq!(content["formatted_body"], "<p>hello world</p>\n");
        assert_eq!(content["format"], HTML_FORMAT);
    }

    #[test]
    fn raw_html_is_not_converted_when_disabled() {
        let content = message_content("<b>x</b>", "m.notice", false);
        assert_eq!(content["body"], "x");
        assert_eq!(content["formatted_body"], "<b>x</b>");
        assert_eq!(content["msgtype"], "m.notice");
    }

    #[test]
    fn disclosure_wraps_both_parts() {
        let html = expandable_message_body("head", "details");
        assert!(html.starts_with("<details><summary><p>head</p>"));
        assert!(html.ends_with("<p>details</p>\n</details>"));
    }

    #[test]
    fn replace_points_at_original() {
        let content = replace_content("$orig", "y", "m.text");
        assert_eq!(content["m.relates_to"]["rel_type"], "m.replace");
        assert_eq!(content["m.relates_to"]["event_id"], "$orig");
        assert_eq!(content["m.new_content"]["body"], "y");
    }
}

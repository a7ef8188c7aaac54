//! Message parser - splits message bodies into command segments

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// A double-quoted run or a whitespace-free token
static ARG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"]*)"|(\S+)"#).expect("argument pattern is valid")
});

/// Tokenize the arguments of a command, i.e. everything after its first token.
///
/// Splits on whitespace; a double-quoted run stays a single argument with
/// the quotes removed.
pub fn parse_args(command: &str) -> Vec<String> {
    let trimmed = command.trim_start();
    let rest = match trimmed.find(char::is_whitespace) {
        Some(idx) => &trimmed[idx..],
        None => return Vec::new(),
    };

    ARG_PATTERN
        .captures_iter(rest)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Splits message bodies into logical segments and recognises commands
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Segments separated by blank lines
    pub fn segments<'a>(&self, body: &'a str) -> Vec<&'a str> {
        body.split("\n\n").collect()
    }

    /// Command text of a segment without the prefix and leading whitespace.
    ///
    /// `None` if the segment does not start with the prefix or holds nothing
    /// but the prefix.
    pub fn command_text(&self, segment: &str) -> Option<String> {
        let rest = segment.strip_prefix(&self.command_prefix)?;
        let rest = rest.trim_start();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Command texts of all segments carrying the prefix, in source order.
    ///
    /// The boolean reports whether any segment carried the prefix at all.
    pub fn commands(&self, body: &str) -> (bool, Vec<String>) {
        let prefixed: Vec<&str> = self
            .segments(body)
            .into_iter()
            .filter(|s| s.starts_with(&self.command_prefix))
            .collect();
        let has_commands = !prefixed.is_empty();
        let commands = prefixed
            .into_iter()
            .filter_map(|s| self.command_text(s))
            .collect();
        (has_commands, commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_skip_the_command_itself() {
        assert_eq!(parse_args("echo hello world"), vec!["hello", "world"]);
        assert!(parse_args("echo").is_empty());
        assert!(parse_args("").is_empty());
    }

    #[test]
    fn quoted_args_stay_together() {
        assert_eq!(
            parse_args(r#"quote add "Alice Smith"   said "hi there" !"#),
            vec!["add", "Alice Smith", "said", "hi there", "!"]
        );
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(parse_args("roll   2d6 \t +3"), vec!["2d6", "+3"]);
    }

    #[test]
    fn command_text_strips_prefix_and_leading_spaces() {
        let parser = MessageParser::new("!");
        assert_eq!(parser.command_text("!  echo hi"), Some("echo hi".to_string()));
        assert_eq!(parser.command_text("!   "), None);
        assert_eq!(parser.command_text("echo hi"), None);
    }

    #[test]
    fn partitions_segments_on_blank_lines() {
        let parser = MessageParser::new("!");
        let (has, cmds) = parser.commands("!echo a\n\njust talking\n\n!roll 1d6");
        assert!(has);
        assert_eq!(cmds, vec!["echo a", "roll 1d6"]);

        let (has, cmds) = parser.commands("hello\nworld");
        assert!(!has);
        assert!(cmds.is_empty());
    }

    #[test]
    fn multi_character_prefix() {
        let parser = MessageParser::new("bot:");
        assert_eq!(parser.command_text("bot: help"), Some("help".to_string()));
    }
}

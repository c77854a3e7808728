// ABOUTME: Closed table of supported languages with their pinned image and invocation
// ABOUTME: Each language maps to exactly one image and one command form

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::JavaScript];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
        }
    }

    /// Parse a language tag. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "python" => Some(Self::Python),
            "javascript" => Some(Self::JavaScript),
            _ => None,
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            Self::Python => "python:3.11-alpine",
            Self::JavaScript => "node:20-alpine",
        }
    }

    /// Full command line that evaluates `source_code` inside the image
    pub fn command(&self, source_code: &str) -> Vec<String> {
        let (interpreter, flag) = match self {
            Self::Python => ("python", "-c"),
            Self::JavaScript => ("node", "-e"),
        };
        vec![
            interpreter.to_string(),
            flag.to_string(),
            source_code.to_string(),
        ]
    }

    /// Starter code for a fresh session
    pub fn default_template(&self) -> &'static str {
        match self {
            Self::Python => r#"print("Hello World")"#,
            Self::JavaScript => r#"console.log("Hello World")"#,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("python", Some(Language::Python))]
    #[case("javascript", Some(Language::JavaScript))]
    #[case("Python", None)]
    #[case("ruby", None)]
    #[case("", None)]
    fn test_parse(#[case] tag: &str, #[case] expected: Option<Language>) {
        assert_eq!(Language::parse(tag), expected);
    }

    #[rstest]
    #[case(Language::Python, "python:3.11-alpine", "python", "-c")]
    #[case(Language::JavaScript, "node:20-alpine", "node", "-e")]
    fn test_image_and_command(
        #[case] language: Language,
        #[case] image: &str,
        #[case] interpreter: &str,
        #[case] flag: &str,
    ) {
        assert_eq!(language.image(), image);
        assert_eq!(
            language.command("code"),
            vec![interpreter.to_string(), flag.to_string(), "code".to_string()]
        );
    }

    #[test]
    fn test_round_trips_through_tag() {
        for language in Language::ALL {
            assert_eq!(Language::parse(language.as_str()), Some(language));
        }
    }
}

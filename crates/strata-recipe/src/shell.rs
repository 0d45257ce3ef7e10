//! Lightweight analysis of shell command text.
//!
//! Only the structure needed for classification is recovered: a script is
//! split into simple commands at `&&`, `||`, `;`, `|` and newlines, and each
//! simple command into leading assignments and argument words. Expansions,
//! subshells and redirections are left as opaque words.

use crate::parser::lexer::split_words;

/// One simple command from a shell script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleCommand {
    /// Leading `NAME=value` assignments.
    pub env: Vec<(String, String)>,
    /// Program and arguments.
    pub argv: Vec<String>,
}

/// Shell reserved words; a command word that opens a compound command
/// is skipped and the words after it form the command.
pub const RESERVED_WORDS: &[&str] = &[
    "!", "[[", "]]", "{", "}", "case", "do", "done", "elif", "else", "esac", "fi", "for",
    "function", "if", "in", "select", "then", "until", "while",
];

/// Wrappers that run the following words as the real command.
const WRAPPERS: &[&str] = &["sudo", "exec", "command", "nohup", "time"];

impl SimpleCommand {
    /// Builds a command from already-split words.
    #[must_use]
    pub fn from_words(words: Vec<String>) -> Self {
        // `for NAME in ...` and friends bind a name; nothing runs here.
        if words
            .first()
            .is_some_and(|w| matches!(w.as_str(), "for" | "select" | "case"))
        {
            return Self {
                env: Vec::new(),
                argv: Vec::new(),
            };
        }
        let mut env = Vec::new();
        let mut rest = words
            .into_iter()
            .skip_while(|w| RESERVED_WORDS.contains(&w.as_str()))
            .peekable();
        while let Some(word) = rest.peek() {
            match word.split_once('=') {
                Some((name, value)) if is_variable_name(name) => {
                    env.push((name.to_string(), value.to_string()));
                    let _ = rest.next();
                }
                _ => break,
            }
        }
        let mut argv: Vec<String> = rest.collect();
        while argv
            .first()
            .is_some_and(|w| WRAPPERS.contains(&w.as_str()) && argv.len() > 1)
        {
            let _ = argv.remove(0);
        }
        Self { env, argv }
    }

    /// Basename of the invoked program.
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        self.argv
            .first()
            .map(|p| p.rsplit('/').next().unwrap_or(p.as_str()))
            .filter(|p| !p.is_empty())
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Value assigned to `name` by the prefix assignments.
    #[must_use]
    pub fn sets(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits a script at command separators that are not inside quotes.
#[must_use]
pub fn split_script(script: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), _) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '\\') => {
                current.push(c);
                current.extend(chars.next());
            }
            (None, ';' | '\n') => parts.push(std::mem::take(&mut current)),
            (None, '&') if chars.peek() == Some(&'&') => {
                let _ = chars.next();
                parts.push(std::mem::take(&mut current));
            }
            (None, '|') => {
                if chars.peek() == Some(&'|') {
                    let _ = chars.next();
                }
                parts.push(std::mem::take(&mut current));
            }
            (None, _) => current.push(c),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Parses a script into simple commands.
///
/// Segments whose quoting cannot be understood fall back to whitespace
/// splitting so that classification never fails on exotic shell syntax.
#[must_use]
pub fn simple_commands(script: &str) -> Vec<SimpleCommand> {
    split_script(script)
        .into_iter()
        .map(|segment| {
            let words = split_words(&segment).unwrap_or_else(|_| {
                segment.split_whitespace().map(str::to_string).collect()
            });
            SimpleCommand::from_words(words)
        })
        .filter(|cmd| !cmd.argv.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_on_separators() {
        let parts = split_script("apt-get update && apt-get install -y ffmpeg; rm -rf /x || true");
        assert_eq!(
            parts,
            vec!["apt-get update", "apt-get install -y ffmpeg", "rm -rf /x", "true"]
        );
    }

    #[test]
    fn separators_inside_quotes_are_kept() {
        let parts = split_script(r#"echo "a && b" && sh -c 'x; y'"#);
        assert_eq!(parts, vec![r#"echo "a && b""#, "sh -c 'x; y'"]);
    }

    #[test]
    fn pipes_split_commands() {
        let cmds = simple_commands("curl -sSf https://x | sh");
        let programs: Vec<_> = cmds.iter().filter_map(SimpleCommand::program).collect();
        assert_eq!(programs, vec!["curl", "sh"]);
    }

    #[test]
    fn assignments_and_wrappers_are_stripped() {
        let cmds = simple_commands("DEBIAN_FRONTEND=noninteractive sudo /usr/bin/apt-get install -y ffmpeg");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].sets("DEBIAN_FRONTEND"), Some("noninteractive"));
        assert_eq!(cmds[0].program(), Some("apt-get"));
        assert_eq!(cmds[0].args(), ["install", "-y", "ffmpeg"]);
    }

    #[test]
    fn lone_wrapper_is_its_own_program() {
        let cmds = simple_commands("time");
        assert_eq!(cmds[0].program(), Some("time"));
    }

    #[test]
    fn reserved_words_open_the_real_command() {
        let cmds = simple_commands("if [ -f uv.lock ]; then uv sync --locked; fi");
        let programs: Vec<_> = cmds.iter().filter_map(SimpleCommand::program).collect();
        assert_eq!(programs, vec!["[", "uv"]);
        assert_eq!(cmds[1].args(), ["sync", "--locked"]);

        let cmds = simple_commands("for f in a b; do touch $f; done");
        let programs: Vec<_> = cmds.iter().filter_map(SimpleCommand::program).collect();
        assert_eq!(programs, vec!["touch"]);
    }

    #[test]
    fn unbalanced_quotes_fall_back_to_whitespace() {
        let cmds = simple_commands("echo \"oops");
        assert_eq!(cmds[0].argv, vec!["echo", "\"oops"]);
    }
}

//! Recipe parser built on `nom`.
//!
//! Transforms raw recipe text into an AST through lexing and parsing.
//! Semantic checks live in [`validator`] and run on the classified plan.

pub mod ast;
pub mod lexer;
pub mod validator;

use strata_common::error::{Result, StrataError};

use self::ast::{CommandForm, Instruction, Located, Recipe};
use self::lexer::{Body, RawInstruction};

const fn parse_err(line: usize, message: String) -> StrataError {
    StrataError::Parse { line, message }
}

/// Parses recipe source text into an AST.
///
/// # Errors
///
/// Returns `StrataError::Parse` naming the line of the first instruction
/// that is unknown or malformed.
pub fn parse_recipe(input: &str) -> Result<Recipe> {
    let raw = lexer::tokenize(input)?;
    let instructions = raw
        .iter()
        .map(|tok| {
            Ok(Located {
                line: tok.line,
                text: tok.text.clone(),
                instruction: parse_instruction(tok)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(count = instructions.len(), "parsed recipe");
    Ok(Recipe { instructions })
}

fn parse_instruction(tok: &RawInstruction) -> Result<Instruction> {
    let allowed: &[&str] = match tok.keyword.as_str() {
        "COPY" => &["from", "chown", "chmod", "link"],
        "ADD" => &["chown", "chmod", "link"],
        _ => &[],
    };
    if let Some((name, _)) = tok.flags.iter().find(|(n, _)| !allowed.contains(&n.as_str())) {
        return Err(parse_err(
            tok.line,
            format!("unsupported option --{name} for {}", tok.keyword),
        ));
    }

    match tok.keyword.as_str() {
        "FROM" => parse_from(tok),
        "COPY" => {
            let from = tok
                .flags
                .iter()
                .find(|(n, _)| n == "from")
                .map(|(_, v)| v.clone());
            if from.as_deref() == Some("") {
                return Err(parse_err(tok.line, "--from requires an image".into()));
            }
            let (sources, dest) = parse_transfer(tok)?;
            Ok(Instruction::Copy {
                from,
                sources,
                dest,
            })
        }
        "ADD" => {
            let (sources, dest) = parse_transfer(tok)?;
            if let Some(remote) = sources.iter().find(|s| s.contains("://")) {
                return Err(parse_err(
                    tok.line,
                    format!("ADD only accepts local sources, got \"{remote}\""),
                ));
            }
            Ok(Instruction::Add { sources, dest })
        }
        "WORKDIR" => {
            let words = words_of(tok)?;
            match words.as_slice() {
                [path] => Ok(Instruction::Workdir(path.clone())),
                _ => Err(parse_err(tok.line, "WORKDIR takes exactly one path".into())),
            }
        }
        "ENV" => parse_env(tok),
        "RUN" => Ok(Instruction::Run(command_form(tok))),
        "CMD" => Ok(Instruction::Cmd(command_form(tok))),
        "ENTRYPOINT" => Ok(Instruction::Entrypoint(command_form(tok))),
        other => Err(parse_err(
            tok.line,
            format!("unsupported instruction {other}"),
        )),
    }
}

fn words_of(tok: &RawInstruction) -> Result<Vec<String>> {
    match &tok.body {
        Body::Json(items) => Ok(items.clone()),
        Body::Text(text) => lexer::split_words(text).map_err(|m| parse_err(tok.line, m)),
    }
}

fn command_form(tok: &RawInstruction) -> CommandForm {
    match &tok.body {
        Body::Json(argv) => CommandForm::Exec(argv.clone()),
        Body::Text(text) => CommandForm::Shell(text.clone()),
    }
}

fn parse_from(tok: &RawInstruction) -> Result<Instruction> {
    let words = words_of(tok)?;
    match words.as_slice() {
        [image] => Ok(Instruction::From {
            image: image.clone(),
            alias: None,
        }),
        [image, kw, alias] if kw.eq_ignore_ascii_case("as") => Ok(Instruction::From {
            image: image.clone(),
            alias: Some(alias.clone()),
        }),
        _ => Err(parse_err(
            tok.line,
            "FROM expects an image reference and an optional AS name".into(),
        )),
    }
}

fn parse_transfer(tok: &RawInstruction) -> Result<(Vec<String>, String)> {
    let mut words = words_of(tok)?;
    if words.len() < 2 {
        return Err(parse_err(
            tok.line,
            format!("{} requires at least one source and a destination", tok.keyword),
        ));
    }
    let dest = words.pop().unwrap_or_default();
    Ok((words, dest))
}

fn parse_env(tok: &RawInstruction) -> Result<Instruction> {
    let words = words_of(tok)?;
    let line = tok.line;
    let Some(first) = words.first() else {
        return Err(parse_err(line, "ENV requires at least one variable".into()));
    };

    let pairs = if first.contains('=') {
        words
            .iter()
            .map(|w| {
                w.split_once('=')
                    .filter(|(k, _)| !k.is_empty())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| parse_err(line, format!("expected KEY=VALUE, got \"{w}\"")))
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        // Legacy form: `ENV KEY value with spaces`.
        let Body::Text(text) = &tok.body else {
            return Err(parse_err(line, "ENV does not accept a JSON array".into()));
        };
        let value = text
            .trim()
            .split_once(char::is_whitespace)
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default();
        vec![(first.clone(), value)]
    };
    Ok(Instruction::Env(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = r#"
FROM python:3.12-slim-bookworm
COPY --from=ghcr.io/astral-sh/uv:0.5.11 /uv /uvx /bin/
ADD . /app
WORKDIR /app
RUN apt-get update && apt-get install -y ffmpeg
RUN uv sync --locked
CMD ["uv", "run", "main.py"]
"#;

    #[test]
    fn parse_canonical_recipe() {
        let recipe = parse_recipe(CANONICAL).expect("should parse");
        assert_eq!(recipe.instructions.len(), 7);
        assert_eq!(recipe.instructions[0].line, 2);
        assert_eq!(
            recipe.instructions[0].instruction,
            Instruction::From {
                image: "python:3.12-slim-bookworm".into(),
                alias: None
            }
        );
        assert_eq!(
            recipe.instructions[1].instruction,
            Instruction::Copy {
                from: Some("ghcr.io/astral-sh/uv:0.5.11".into()),
                sources: vec!["/uv".into(), "/uvx".into()],
                dest: "/bin/".into(),
            }
        );
        assert_eq!(
            recipe.instructions[6].instruction,
            Instruction::Cmd(CommandForm::Exec(vec![
                "uv".into(),
                "run".into(),
                "main.py".into()
            ]))
        );
    }

    #[test]
    fn unknown_instruction_names_line() {
        let err = parse_recipe("FROM python:3.12\nEXPOSE 8080\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 2"), "got: {msg}");
        assert!(msg.contains("EXPOSE"), "got: {msg}");
    }

    #[test]
    fn from_with_alias() {
        let recipe = parse_recipe("FROM python:3.12 AS runtime").expect("parse");
        assert!(matches!(
            &recipe.instructions[0].instruction,
            Instruction::From { alias: Some(a), .. } if a == "runtime"
        ));
    }

    #[test]
    fn env_both_forms() {
        let recipe =
            parse_recipe("ENV UV_COMPILE_BYTECODE=1 GREETING=\"hi there\"\nENV PATH /app/.venv/bin:$PATH")
                .expect("parse");
        assert_eq!(
            recipe.instructions[0].instruction,
            Instruction::Env(vec![
                ("UV_COMPILE_BYTECODE".into(), "1".into()),
                ("GREETING".into(), "hi there".into()),
            ])
        );
        assert_eq!(
            recipe.instructions[1].instruction,
            Instruction::Env(vec![("PATH".into(), "/app/.venv/bin:$PATH".into())])
        );
    }

    #[test]
    fn copy_requires_destination() {
        let err = parse_recipe("COPY main.py").unwrap_err();
        assert!(err.to_string().contains("destination"), "got: {err}");
    }

    #[test]
    fn add_rejects_remote_sources() {
        let err = parse_recipe("ADD https://example.com/x.tar /opt/").unwrap_err();
        assert!(err.to_string().contains("local sources"), "got: {err}");
    }

    #[test]
    fn unsupported_flag_is_rejected() {
        let err = parse_recipe("RUN --mount=type=cache,target=/root/.cache uv sync").unwrap_err();
        assert!(err.to_string().contains("--mount"), "got: {err}");
    }

    #[test]
    fn shell_form_is_preserved() {
        let recipe = parse_recipe("ENTRYPOINT uv run main.py").expect("parse");
        assert_eq!(
            recipe.instructions[0].instruction,
            Instruction::Entrypoint(CommandForm::Shell("uv run main.py".into()))
        );
    }

    #[test]
    fn empty_input_has_no_instructions() {
        let recipe = parse_recipe("# nothing here\n\n").expect("parse");
        assert!(recipe.instructions.is_empty());
    }
}

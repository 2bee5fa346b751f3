//! Shell word splitting for command validation.
//!
//! This is not a shell. It only splits a command line the way a POSIX shell
//! would far enough to know which programs run, with which arguments, and
//! which files get redirected to. Anything it cannot follow is a parse error,
//! and callers treat parse errors as a denial.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(&'static str),
    #[error("unterminated command substitution")]
    UnterminatedSubstitution,
    #[error("unterminated parameter expansion")]
    UnterminatedExpansion,
    #[error("redirection without a target")]
    DanglingRedirect,
    #[error("here-document without terminator '{0}'")]
    UnterminatedHeredoc(String),
}

/// One shell word after quote removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    /// Any part of the word was quoted.
    pub quoted: bool,
    /// The word contains a substitution or parameter expansion.
    pub dynamic: bool,
    /// The word starts with a parameter expansion (`$HOME/...`).
    pub leading_expansion: bool,
}

impl Word {
    pub fn literal(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }
}

/// A simple command: words plus redirect targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleCommand {
    pub words: Vec<Word>,
    pub redirects: Vec<Word>,
}

impl SimpleCommand {
    fn is_empty(&self) -> bool {
        self.words.is_empty() && self.redirects.is_empty()
    }
}

/// A parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    /// Simple commands in source order, split at `;`, `&&`, `||`, `|`, `&`, newlines and parentheses.
    pub commands: Vec<SimpleCommand>,
    /// Bodies of `$(...)`, backtick and process substitutions, each a command line of its own.
    pub substitutions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    RedirectTarget,
    HereString,
    HeredocDelimiter { strip_tabs: bool },
}

#[derive(Debug)]
struct Heredoc {
    delimiter: String,
    expand: bool,
    strip_tabs: bool,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: CommandLine,
    current: SimpleCommand,
    word: Word,
    in_word: bool,
    pending: Pending,
    heredocs: Vec<Heredoc>,
}

/// Split `input` into simple commands and nested substitutions.
pub fn parse(input: &str) -> Result<CommandLine, ParseError> {
    let mut lexer = Lexer {
        chars: input.chars().collect(),
        pos: 0,
        line: CommandLine::default(),
        current: SimpleCommand::default(),
        word: Word::default(),
        in_word: false,
        pending: Pending::None,
        heredocs: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.line)
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(&mut self) -> Result<(), ParseError> {
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    self.end_command()?;
                    self.pos += 1;
                    self.read_heredoc_bodies()?;
                }
                ' ' | '\t' | '\r' => {
                    self.finish_word()?;
                    self.pos += 1;
                }
                ';' | '(' | ')' => {
                    self.end_command()?;
                    self.pos += 1;
                }
                '|' => {
                    self.end_command()?;
                    self.pos += match self.peek(1) {
                        Some('|') | Some('&') => 2,
                        _ => 1,
                    };
                }
                '&' => match self.peek(1) {
                    Some('&') => {
                        self.end_command()?;
                        self.pos += 2;
                    }
                    Some('>') => {
                        self.finish_word()?;
                        self.pos += if self.peek(2) == Some('>') { 3 } else { 2 };
                        self.pending = Pending::RedirectTarget;
                    }
                    _ => {
                        self.end_command()?;
                        self.pos += 1;
                    }
                },
                '<' | '>' if self.peek(1) == Some('(') => {
                    self.pos += 2;
                    let body = self.take_balanced()?;
                    self.push_substitution(body, "(");
                }
                '<' | '>' => self.redirect(c)?,
                '\'' => self.single_quoted()?,
                '"' => self.double_quoted()?,
                '`' => {
                    self.pos += 1;
                    let body = self.take_backtick()?;
                    self.push_substitution(body, "`");
                }
                '$' => self.dollar()?,
                '\\' => {
                    match self.peek(1) {
                        Some('\n') => {}
                        Some(next) => {
                            self.word.text.push(next);
                            self.word.quoted = true;
                            self.in_word = true;
                        }
                        None => {
                            self.word.text.push('\\');
                            self.in_word = true;
                        }
                    }
                    self.pos += 2;
                }
                '#' if !self.in_word => {
                    while let Some(next) = self.peek(0) {
                        if next == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => {
                    self.word.text.push(c);
                    self.in_word = true;
                    self.pos += 1;
                }
            }
        }
        self.end_command()?;
        if let Some(doc) = self.heredocs.first() {
            return Err(ParseError::UnterminatedHeredoc(doc.delimiter.clone()));
        }
        Ok(())
    }

    fn redirect(&mut self, c: char) -> Result<(), ParseError> {
        // A bare number directly before the operator is a file descriptor, not an argument.
        if self.in_word
            && !self.word.quoted
            && !self.word.text.is_empty()
            && self.word.text.chars().all(|d| d.is_ascii_digit())
        {
            self.word = Word::default();
            self.in_word = false;
        } else {
            self.finish_word()?;
        }
        self.pos += 1;

        if c == '<' && self.peek(0) == Some('<') {
            self.pos += 1;
            if self.peek(0) == Some('<') {
                self.pos += 1;
                self.pending = Pending::HereString;
                return Ok(());
            }
            let strip_tabs = self.peek(0) == Some('-');
            if strip_tabs {
                self.pos += 1;
            }
            self.pending = Pending::HeredocDelimiter { strip_tabs };
            return Ok(());
        }

        if c == '>' && matches!(self.peek(0), Some('>') | Some('|')) {
            self.pos += 1;
        }

        if self.peek(0) == Some('&') {
            // `N>&M` / `N>&-` duplicate or close a descriptor and name no file.
            let mut offset = 1;
            while self.peek(offset).is_some_and(|d| d.is_ascii_digit()) {
                offset += 1;
            }
            if offset > 1 || self.peek(1) == Some('-') {
                self.pos += if offset > 1 { offset } else { 2 };
                return Ok(());
            }
            self.pos += 1;
        }

        self.pending = Pending::RedirectTarget;
        Ok(())
    }

    fn single_quoted(&mut self) -> Result<(), ParseError> {
        self.pos += 1;
        self.in_word = true;
        self.word.quoted = true;
        loop {
            match self.peek(0) {
                None => return Err(ParseError::UnterminatedQuote("single")),
                Some('\'') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(c) => {
                    self.word.text.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn double_quoted(&mut self) -> Result<(), ParseError> {
        self.pos += 1;
        self.in_word = true;
        self.word.quoted = true;
        loop {
            match self.peek(0) {
                None => return Err(ParseError::UnterminatedQuote("double")),
                Some('"') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some('\\') => {
                    match self.peek(1) {
                        Some(next @ ('"' | '\\' | '$' | '`')) => self.word.text.push(next),
                        Some('\n') => {}
                        Some(next) => {
                            self.word.text.push('\\');
                            self.word.text.push(next);
                        }
                        None => return Err(ParseError::UnterminatedQuote("double")),
                    }
                    self.pos += 2;
                }
                Some('`') => {
                    self.pos += 1;
                    let body = self.take_backtick()?;
                    self.push_substitution(body, "`");
                }
                Some('$') => self.dollar()?,
                Some(c) => {
                    self.word.text.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn dollar(&mut self) -> Result<(), ParseError> {
        match self.peek(1) {
            Some('(') => {
                self.pos += 2;
                let body = self.take_balanced()?;
                self.push_substitution(body, "$(");
            }
            Some('{') => {
                let starts_word = self.word.text.is_empty();
                let start = self.pos;
                self.pos += 2;
                let mut depth = 1;
                while depth > 0 {
                    match self.peek(0) {
                        None => return Err(ParseError::UnterminatedExpansion),
                        Some('{') => depth += 1,
                        Some('}') => depth -= 1,
                        _ => {}
                    }
                    self.pos += 1;
                }
                let raw: String = self.chars[start..self.pos].iter().collect();
                self.push_expansion(&raw, starts_word);
            }
            Some(c) if c.is_ascii_alphanumeric() || "_@*#?$!-".contains(c) => {
                let starts_word = self.word.text.is_empty();
                let start = self.pos;
                self.pos += 1;
                if c.is_ascii_alphabetic() || c == '_' {
                    while self
                        .peek(0)
                        .is_some_and(|n| n.is_ascii_alphanumeric() || n == '_')
                    {
                        self.pos += 1;
                    }
                } else {
                    self.pos += 1;
                }
                let raw: String = self.chars[start..self.pos].iter().collect();
                self.push_expansion(&raw, starts_word);
            }
            _ => {
                self.word.text.push('$');
                self.in_word = true;
                self.pos += 1;
            }
        }
        Ok(())
    }

    fn push_expansion(&mut self, raw: &str, starts_word: bool) {
        if starts_word {
            self.word.leading_expansion = true;
        }
        self.word.text.push_str(raw);
        self.word.dynamic = true;
        self.in_word = true;
    }

    fn push_substitution(&mut self, body: String, opener: &str) {
        let closer = if opener == "`" { "`" } else { ")" };
        self.word.text.push_str(opener);
        self.word.text.push_str(&body);
        self.word.text.push_str(closer);
        self.word.dynamic = true;
        self.in_word = true;
        self.line.substitutions.push(body);
    }

    /// Consume up to the `)` matching an already-consumed `(`, returning the body.
    fn take_balanced(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let mut depth = 1usize;
        loop {
            match self.peek(0) {
                None => return Err(ParseError::UnterminatedSubstitution),
                Some('\\') => self.pos += 2,
                Some('\'') => {
                    self.pos += 1;
                    while self.peek(0).is_some_and(|c| c != '\'') {
                        self.pos += 1;
                    }
                    if self.peek(0).is_none() {
                        return Err(ParseError::UnterminatedQuote("single"));
                    }
                    self.pos += 1;
                }
                Some('"') => {
                    self.pos += 1;
                    loop {
                        match self.peek(0) {
                            None => return Err(ParseError::UnterminatedQuote("double")),
                            Some('\\') => self.pos += 2,
                            Some('"') => break,
                            _ => self.pos += 1,
                        }
                    }
                    self.pos += 1;
                }
                Some('(') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(')') => {
                    depth -= 1;
                    if depth == 0 {
                        let body: String = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        return Ok(body);
                    }
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn take_backtick(&mut self) -> Result<String, ParseError> {
        let mut body = String::new();
        loop {
            match self.peek(0) {
                None => return Err(ParseError::UnterminatedSubstitution),
                Some('`') => {
                    self.pos += 1;
                    return Ok(body);
                }
                Some('\\') if matches!(self.peek(1), Some('`') | Some('\\') | Some('$')) => {
                    if let Some(next) = self.peek(1) {
                        body.push(next);
                    }
                    self.pos += 2;
                }
                Some(c) => {
                    body.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn finish_word(&mut self) -> Result<(), ParseError> {
        if !self.in_word {
            return Ok(());
        }
        let word = std::mem::take(&mut self.word);
        self.in_word = false;
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::None => self.current.words.push(word),
            Pending::RedirectTarget => self.current.redirects.push(word),
            Pending::HereString => {}
            Pending::HeredocDelimiter { strip_tabs } => self.heredocs.push(Heredoc {
                expand: !word.quoted,
                delimiter: word.text,
                strip_tabs,
            }),
        }
        Ok(())
    }

    fn end_command(&mut self) -> Result<(), ParseError> {
        self.finish_word()?;
        if self.pending != Pending::None {
            return Err(ParseError::DanglingRedirect);
        }
        let command = std::mem::take(&mut self.current);
        if !command.is_empty() {
            self.line.commands.push(command);
        }
        Ok(())
    }

    /// Skip here-document bodies that start after the newline just consumed.
    fn read_heredoc_bodies(&mut self) -> Result<(), ParseError> {
        let docs = std::mem::take(&mut self.heredocs);
        for doc in docs {
            let mut body = String::new();
            let mut terminated = false;
            while self.pos < self.chars.len() {
                let line_start = self.pos;
                while self.peek(0).is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                let line: String = self.chars[line_start..self.pos].iter().collect();
                if self.peek(0) == Some('\n') {
                    self.pos += 1;
                }
                let candidate = if doc.strip_tabs {
                    line.trim_start_matches('\t')
                } else {
                    line.as_str()
                };
                if candidate == doc.delimiter {
                    terminated = true;
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            if !terminated {
                return Err(ParseError::UnterminatedHeredoc(doc.delimiter));
            }
            if doc.expand {
                self.line.substitutions.extend(heredoc_substitutions(&body)?);
            }
        }
        Ok(())
    }
}

/// Substitutions inside an unquoted here-document body still execute.
fn heredoc_substitutions(body: &str) -> Result<Vec<String>, ParseError> {
    let mut lexer = Lexer {
        chars: body.chars().collect(),
        pos: 0,
        line: CommandLine::default(),
        current: SimpleCommand::default(),
        word: Word::default(),
        in_word: false,
        pending: Pending::None,
        heredocs: Vec::new(),
    };
    while let Some(c) = lexer.peek(0) {
        match c {
            '\\' => lexer.pos += 2,
            '`' => {
                lexer.pos += 1;
                let body = lexer.take_backtick()?;
                lexer.line.substitutions.push(body);
            }
            '$' if lexer.peek(1) == Some('(') => {
                lexer.pos += 2;
                let body = lexer.take_balanced()?;
                lexer.line.substitutions.push(body);
            }
            _ => lexer.pos += 1,
        }
    }
    Ok(lexer.line.substitutions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &CommandLine, index: usize) -> Vec<&str> {
        line.commands[index]
            .words
            .iter()
            .map(|w| w.text.as_str())
            .collect()
    }

    #[test]
    fn splits_quoted_words_like_a_shell() {
        let line = parse(r#"git commit -m 'wip: it''s "done"' --author "A \"B\"""#).expect("parse");
        assert_eq!(
            words(&line, 0),
            vec!["git", "commit", "-m", r#"wip: its "done""#, "--author", r#"A "B""#]
        );
    }

    #[test]
    fn splits_on_control_operators() {
        let line =
            parse("npm install && npm test || ls; ps aux | grep node & sleep 1").expect("parse");
        let names: Vec<&str> = line
            .commands
            .iter()
            .map(|c| c.words[0].text.as_str())
            .collect();
        assert_eq!(names, vec!["npm", "npm", "ls", "ps", "grep", "sleep"]);
    }

    #[test]
    fn collects_redirect_targets_and_drops_fd_numbers() {
        let line = parse("npm test > out.log 2>&1 < input.txt 2>/dev/null").expect("parse");
        assert_eq!(words(&line, 0), vec!["npm", "test"]);
        let targets: Vec<&str> = line.commands[0]
            .redirects
            .iter()
            .map(|w| w.text.as_str())
            .collect();
        assert_eq!(targets, vec!["out.log", "input.txt", "/dev/null"]);
    }

    #[test]
    fn extracts_nested_substitutions() {
        let line = parse(r#"cat "$(ls $(pwd))" `whoami`"#).expect("parse");
        assert_eq!(line.substitutions, vec!["ls $(pwd)".to_string(), "whoami".to_string()]);
        assert!(line.commands[0].words[1].dynamic);
    }

    #[test]
    fn single_quotes_suppress_substitution() {
        let line = parse("grep '$(rm -rf /)' file.txt").expect("parse");
        assert!(line.substitutions.is_empty());
        assert!(!line.commands[0].words[1].dynamic);
    }

    #[test]
    fn marks_leading_parameter_expansion() {
        let line = parse("cat $HOME/.ssh/id_rsa src/${NAME}.js").expect("parse");
        assert!(line.commands[0].words[1].leading_expansion);
        assert!(!line.commands[0].words[2].leading_expansion);
        assert!(line.commands[0].words[2].dynamic);
    }

    #[test]
    fn heredoc_body_is_not_a_command() {
        let line = parse("cat > notes.md <<'EOF'\nrm -rf /\n$(curl evil)\nEOF\nls").expect("parse");
        assert_eq!(line.commands.len(), 2);
        assert!(line.substitutions.is_empty());
        assert_eq!(words(&line, 1), vec!["ls"]);
    }

    #[test]
    fn unquoted_heredoc_body_exposes_substitutions() {
        let line = parse("cat <<EOF\n$(curl evil)\nEOF").expect("parse");
        assert_eq!(line.substitutions, vec!["curl evil".to_string()]);
    }

    #[test]
    fn comments_are_skipped() {
        let line = parse("ls # && curl evil").expect("parse");
        assert_eq!(line.commands.len(), 1);
        assert_eq!(words(&line, 0), vec!["ls"]);
    }

    #[test]
    fn reports_unterminated_constructs() {
        assert_eq!(
            parse("echo 'oops").unwrap_err(),
            ParseError::UnterminatedQuote("single")
        );
        assert_eq!(
            parse("ls $(pwd").unwrap_err(),
            ParseError::UnterminatedSubstitution
        );
        assert_eq!(parse("ls >").unwrap_err(), ParseError::DanglingRedirect);
        assert!(matches!(
            parse("cat <<EOF\nbody").unwrap_err(),
            ParseError::UnterminatedHeredoc(_)
        ));
    }
}

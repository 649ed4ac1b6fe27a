use crate::error::InferenceError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    /// 1-based
    pub line: usize,
}

/// Split network description text into words, quoted strings and braces.
///
/// `%` starts a comment that runs to the end of the line.
pub fn tokenize(text: &str) -> Result<Vec<Spanned>, InferenceError> {
    let mut tokens = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '%' => break,
                '{' => tokens.push(Spanned {
                    token: Token::Open,
                    line,
                }),
                '}' => tokens.push(Spanned {
                    token: Token::Close,
                    line,
                }),
                '"' => {
                    let mut value = String::new();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        match c {
                            '"' => {
                                closed = true;
                                break;
                            }
                            '\\' => match chars.next() {
                                Some(escaped) => value.push(escaped),
                                None => break,
                            },
                            other => value.push(other),
                        }
                    }
                    if !closed {
                        return Err(InferenceError::Parse {
                            line,
                            message: "unterminated string".to_string(),
                        });
                    }
                    tokens.push(Spanned {
                        token: Token::Quoted(value),
                        line,
                    });
                }
                c if c.is_whitespace() => {}
                c => {
                    let mut word = String::from(c);
                    while let Some(&next) = chars.peek() {
                        if next.is_whitespace() || matches!(next, '{' | '}' | '"' | '%') {
                            break;
                        }
                        word.push(next);
                        chars.next();
                    }
                    tokens.push(Spanned {
                        token: Token::Word(word),
                        line,
                    });
                }
            }
        }
    }
    Ok(tokens)
}

/// Cursor over a token stream with line-aware errors.
pub struct TokenStream {
    tokens: Vec<Spanned>,
    position: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        TokenStream {
            tokens,
            position: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.tokens.len()
    }

    pub fn line(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    pub fn error(&self, message: impl Into<String>) -> InferenceError {
        InferenceError::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|t| &t.token)
    }

    pub fn next(&mut self) -> Result<Token, InferenceError> {
        let token = self
            .tokens
            .get(self.position)
            .map(|t| t.token.clone())
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.position += 1;
        Ok(token)
    }

    pub fn open(&mut self) -> Result<(), InferenceError> {
        match self.next()? {
            Token::Open => Ok(()),
            other => {
                self.position -= 1;
                Err(self.error(format!("expected '{{', found {}", describe(&other))))
            }
        }
    }

    pub fn close(&mut self) -> Result<(), InferenceError> {
        match self.next()? {
            Token::Close => Ok(()),
            other => {
                self.position -= 1;
                Err(self.error(format!("expected '}}', found {}", describe(&other))))
            }
        }
    }

    /// Consume a `}` if it is next.
    pub fn try_close(&mut self) -> bool {
        if self.peek() == Some(&Token::Close) {
            self.position += 1;
            return true;
        }
        false
    }

    /// A bare word or a quoted string.
    pub fn word(&mut self) -> Result<String, InferenceError> {
        match self.next()? {
            Token::Word(w) | Token::Quoted(w) => Ok(w),
            other => {
                self.position -= 1;
                Err(self.error(format!("expected a name, found {}", describe(&other))))
            }
        }
    }

    pub fn keyword(&mut self, expected: &str) -> Result<(), InferenceError> {
        let found = self.word()?;
        if found != expected {
            self.position -= 1;
            return Err(self.error(format!("expected '{expected}', found '{found}'")));
        }
        Ok(())
    }

    pub fn number(&mut self) -> Result<f64, InferenceError> {
        let word = self.word()?;
        word.parse::<f64>().map_err(|_| {
            self.position -= 1;
            self.error(format!("expected a number, found '{word}'"))
        })
    }

    pub fn count(&mut self) -> Result<usize, InferenceError> {
        let word = self.word()?;
        word.parse::<usize>().map_err(|_| {
            self.position -= 1;
            self.error(format!("expected a non-negative integer, found '{word}'"))
        })
    }

    pub fn boolean(&mut self) -> Result<bool, InferenceError> {
        let word = self.word()?;
        match word.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => {
                self.position -= 1;
                Err(self.error(format!("expected true or false, found '{word}'")))
            }
        }
    }

    /// `{ item item ... }`
    pub fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, InferenceError>,
    ) -> Result<Vec<T>, InferenceError> {
        self.open()?;
        let mut items = Vec::new();
        while !self.try_close() {
            if self.is_done() {
                return Err(self.error("unterminated list"));
            }
            items.push(item(self)?);
        }
        Ok(items)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("'{w}'"),
        Token::Quoted(q) => format!("\"{q}\""),
        Token::Open => "'{'".to_string(),
        Token::Close => "'}'".to_string(),
    }
}

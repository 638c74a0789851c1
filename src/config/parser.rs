use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::ast::{Config, Location, Server, DEFAULT_BODY_LIMIT};
use super::ConfigError;
use crate::http::Method;

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    StringLit(String),
    Number(u64),
    LBrace,
    RBrace,
    Semi,
}

pub fn parse_config(input: &str, base_dir: &Path) -> Result<Config, ConfigError> {
    let tokens = tokenize(input)?;
    let mut p = Parser { tokens, pos: 0, base_dir };
    let cfg = p.parse_config()?;

    if cfg.servers.is_empty() {
        return Err(ConfigError::Invalid("no servers defined".into()));
    }
    for (i, s) in cfg.servers.iter().enumerate() {
        if s.listen.is_empty() {
            return Err(ConfigError::Invalid(format!("server #{i} missing listen directive")));
        }
    }
    Ok(cfg)
}

fn syntax<T>(msg: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Syntax(msg.into()))
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConfigError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '{' => { chars.next(); tokens.push(Token::LBrace); }
            '}' => { chars.next(); tokens.push(Token::RBrace); }
            ';' => { chars.next(); tokens.push(Token::Semi); }
            '#' => {
                for ch in chars.by_ref() {
                    if ch == '\n' { break; }
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut terminated = false;
                for ch in chars.by_ref() {
                    if ch == '"' {
                        terminated = true;
                        break;
                    }
                    s.push(ch);
                }
                if !terminated {
                    return syntax("unterminated string literal");
                }
                tokens.push(Token::StringLit(s));
            }
            c if c.is_ascii_whitespace() => { chars.next(); }
            _ => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_whitespace() || matches!(ch, '{' | '}' | ';') {
                        break;
                    }
                    s.push(ch);
                    chars.next();
                }
                if !s.is_empty() && s.chars().all(|ch| ch.is_ascii_digit()) {
                    let n = s.parse::<u64>().map_err(|e| ConfigError::Syntax(e.to_string()))?;
                    tokens.push(Token::Number(n));
                } else {
                    tokens.push(Token::Ident(s));
                }
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    base_dir: &'a Path,
}

impl<'a> Parser<'a> {
    fn parse_config(&mut self) -> Result<Config, ConfigError> {
        let mut servers = Vec::new();
        while !self.is_end() {
            match self.peek() {
                Some(Token::Ident(s)) if s == "server" => {
                    self.next();
                    self.expect(Token::LBrace)?;
                    servers.push(self.parse_server()?);
                }
                Some(tok) => return syntax(format!("unexpected token at top level: {tok:?}")),
                None => break,
            }
        }
        Ok(Config { servers })
    }

    fn parse_server(&mut self) -> Result<Server, ConfigError> {
        let mut server = Server {
            listen: Vec::new(),
            server_names: Vec::new(),
            root: self.base_dir.join("www"),
            index: "index.html".to_string(),
            client_max_body_size: DEFAULT_BODY_LIMIT,
            error_pages: HashMap::new(),
            locations: Vec::new(),
        };

        loop {
            match self.peek() {
                Some(Token::RBrace) => { self.next(); break; }
                Some(Token::Ident(s)) if s == "listen" => {
                    self.next();
                    let addr = self.parse_listen_value()?;
                    server.listen.push(addr);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "server_name" => {
                    self.next();
                    loop {
                        match self.peek() {
                            Some(Token::Semi) => break,
                            Some(Token::Ident(name)) | Some(Token::StringLit(name)) => {
                                server.server_names.push(name.clone());
                                self.next();
                            }
                            other => return syntax(format!("unexpected in server_name: {other:?}")),
                        }
                    }
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "root" => {
                    self.next();
                    server.root = self.parse_path()?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "index" => {
                    self.next();
                    server.index = self.expect_stringish()?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "error_page" => {
                    self.next();
                    // error_page 500 502 503 /50x.html;
                    let mut codes = Vec::new();
                    while let Some(Token::Number(n)) = self.peek() {
                        codes.push(*n as u16);
                        self.next();
                    }
                    if codes.is_empty() {
                        return syntax("error_page expects at least one status code");
                    }
                    let page = self.expect_stringish()?;
                    for code in codes {
                        server.error_pages.insert(code, page.clone());
                    }
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "client_max_body_size" => {
                    self.next();
                    server.client_max_body_size = self.expect_size()?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "location" => {
                    self.next();
                    let path = self.expect_stringish()?;
                    self.expect(Token::LBrace)?;
                    server.locations.push(self.parse_location(path)?);
                }
                Some(tok) => return syntax(format!("unknown directive in server: {tok:?}")),
                None => return syntax("unexpected EOF in server block"),
            }
        }
        Ok(server)
    }

    fn parse_location(&mut self, path: String) -> Result<Location, ConfigError> {
        let mut loc = Location { path, ..Location::default() };

        loop {
            match self.peek() {
                Some(Token::RBrace) => { self.next(); break; }
                Some(Token::Ident(s)) if s == "root" => {
                    self.next();
                    loc.root = Some(self.parse_path()?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "index" => {
                    self.next();
                    loc.index = Some(self.expect_stringish()?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "methods" => {
                    self.next();
                    loop {
                        match self.peek() {
                            Some(Token::Semi) => break,
                            Some(Token::Ident(m)) => {
                                let m = m.clone();
                                loc.methods.push(self.parse_method(&m)?);
                                self.next();
                            }
                            other => return syntax(format!("unexpected in methods: {other:?}")),
                        }
                    }
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "autoindex" => {
                    self.next();
                    let v = self.expect_ident()?.to_lowercase();
                    loc.autoindex = match v.as_str() {
                        "on" => true,
                        "off" => false,
                        _ => return syntax("autoindex expects on|off"),
                    };
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "upload_store" => {
                    self.next();
                    loc.upload_store = Some(self.parse_path()?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "cgi" => {
                    self.next();
                    let ext = self.expect_stringish()?;
                    // Interpreter is optional: scripts without one are
                    // executed directly.
                    let interpreter = match self.peek() {
                        Some(Token::Semi) => PathBuf::new(),
                        _ => PathBuf::from(self.expect_stringish()?),
                    };
                    loc.cgi.insert(ext, interpreter);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "client_max_body_size" => {
                    self.next();
                    loc.client_max_body_size = self.expect_size()?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "redirect" => {
                    self.next();
                    let code = self.expect_number_u16()?;
                    let url = self.expect_stringish()?;
                    loc.redirect = Some((code, url));
                    self.expect(Token::Semi)?;
                }
                Some(tok) => return syntax(format!("unknown directive in location: {tok:?}")),
                None => return syntax("unexpected EOF in location block"),
            }
        }
        Ok(loc)
    }

    fn parse_listen_value(&mut self) -> Result<SocketAddr, ConfigError> {
        match self.next() {
            Some(Token::Ident(s)) | Some(Token::StringLit(s)) => self.parse_socket_addr(&s),
            Some(Token::Number(n)) => self.parse_socket_addr(&format!("0.0.0.0:{n}")),
            other => syntax(format!("expected listen address, got {other:?}")),
        }
    }

    fn parse_socket_addr(&self, s: &str) -> Result<SocketAddr, ConfigError> {
        if let Ok(a) = s.parse::<SocketAddr>() {
            return Ok(a);
        }
        if let Ok(port) = s.parse::<u16>() {
            return format!("0.0.0.0:{port}")
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::Syntax(e.to_string()));
        }
        syntax(format!("invalid listen address: {s}"))
    }

    fn parse_path(&mut self) -> Result<PathBuf, ConfigError> {
        let p = PathBuf::from(self.expect_stringish()?);
        if p.is_absolute() {
            Ok(p)
        } else {
            Ok(self.base_dir.join(p))
        }
    }

    fn parse_method(&self, s: &str) -> Result<Method, ConfigError> {
        Method::parse(&s.to_uppercase())
            .ok_or_else(|| ConfigError::Syntax(format!("unsupported method {s}")))
    }

    // token helpers
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn is_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect(&mut self, want: Token) -> Result<(), ConfigError> {
        let got = self.next().ok_or_else(|| ConfigError::Syntax("unexpected EOF".into()))?;
        if std::mem::discriminant(&got) == std::mem::discriminant(&want) {
            Ok(())
        } else {
            syntax(format!("expected {want:?}, got {got:?}"))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ConfigError> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            other => syntax(format!("expected identifier, got {other:?}")),
        }
    }

    fn expect_stringish(&mut self) -> Result<String, ConfigError> {
        match self.next() {
            Some(Token::Ident(s)) | Some(Token::StringLit(s)) => Ok(s),
            Some(Token::Number(n)) => Ok(n.to_string()),
            other => syntax(format!("expected value, got {other:?}")),
        }
    }

    fn expect_number_u16(&mut self) -> Result<u16, ConfigError> {
        match self.next() {
            Some(Token::Number(n)) if n <= u16::MAX as u64 => Ok(n as u16),
            other => syntax(format!("expected status code, got {other:?}")),
        }
    }

    /// Sizes accept bare bytes or a K/M/G suffix (case-insensitive).
    fn expect_size(&mut self) -> Result<u64, ConfigError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Ident(s)) => parse_size(&s),
            other => syntax(format!("expected size, got {other:?}")),
        }
    }
}

fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let (digits, multiplier) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1024),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| ConfigError::Syntax(format!("invalid size: {s}")))
}

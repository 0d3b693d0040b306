//! Expression variables: string formulas over `Branch.field` identifiers.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), and built-in functions (abs, sqrt, log,
//! exp, pow, min, max). Booleans evaluate to 1.0 / 0.0; a value is "true"
//! when it is > 0.

use cf_core::{Error, FieldKey, Result};

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Number(f64),
    Field(usize), // index into dependencies
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        Some(match name {
            "abs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "log" => (Func::Log, 1),
            "exp" => (Func::Exp, 1),
            "pow" => (Func::Pow, 2),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            _ => return None,
        })
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A parsed formula ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    root: Node,
    dependencies: Vec<FieldKey>,
}

impl CompiledExpr {
    /// Parse a formula such as `100/2.997*Candidates.fLiteCt`.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, fields: Vec::new() };
        let root = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::Expression(format!("unexpected token after expression: {tok:?}")));
        }
        Ok(Self { source: input.trim().to_string(), root, dependencies: parser.fields })
    }

    /// Fields referenced by the formula, in first-occurrence order.
    pub fn dependencies(&self) -> &[FieldKey] {
        &self.dependencies
    }

    /// Formula text as given (trimmed).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `values` aligned to [`Self::dependencies`].
    pub fn eval(&self, values: &[f64]) -> f64 {
        eval_node(&self.root, values)
    }
}

// ── Evaluation ─────────────────────────────────────────────────

fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_node(node: &Node, vals: &[f64]) -> f64 {
    match node {
        Node::Number(n) => *n,
        Node::Field(i) => vals[*i],
        Node::Neg(a) => -eval_node(a, vals),
        Node::Not(a) => truth(eval_node(a, vals) <= 0.0),
        Node::Binary(op, a, b) => {
            let l = eval_node(a, vals);
            // Short-circuit the boolean connectives.
            match op {
                Op::And if l <= 0.0 => return 0.0,
                Op::Or if l > 0.0 => return 1.0,
                _ => {}
            }
            let r = eval_node(b, vals);
            match op {
                Op::Add => l + r,
                Op::Sub => l - r,
                Op::Mul => l * r,
                Op::Div => l / r,
                Op::Eq => truth((l - r).abs() < f64::EPSILON),
                Op::Ne => truth((l - r).abs() >= f64::EPSILON),
                Op::Lt => truth(l < r),
                Op::Le => truth(l <= r),
                Op::Gt => truth(l > r),
                Op::Ge => truth(l >= r),
                Op::And | Op::Or => truth(r > 0.0),
            }
        }
        Node::Call(f, args) => {
            let x = eval_node(&args[0], vals);
            match f {
                Func::Abs => x.abs(),
                Func::Sqrt => x.sqrt(),
                Func::Log => x.ln(),
                Func::Exp => x.exp(),
                Func::Pow => x.powf(eval_node(&args[1], vals)),
                Func::Min => x.min(eval_node(&args[1], vals)),
                Func::Max => x.max(eval_node(&args[1], vals)),
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const TWO_CHAR_OPS: [&str; 6] = ["&&", "||", "==", "!=", "<=", ">="];

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if i + 1 < chars.len() {
            let pair: String = chars[i..i + 2].iter().collect();
            if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                tokens.push(Token::Op(*op));
                i += 2;
                continue;
            }
        }

        match c {
            '+' | '-' | '*' | '/' | '<' | '>' | '!' => {
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '<' => "<",
                    '>' => ">",
                    _ => "!",
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() {
                    let d = chars[i];
                    let exp_sign =
                        (d == '+' || d == '-') && i > start && matches!(chars[i - 1], 'e' | 'E');
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exp_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| Error::Expression(format!("invalid number: '{text}'")))?;
                tokens.push(Token::Num(n));
            }
            // Identifiers may contain dots: `Branch.field`.
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(Error::Expression(format!("unexpected character: '{c}'"))),
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    fields: Vec<FieldKey>,
}

impl Parser<'_> {
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

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn field_index(&mut self, name: &str) -> Result<usize> {
        let key = FieldKey::parse(name).map_err(|_| {
            Error::Expression(format!("identifier '{name}' must be of the form Branch.field"))
        })?;
        if let Some(i) = self.fields.iter().position(|k| *k == key) {
            return Ok(i);
        }
        self.fields.push(key);
        Ok(self.fields.len() - 1)
    }

    fn parse_or(&mut self) -> Result<Node> {
        let mut lhs = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let rhs = self.parse_and()?;
            lhs = Node::Binary(Op::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut lhs = self.parse_cmp()?;
        while self.eat_op(&["&&"]).is_some() {
            let rhs = self.parse_cmp()?;
            lhs = Node::Binary(Op::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Node> {
        let lhs = self.parse_add()?;
        let op = match self.eat_op(&["==", "!=", "<", "<=", ">", ">="]) {
            Some("==") => Op::Eq,
            Some("!=") => Op::Ne,
            Some("<") => Op::Lt,
            Some("<=") => Op::Le,
            Some(">") => Op::Gt,
            Some(">=") => Op::Ge,
            _ => return Ok(lhs),
        };
        let rhs = self.parse_add()?;
        Ok(Node::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Node> {
        let mut lhs = self.parse_mul()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.parse_mul()?;
            let op = if op == "+" { Op::Add } else { Op::Sub };
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Node> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let rhs = self.parse_unary()?;
            let op = if op == "*" { Op::Mul } else { Op::Div };
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node> {
        match self.eat_op(&["-", "!"]) {
            Some("-") => Ok(Node::Neg(Box::new(self.parse_unary()?))),
            Some(_) => Ok(Node::Not(Box::new(self.parse_unary()?))),
            None => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Node::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) if matches!(self.peek(), Some(Token::LParen)) => {
                let (func, arity) = Func::lookup(&name)
                    .ok_or_else(|| Error::Expression(format!("unknown function: '{name}'")))?;
                self.pos += 1;
                let mut args = vec![self.parse_or()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.pos += 1;
                    args.push(self.parse_or()?);
                }
                self.expect(Token::RParen)?;
                if args.len() != arity {
                    return Err(Error::Expression(format!(
                        "{name}() takes {arity} argument(s), got {}",
                        args.len()
                    )));
                }
                Ok(Node::Call(func, args))
            }
            Some(Token::Ident(name)) => Ok(Node::Field(self.field_index(&name)?)),
            other => Err(Error::Expression(format!(
                "expected number, field, or '(', got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn constant_arithmetic() {
        let e = CompiledExpr::compile("2 + 3 * 4").unwrap();
        assert!(e.dependencies().is_empty());
        assert_relative_eq!(e.eval(&[]), 14.0);
        let e = CompiledExpr::compile("(1 + 2) * (3 + 4)").unwrap();
        assert_relative_eq!(e.eval(&[]), 21.0);
        let e = CompiledExpr::compile("1.5e2 + 3.0E-1").unwrap();
        assert_relative_eq!(e.eval(&[]), 150.3);
    }

    #[test]
    fn proper_lifetime_formula() {
        let e = CompiledExpr::compile("100/2.997*Candidates.fLiteCt").unwrap();
        assert_eq!(e.dependencies(), &[FieldKey::new("Candidates", "fLiteCt")]);
        assert_relative_eq!(e.eval(&[0.02997]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn dependencies_in_first_occurrence_order() {
        let e = CompiledExpr::compile("Cand.b * Cand.a + Cand.b").unwrap();
        assert_eq!(e.dependencies(), &[FieldKey::new("Cand", "b"), FieldKey::new("Cand", "a")]);
        assert_relative_eq!(e.eval(&[2.0, 3.0]), 8.0);
    }

    #[test]
    fn boolean_logic() {
        let e = CompiledExpr::compile("Ev.njet >= 4 && Ev.ptLead > 25.0").unwrap();
        assert_eq!(e.eval(&[4.0, 30.0]), 1.0);
        assert_eq!(e.eval(&[3.0, 30.0]), 0.0);
        let e = CompiledExpr::compile("Ev.x > 5 || Ev.y < 2").unwrap();
        assert_eq!(e.eval(&[6.0, 3.0]), 1.0);
        assert_eq!(e.eval(&[3.0, 1.0]), 1.0);
        assert_eq!(e.eval(&[3.0, 3.0]), 0.0);
        let e = CompiledExpr::compile("!(Ev.x > 3)").unwrap();
        assert_eq!(e.eval(&[2.0]), 1.0);
        assert_eq!(e.eval(&[5.0]), 0.0);
    }

    #[test]
    fn functions_and_negation() {
        let e = CompiledExpr::compile("sqrt(pow(P.x, 2) + pow(P.y, 2))").unwrap();
        assert_relative_eq!(e.eval(&[3.0, 4.0]), 5.0);
        let e = CompiledExpr::compile("-abs(P.x) + max(P.x, 1)").unwrap();
        assert_relative_eq!(e.eval(&[-2.0]), -1.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(CompiledExpr::compile("pt * 2").is_err(), "bare identifier");
        assert!(CompiledExpr::compile("foo(C.x)").is_err(), "unknown function");
        assert!(CompiledExpr::compile("pow(C.x)").is_err(), "arity");
        assert!(CompiledExpr::compile("(C.x + 1").is_err(), "unbalanced");
        assert!(CompiledExpr::compile("C.x $ 2").is_err(), "bad char");
        assert!(CompiledExpr::compile("C.x 2").is_err(), "trailing token");
    }
}

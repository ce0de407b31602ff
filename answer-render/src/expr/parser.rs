//! Recursive descent parser for rich directive expressions
//!
//! Precedence, loosest first:
//!
//! ```text
//! conditional  =  or ("if" or "else" conditional)?
//! or           =  and ("or" and)*
//! and          =  not ("and" not)*
//! not          =  "not" not | comparison
//! comparison   =  bitor (compare_op bitor)*
//! bitor        =  bitand ("|" bitand)*
//! bitand       =  arith ("&" arith)*
//! arith        =  term (("+" | "-") term)*
//! term         =  unary (("*" | "/") unary)*
//! unary        =  ("-" | "+" | "~") unary | postfix
//! postfix      =  primary ("[" conditional "]" | "." name call_args?)*
//! ```

use super::allow::{Attribute, BinaryOp, Builtin, Method, UnaryOp};
use super::ast::{Expr, FStringPart, Literal};
use super::lexer::{Spanned, Token, tokenize, unescape};
use crate::directive::{DATASET_NAME, SimpleDirective};
use crate::error::EvalError;
use crate::render::format::FormatSpec;
use crate::render::scanner::{TemplateSegment, scan_segments};

/// Deepest nesting accepted before the parse is abandoned
pub const MAX_DEPTH: usize = 64;

/// Parse an expression and check every name it uses is in scope
pub fn parse_expression(input: &str) -> Result<Expr, EvalError> {
    let expr = parse_nested(input, 0)?;
    check_names(&expr, &mut vec![DATASET_NAME.to_string()])?;
    Ok(expr)
}

fn parse_nested(input: &str, depth: usize) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(input, depth)?;
    let expr = parser.parse_conditional()?;
    if parser.current() != &Token::Eof {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

/// Expression parser
struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, depth: usize) -> Result<Self, EvalError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
            depth,
        })
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos + 1)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    /// Consume `token` if it is current
    fn eat(&mut self, token: &Token) -> bool {
        if self.current() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(EvalError::malformed(format!(
                "expected '{}', found '{}' at offset {} in '{}'",
                expected,
                self.current(),
                self.offset(),
                self.input
            )))
        }
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.position)
            .unwrap_or(self.input.len())
    }

    fn unexpected(&self) -> EvalError {
        EvalError::malformed(format!(
            "unexpected '{}' at offset {} in '{}'",
            self.current(),
            self.offset(),
            self.input
        ))
    }

    /// Count one more level of a left-deep fold or postfix chain
    ///
    /// Chains like `a + a + ...` build trees as deep as they are long, so
    /// each folded operator counts toward [`MAX_DEPTH`]. Callers restore
    /// `depth` once the chain ends.
    fn deepen(&mut self) -> Result<(), EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.depth += 1;
        Ok(())
    }

    /// Run a recursive step one level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// conditional = or ("if" or "else" conditional)?
    fn parse_conditional(&mut self) -> Result<Expr, EvalError> {
        self.nested(|p| {
            let then_expr = p.parse_or()?;
            if !p.eat(&Token::If) {
                return Ok(then_expr);
            }
            let condition = p.parse_or()?;
            p.expect(Token::Else)?;
            let else_expr = p.parse_conditional()?;
            Ok(Expr::Conditional {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            })
        })
    }

    /// or = and ("or" and)*
    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.deepen()?;
            let right = self.parse_and()?;
            left = Expr::binary(left, BinaryOp::Or, right);
        }
        self.depth = base;
        Ok(left)
    }

    /// and = not ("and" not)*
    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            self.deepen()?;
            let right = self.parse_not()?;
            left = Expr::binary(left, BinaryOp::And, right);
        }
        self.depth = base;
        Ok(left)
    }

    /// not = "not" not | comparison
    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Not) {
            let operand = self.nested(|p| p.parse_not())?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<BinaryOp> {
        let op = match self.current() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::In => BinaryOp::In,
            Token::Not if self.peek() == &Token::In => {
                self.advance();
                BinaryOp::NotIn
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    /// comparison = bitor (compare_op bitor)*
    ///
    /// Chains read as conjunctions: `a < b < c` is `a < b and b < c`.
    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_bitor()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        let base = self.depth;
        let mut right = self.parse_bitor()?;
        let mut result = Expr::binary(left, op, right.clone());

        while let Some(op) = self.comparison_op() {
            self.deepen()?;
            left = right;
            right = self.parse_bitor()?;
            let link = Expr::binary(left, op, right.clone());
            result = Expr::binary(result, BinaryOp::And, link);
        }
        self.depth = base;
        Ok(result)
    }

    /// bitor = bitand ("|" bitand)*
    fn parse_bitor(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.parse_bitand()?;
        while self.eat(&Token::Pipe) {
            self.deepen()?;
            let right = self.parse_bitand()?;
            left = Expr::binary(left, BinaryOp::BitOr, right);
        }
        self.depth = base;
        Ok(left)
    }

    /// bitand = arith ("&" arith)*
    fn parse_bitand(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.parse_arith()?;
        while self.eat(&Token::Amp) {
            self.deepen()?;
            let right = self.parse_arith()?;
            left = Expr::binary(left, BinaryOp::BitAnd, right);
        }
        self.depth = base;
        Ok(left)
    }

    /// arith = term (("+"|"-") term)*
    fn parse_arith(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_term()?;
            left = Expr::binary(left, op, right);
        }
        self.depth = base;
        Ok(left)
    }

    /// term = unary (("*"|"/") unary)*
    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_unary()?;
            left = Expr::binary(left, op, right);
        }
        self.depth = base;
        Ok(left)
    }

    /// unary = ("-" | "+" | "~") unary | postfix
    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.current() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            Token::Tilde => UnaryOp::Invert,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.nested(|p| p.parse_unary())?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// postfix = primary ("[" conditional "]" | "." name call_args?)*
    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let base = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            match self.current() {
                Token::LBracket => {
                    self.advance();
                    self.deepen()?;
                    let index = self.parse_conditional()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::subscript(expr, index);
                }
                Token::Dot => {
                    self.advance();
                    self.deepen()?;
                    let Token::Ident(name) = self.current().clone() else {
                        return Err(self.unexpected());
                    };
                    self.advance();
                    if self.eat(&Token::LParen) {
                        let method = Method::from_name(&name)?;
                        let args = self.parse_call_args()?;
                        expr = Expr::method(expr, method, args);
                    } else {
                        let attr = Attribute::from_name(&name)?;
                        expr = Expr::Attribute {
                            target: Box::new(expr),
                            attr,
                        };
                    }
                }
                _ => {
                    self.depth = base;
                    return Ok(expr);
                }
            }
        }
    }

    /// Arguments after `(`, up to and including `)`
    ///
    /// A generator is allowed as the only argument: `sum(x for x in xs)`.
    fn parse_call_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        if self.eat(&Token::RParen) {
            return Ok(Vec::new());
        }
        let first = self.parse_conditional()?;
        if self.current() == &Token::For {
            let generator = self.parse_comprehension(first)?;
            self.expect(Token::RParen)?;
            return Ok(vec![generator]);
        }
        let args = self.parse_sequence_rest(first, &Token::RParen)?;
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// Remaining comma-separated items after `first`, stopping before `close`
    fn parse_sequence_rest(&mut self, first: Expr, close: &Token) -> Result<Vec<Expr>, EvalError> {
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.current() == close {
                break;
            }
            items.push(self.parse_conditional()?);
        }
        Ok(items)
    }

    /// `for targets in iter (if cond)*`, after the element
    fn parse_comprehension(&mut self, element: Expr) -> Result<Expr, EvalError> {
        self.expect(Token::For)?;

        let mut targets = Vec::new();
        loop {
            let Token::Ident(name) = self.current().clone() else {
                return Err(self.unexpected());
            };
            self.advance();
            targets.push(name);
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect(Token::In)?;
        let iter = self.parse_or()?;

        let mut condition: Option<Expr> = None;
        while self.eat(&Token::If) {
            let next = self.parse_or()?;
            condition = Some(match condition {
                Some(prev) => Expr::binary(prev, BinaryOp::And, next),
                None => next,
            });
        }

        if self.current() == &Token::For {
            return Err(EvalError::malformed(format!(
                "nested 'for' clauses are not supported in '{}'",
                self.input
            )));
        }

        Ok(Expr::Comprehension {
            element: Box::new(element),
            targets,
            iter: Box::new(iter),
            condition: condition.map(Box::new),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let token = self.current().clone();
        match token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Num(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Token::Bool(b) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(b)))
            }
            Token::None => {
                self.advance();
                Ok(Expr::Literal(Literal::None))
            }
            Token::FStr(raw) => {
                self.advance();
                self.parse_fstring(&raw)
            }
            Token::Ident(name) => {
                self.advance();
                if self.eat(&Token::LParen) {
                    let function = Builtin::from_name(&name)?;
                    let args = self.nested(|p| p.parse_call_args())?;
                    return Ok(Expr::Call { function, args });
                }
                Ok(Expr::Name(name))
            }
            Token::LParen => {
                self.advance();
                self.nested(|p| p.parse_paren())
            }
            Token::LBracket => {
                self.advance();
                self.nested(|p| p.parse_list())
            }
            _ => Err(self.unexpected()),
        }
    }

    /// After `(`: grouping, tuple, or generator
    fn parse_paren(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.parse_conditional()?;
        if self.current() == &Token::For {
            let generator = self.parse_comprehension(first)?;
            self.expect(Token::RParen)?;
            return Ok(generator);
        }
        if self.current() != &Token::Comma {
            self.expect(Token::RParen)?;
            return Ok(first);
        }
        let items = self.parse_sequence_rest(first, &Token::RParen)?;
        self.expect(Token::RParen)?;
        Ok(Expr::Tuple(items))
    }

    /// After `[`: list literal or list comprehension
    fn parse_list(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_conditional()?;
        if self.current() == &Token::For {
            let comprehension = self.parse_comprehension(first)?;
            self.expect(Token::RBracket)?;
            return Ok(comprehension);
        }
        let items = self.parse_sequence_rest(first, &Token::RBracket)?;
        self.expect(Token::RBracket)?;
        Ok(Expr::List(items))
    }

    /// Split an f-string body into literal text and interpolations
    fn parse_fstring(&mut self, raw: &str) -> Result<Expr, EvalError> {
        let segments = scan_segments(raw, 0).map_err(|e| e.kind)?;
        let mut parts = Vec::with_capacity(segments.len());

        for segment in segments {
            match segment {
                TemplateSegment::Literal(text) => parts.push(FStringPart::Literal(unescape(&text))),
                TemplateSegment::Directive { body, spec, .. } => {
                    let spec = spec.as_deref().map(FormatSpec::parse).transpose()?;
                    if let Some(directive) = SimpleDirective::match_shape(&body) {
                        parts.push(FStringPart::Simple { directive, spec });
                        continue;
                    }
                    let expr = self.nested(|p| parse_nested(&body, p.depth))?;
                    parts.push(FStringPart::Expr { expr, spec });
                }
            }
        }

        Ok(Expr::FString(parts))
    }
}

fn too_deep() -> EvalError {
    EvalError::malformed(format!("expression nested deeper than {} levels", MAX_DEPTH))
}

/// Reject names that are neither the dataset nor a comprehension target
fn check_names(expr: &Expr, scope: &mut Vec<String>) -> Result<(), EvalError> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Name(name) => {
            if scope.iter().any(|s| s == name) {
                Ok(())
            } else {
                Err(EvalError::disallowed(name.clone()))
            }
        }
        Expr::FString(parts) => {
            for part in parts {
                if let FStringPart::Expr { expr, .. } = part {
                    check_names(expr, scope)?;
                }
            }
            Ok(())
        }
        Expr::List(items) | Expr::Tuple(items) | Expr::Call { args: items, .. } => {
            items.iter().try_for_each(|item| check_names(item, scope))
        }
        Expr::Comprehension {
            element,
            targets,
            iter,
            condition,
        } => {
            check_names(iter, scope)?;
            let outer = scope.len();
            scope.extend(targets.iter().cloned());
            let result = check_names(element, scope).and_then(|_| match condition {
                Some(cond) => check_names(cond, scope),
                None => Ok(()),
            });
            scope.truncate(outer);
            result
        }
        Expr::Subscript { target, index } => {
            check_names(target, scope)?;
            check_names(index, scope)
        }
        Expr::Attribute { target, .. } => check_names(target, scope),
        Expr::MethodCall { target, args, .. } => {
            check_names(target, scope)?;
            args.iter().try_for_each(|arg| check_names(arg, scope))
        }
        Expr::Unary { operand, .. } => check_names(operand, scope),
        Expr::Binary { left, right, .. } => {
            check_names(left, scope)?;
            check_names(right, scope)
        }
        Expr::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            check_names(condition, scope)?;
            check_names(then_expr, scope)?;
            check_names(else_expr, scope)
        }
    }
}

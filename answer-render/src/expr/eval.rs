//! Tree-walking evaluator for rich directive expressions
//!
//! Frames, columns and masks are row-index views over the borrowed
//! dataset; nothing here copies or mutates rows. Numbers carry a
//! [`Provenance`] so the column classifier can pick their display rule.

use std::collections::{BTreeSet, HashSet};

use rust_decimal::{Decimal, RoundingStrategy};

use super::allow::{Attribute, BinaryOp, Builtin, Method, UnaryOp};
use super::ast::{Expr, FStringPart, Literal};
use crate::classify::{ColumnPolicy, FunctionOutput, Provenance};
use crate::combine::ArithOp;
use crate::dataset::{Dataset, Scalar};
use crate::directive::DATASET_NAME;
use crate::error::EvalError;
use crate::render::format::FormatSpec;

/// Rows returned by `head()` without an argument
const DEFAULT_HEAD: usize = 5;

/// One column restricted to a set of rows
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub column: String,
    index: Option<usize>,
    pub rows: Vec<usize>,
}

/// Boolean row selection produced by comparing a column
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    /// Rows the mask was computed over
    pub domain: Vec<usize>,
    /// Rows where the condition holds
    pub selected: BTreeSet<usize>,
}

impl Mask {
    fn keeps(&self, row: usize) -> bool {
        self.selected.contains(&row)
    }

    fn and(&self, other: &Mask) -> Mask {
        Mask {
            domain: self.domain.clone(),
            selected: self.selected.intersection(&other.selected).copied().collect(),
        }
    }

    fn or(&self, other: &Mask) -> Mask {
        let mut domain = self.domain.clone();
        domain.extend(other.domain.iter().filter(|r| !self.domain.contains(r)));
        Mask {
            domain,
            selected: self.selected.union(&other.selected).copied().collect(),
        }
    }

    fn invert(&self) -> Mask {
        Mask {
            domain: self.domain.clone(),
            selected: self
                .domain
                .iter()
                .filter(|r| !self.selected.contains(r))
                .copied()
                .collect(),
        }
    }
}

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Str(String),
    Num(Decimal, Provenance),
    /// Row indices of a (possibly filtered) dataset
    Frame(Vec<usize>),
    Series(Series),
    Mask(Mask),
    /// A single dataset row
    Row(usize),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    /// Positional accessor from `.iloc`
    Indexer(Box<Value>),
}

impl Value {
    /// A number with no column behind it
    pub fn num(n: impl Into<Decimal>) -> Self {
        Value::Num(n.into(), Provenance::default())
    }

    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "None",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Num(..) => "number",
            Value::Frame(_) => "frame",
            Value::Series(_) => "column",
            Value::Mask(_) => "mask",
            Value::Row(_) => "row",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Indexer(_) => "indexer",
        }
    }
}

/// Aggregates shared by methods and builtins
#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Sum,
    Mean,
    Min,
    Max,
}

impl Aggregate {
    fn name(self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Mean => "mean",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }
}

/// Evaluates expressions against one dataset
pub struct Evaluator<'a> {
    dataset: &'a Dataset,
    policy: &'a ColumnPolicy,
    scopes: Vec<(String, Value)>,
}

impl<'a> Evaluator<'a> {
    pub fn new(dataset: &'a Dataset, policy: &'a ColumnPolicy) -> Self {
        Self {
            dataset,
            policy,
            scopes: Vec::new(),
        }
    }

    /// Evaluate an expression
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(lit) => Ok(literal_value(lit)),
            Expr::FString(parts) => self.eval_fstring(parts),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::List(self.evaluate_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.evaluate_all(items)?)),
            Expr::Comprehension {
                element,
                targets,
                iter,
                condition,
            } => self.eval_comprehension(element, targets, iter, condition.as_deref()),
            Expr::Subscript { target, index } => {
                let target = self.evaluate(target)?;
                let index = self.evaluate(index)?;
                self.subscript(target, index)
            }
            Expr::Attribute { target, attr } => {
                let target = self.evaluate(target)?;
                attribute(target, *attr)
            }
            Expr::MethodCall {
                target,
                method,
                args,
            } => {
                let target = self.evaluate(target)?;
                let args = self.evaluate_all(args)?;
                self.call_method(target, *method, args)
            }
            Expr::Call { function, args } => {
                let args = self.evaluate_all(args)?;
                self.call_builtin(*function, args)
            }
            Expr::Unary { op, operand } => {
                let value = self.evaluate(operand)?;
                unary(*op, value)
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right),
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let condition = self.evaluate(condition)?;
                if truthy(&condition)? {
                    self.evaluate(then_expr)
                } else {
                    self.evaluate(else_expr)
                }
            }
        }
    }

    /// Render a value as text
    ///
    /// Numbers use `spec` when given, otherwise their classifier rule.
    /// Sequences are joined with `", "`.
    pub fn display(&self, value: &Value, spec: Option<&FormatSpec>) -> Result<String, EvalError> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Str(s) => Ok(s.clone()),
            Value::Num(n, provenance) => Ok(self.format_number(*n, provenance, spec)),
            Value::List(items) | Value::Tuple(items) => self.display_items(items, spec),
            Value::Series(series) => self.display_items(&self.series_items(series), spec),
            Value::Row(row) => {
                let fields = self
                    .dataset
                    .columns()
                    .iter()
                    .map(|column| {
                        let value = self.scalar_value(self.dataset.get(*row, column), column, *row);
                        Ok(format!("{}: {}", column, self.display(&value, None)?))
                    })
                    .collect::<Result<Vec<_>, EvalError>>()?;
                Ok(fields.join(", "))
            }
            Value::Frame(_) | Value::Mask(_) | Value::Indexer(_) => Err(EvalError::type_mismatch(
                format!("a {} cannot be rendered as text", value.type_name()),
            )),
        }
    }

    /// Format one number by explicit spec, classifier rule, or natural form
    pub fn format_number(&self, n: Decimal, provenance: &Provenance, spec: Option<&FormatSpec>) -> String {
        match spec
            .copied()
            .or_else(|| self.policy.display_rule(provenance).spec())
        {
            Some(spec) => spec.apply(n),
            None => n.normalize().to_string(),
        }
    }

    fn display_items(&self, items: &[Value], spec: Option<&FormatSpec>) -> Result<String, EvalError> {
        let parts = items
            .iter()
            .map(|item| self.display(item, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join(", "))
    }

    fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, EvalError> {
        exprs.iter().map(|e| self.evaluate(e)).collect()
    }

    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        if let Some((_, value)) = self.scopes.iter().rev().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        if name == DATASET_NAME {
            return Ok(Value::Frame((0..self.dataset.len()).collect()));
        }
        Err(EvalError::disallowed(name))
    }

    fn eval_fstring(&mut self, parts: &[FStringPart]) -> Result<Value, EvalError> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Expr { expr, spec } => {
                    let value = self.evaluate(expr)?;
                    out.push_str(&self.display(&value, spec.as_ref())?);
                }
                FStringPart::Simple { directive, spec } => {
                    out.push_str(&directive.evaluate(self.dataset)?.render(spec.as_ref()));
                }
            }
        }
        Ok(Value::Str(out))
    }

    fn eval_comprehension(
        &mut self,
        element: &Expr,
        targets: &[String],
        iter: &Expr,
        condition: Option<&Expr>,
    ) -> Result<Value, EvalError> {
        let source = self.evaluate(iter)?;
        let items = self.iterate(source)?;
        let mut out = Vec::with_capacity(items.len());

        for item in items {
            let bound = bind_targets(targets, item)?;
            let outer = self.scopes.len();
            self.scopes.extend(bound);
            let step = self.comprehension_step(element, condition);
            self.scopes.truncate(outer);
            if let Some(value) = step? {
                out.push(value);
            }
        }

        Ok(Value::List(out))
    }

    fn comprehension_step(
        &mut self,
        element: &Expr,
        condition: Option<&Expr>,
    ) -> Result<Option<Value>, EvalError> {
        if let Some(condition) = condition {
            let keep = self.evaluate(condition)?;
            if !truthy(&keep)? {
                return Ok(None);
            }
        }
        self.evaluate(element).map(Some)
    }

    fn eval_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<Value, EvalError> {
        let left = self.evaluate(left)?;
        match op {
            BinaryOp::And if !truthy(&left)? => return Ok(left),
            BinaryOp::Or if truthy(&left)? => return Ok(left),
            _ => {}
        }
        let right = self.evaluate(right)?;
        self.binary(left, op, right)
    }

    fn binary(&self, left: Value, op: BinaryOp, right: Value) -> Result<Value, EvalError> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(left, op, right),
            BinaryOp::BitAnd | BinaryOp::BitOr => logical(left, op, right),
            // Reached with an already-decided left side
            BinaryOp::And | BinaryOp::Or => Ok(right),
            BinaryOp::In => Ok(Value::Bool(self.contains(&right, &left)?)),
            BinaryOp::NotIn => Ok(Value::Bool(!self.contains(&right, &left)?)),
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.compare(left, op, right)
            }
        }
    }

    fn compare(&self, left: Value, op: BinaryOp, right: Value) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::Series(series), other) => self.compare_series(&series, op, &other),
            (other, Value::Series(series)) => self.compare_series(&series, flip(op), &other),
            (left, right) => Ok(Value::Bool(compare_scalars(&left, op, &right)?)),
        }
    }

    /// Elementwise comparison producing a mask; null cells only satisfy `!=`
    fn compare_series(&self, series: &Series, op: BinaryOp, other: &Value) -> Result<Value, EvalError> {
        if !is_scalar(other) {
            return Err(EvalError::type_mismatch(format!(
                "cannot compare a column {} a {}",
                op,
                other.type_name()
            )));
        }

        let mut selected = BTreeSet::new();
        for &row in &series.rows {
            let value = self.scalar_value(self.dataset.cell(row, series.index), &series.column, row);
            let holds = match value {
                Value::Null => op == BinaryOp::Ne,
                value => compare_scalars(&value, op, other)?,
            };
            if holds {
                selected.insert(row);
            }
        }

        Ok(Value::Mask(Mask {
            domain: series.rows.clone(),
            selected,
        }))
    }

    fn contains(&self, container: &Value, item: &Value) -> Result<bool, EvalError> {
        if matches!(item, Value::Series(_)) {
            return Err(EvalError::type_mismatch(
                "membership of a whole column, use .isin([...])",
            ));
        }
        match container {
            Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
            Value::Series(series) => Ok(self.series_items(series).iter().any(|v| values_equal(v, item))),
            Value::Frame(_) => Ok(match item {
                Value::Str(column) => self.dataset.columns().iter().any(|c| c == column),
                _ => false,
            }),
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
                other => Err(EvalError::type_mismatch(format!(
                    "'in <string>' needs a string, not a {}",
                    other.type_name()
                ))),
            },
            other => Err(EvalError::type_mismatch(format!(
                "a {} does not support 'in'",
                other.type_name()
            ))),
        }
    }

    fn subscript(&self, target: Value, index: Value) -> Result<Value, EvalError> {
        match (target, index) {
            (Value::Frame(rows), Value::Str(column)) => Ok(Value::Series(self.series(&column, rows)?)),
            (Value::Frame(rows), Value::Mask(mask)) => {
                Ok(Value::Frame(rows.into_iter().filter(|r| mask.keeps(*r)).collect()))
            }
            (Value::Series(mut series), Value::Mask(mask)) => {
                series.rows.retain(|r| mask.keeps(*r));
                Ok(Value::Series(series))
            }
            (Value::Row(row), Value::Str(column)) => {
                let index = self.dataset.lookup_column(&column)?;
                Ok(self.scalar_value(self.dataset.cell(row, index), &column, row))
            }
            (Value::Indexer(inner), Value::Num(n, _)) => self.positional(*inner, n),
            (Value::List(items) | Value::Tuple(items), Value::Num(n, _)) => {
                let i = position(n, items.len())?;
                Ok(items.into_iter().nth(i).unwrap_or(Value::Null))
            }
            (Value::Str(s), Value::Num(n, _)) => {
                let chars: Vec<char> = s.chars().collect();
                let i = position(n, chars.len())?;
                Ok(Value::Str(chars[i].to_string()))
            }
            (target, index) => Err(EvalError::type_mismatch(format!(
                "cannot index a {} with a {}",
                target.type_name(),
                index.type_name()
            ))),
        }
    }

    /// `.iloc[n]` on a frame or column
    fn positional(&self, target: Value, n: Decimal) -> Result<Value, EvalError> {
        match target {
            Value::Frame(rows) => {
                let i = position(n, rows.len())?;
                Ok(Value::Row(rows[i]))
            }
            Value::Series(series) => {
                let i = position(n, series.rows.len())?;
                let row = series.rows[i];
                Ok(self.scalar_value(self.dataset.cell(row, series.index), &series.column, row))
            }
            other => Err(EvalError::type_mismatch(format!(
                "cannot use .iloc on a {}",
                other.type_name()
            ))),
        }
    }

    fn call_method(&self, target: Value, method: Method, args: Vec<Value>) -> Result<Value, EvalError> {
        let name = method.name();
        match method {
            Method::Sum | Method::Mean | Method::Min | Method::Max => {
                expect_args(name, &args, 0, 0)?;
                let aggregate = match method {
                    Method::Sum => Aggregate::Sum,
                    Method::Mean => Aggregate::Mean,
                    Method::Min => Aggregate::Min,
                    _ => Aggregate::Max,
                };
                let (items, fallback) = self.aggregate_input(target, name)?;
                aggregate_values(aggregate, items, fallback)
            }
            Method::Count => match target {
                Value::Series(series) => {
                    expect_args(name, &args, 0, 0)?;
                    let present = self.series_items(&series).iter().filter(|v| **v != Value::Null).count();
                    Ok(count_value(present))
                }
                Value::List(items) | Value::Tuple(items) => {
                    expect_args(name, &args, 1, 1)?;
                    let occurrences = items.iter().filter(|v| values_equal(v, &args[0])).count();
                    Ok(count_value(occurrences))
                }
                other => Err(wrong_target(name, &other)),
            },
            Method::Unique | Method::Nunique => {
                expect_args(name, &args, 0, 0)?;
                let items = match target {
                    Value::Series(series) => self.series_items(&series),
                    Value::List(items) | Value::Tuple(items) => items,
                    other => return Err(wrong_target(name, &other)),
                };
                let distinct = distinct(items)?;
                if method == Method::Unique {
                    Ok(Value::List(distinct))
                } else {
                    Ok(count_value(distinct.len()))
                }
            }
            Method::Tolist => {
                expect_args(name, &args, 0, 0)?;
                match target {
                    Value::Series(series) => Ok(Value::List(self.series_items(&series))),
                    Value::List(items) | Value::Tuple(items) => Ok(Value::List(items)),
                    other => Err(wrong_target(name, &other)),
                }
            }
            Method::Isin => {
                expect_args(name, &args, 1, 1)?;
                let series = match target {
                    Value::Series(series) => series,
                    other => return Err(wrong_target(name, &other)),
                };
                let candidates = self.iterate(args.into_iter().next().unwrap_or(Value::Null))?;
                let selected = series
                    .rows
                    .iter()
                    .copied()
                    .filter(|&row| {
                        let value =
                            self.scalar_value(self.dataset.cell(row, series.index), &series.column, row);
                        value != Value::Null && candidates.iter().any(|c| values_equal(&value, c))
                    })
                    .collect();
                Ok(Value::Mask(Mask {
                    domain: series.rows,
                    selected,
                }))
            }
            Method::Iterrows => {
                expect_args(name, &args, 0, 0)?;
                let rows = match target {
                    Value::Frame(rows) => rows,
                    other => return Err(wrong_target(name, &other)),
                };
                Ok(Value::List(
                    rows.into_iter()
                        .map(|row| Value::Tuple(vec![Value::num(Decimal::from(row)), Value::Row(row)]))
                        .collect(),
                ))
            }
            Method::Head => {
                expect_args(name, &args, 0, 1)?;
                let n = match args.first() {
                    Some(value) => non_negative(value, name)?,
                    None => DEFAULT_HEAD,
                };
                match target {
                    Value::Frame(rows) => Ok(Value::Frame(rows.into_iter().take(n).collect())),
                    Value::Series(mut series) => {
                        series.rows.truncate(n);
                        Ok(Value::Series(series))
                    }
                    other => Err(wrong_target(name, &other)),
                }
            }
            Method::Join => {
                expect_args(name, &args, 1, 1)?;
                let separator = match target {
                    Value::Str(separator) => separator,
                    other => return Err(wrong_target(name, &other)),
                };
                let items = self.iterate(args.into_iter().next().unwrap_or(Value::Null))?;
                let parts = items
                    .into_iter()
                    .map(|item| match item {
                        Value::Str(s) => Ok(s),
                        other => Err(EvalError::type_mismatch(format!(
                            "join expects strings, found a {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Str(parts.join(separator.as_str())))
            }
            Method::Upper | Method::Lower | Method::Strip => {
                let s = match target {
                    Value::Str(s) => s,
                    other => return Err(wrong_target(name, &other)),
                };
                match method {
                    Method::Upper => {
                        expect_args(name, &args, 0, 0)?;
                        Ok(Value::Str(s.to_uppercase()))
                    }
                    Method::Lower => {
                        expect_args(name, &args, 0, 0)?;
                        Ok(Value::Str(s.to_lowercase()))
                    }
                    _ => {
                        expect_args(name, &args, 0, 1)?;
                        match args.first() {
                            None => Ok(Value::Str(s.trim().to_string())),
                            Some(Value::Str(chars)) => {
                                Ok(Value::Str(s.trim_matches(|c| chars.contains(c)).to_string()))
                            }
                            Some(other) => Err(EvalError::type_mismatch(format!(
                                "strip expects a string, found a {}",
                                other.type_name()
                            ))),
                        }
                    }
                }
            }
            Method::Get => {
                expect_args(name, &args, 1, 2)?;
                let mut args = args.into_iter();
                let key = args.next().unwrap_or(Value::Null);
                let default = args.next().unwrap_or(Value::Null);
                let Value::Str(column) = key else {
                    return Err(EvalError::type_mismatch("get expects a column name"));
                };
                let index = self.dataset.columns().iter().position(|c| *c == column);
                match (target, index) {
                    (Value::Row(row), Some(index)) => {
                        Ok(self.scalar_value(self.dataset.cell(row, Some(index)), &column, row))
                    }
                    (Value::Frame(rows), Some(index)) => Ok(Value::Series(Series {
                        column,
                        index: Some(index),
                        rows,
                    })),
                    (Value::Row(_) | Value::Frame(_), None) => Ok(default),
                    (other, _) => Err(wrong_target(name, &other)),
                }
            }
        }
    }

    fn call_builtin(&self, function: Builtin, args: Vec<Value>) -> Result<Value, EvalError> {
        let name = function.name();
        match function {
            Builtin::Len => {
                expect_args(name, &args, 1, 1)?;
                let len = match &args[0] {
                    Value::Frame(rows) => rows.len(),
                    Value::Series(series) => series.rows.len(),
                    Value::List(items) | Value::Tuple(items) => items.len(),
                    Value::Str(s) => s.chars().count(),
                    Value::Row(_) => self.dataset.columns().len(),
                    other => return Err(wrong_target(name, other)),
                };
                Ok(count_value(len))
            }
            Builtin::Sum => {
                expect_args(name, &args, 1, 1)?;
                let target = args.into_iter().next().unwrap_or(Value::Null);
                let (items, fallback) = self.aggregate_input(target, name)?;
                aggregate_values(Aggregate::Sum, items, fallback)
            }
            Builtin::Min | Builtin::Max => {
                let aggregate = if function == Builtin::Min {
                    Aggregate::Min
                } else {
                    Aggregate::Max
                };
                if args.len() > 1 {
                    return aggregate_values(aggregate, args, Provenance::default());
                }
                expect_args(name, &args, 1, 1)?;
                let target = args.into_iter().next().unwrap_or(Value::Null);
                let (items, fallback) = self.aggregate_input(target, name)?;
                aggregate_values(aggregate, items, fallback)
            }
            Builtin::Round => {
                expect_args(name, &args, 1, 2)?;
                let digits = match args.get(1) {
                    Some(value) => non_negative(value, name)?,
                    None => 0,
                };
                let digits = u32::try_from(digits)
                    .map_err(|_| EvalError::type_mismatch("round() digits out of range"))?;
                match &args[0] {
                    Value::Num(n, provenance) => Ok(Value::Num(
                        n.round_dp_with_strategy(digits, RoundingStrategy::MidpointNearestEven),
                        provenance.clone(),
                    )),
                    other => Err(wrong_target(name, other)),
                }
            }
            Builtin::Abs => {
                expect_args(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Num(n, provenance) => Ok(Value::Num(n.abs(), provenance.clone())),
                    other => Err(wrong_target(name, other)),
                }
            }
            Builtin::Int | Builtin::Float => {
                expect_args(name, &args, 1, 1)?;
                let n = match &args[0] {
                    Value::Num(n, _) => *n,
                    Value::Bool(b) => Decimal::from(u8::from(*b)),
                    Value::Str(s) => s.trim().parse::<Decimal>().map_err(|_| {
                        EvalError::type_mismatch(format!("{}() cannot parse '{}'", name, s))
                    })?,
                    other => return Err(wrong_target(name, other)),
                };
                if function == Builtin::Int {
                    Ok(Value::num(n.trunc()))
                } else {
                    Ok(Value::num(n))
                }
            }
            Builtin::Str => {
                expect_args(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Num(n, _) => Ok(Value::Str(n.normalize().to_string())),
                    other => Ok(Value::Str(self.display(other, None)?)),
                }
            }
            Builtin::Sorted => {
                expect_args(name, &args, 1, 1)?;
                let items = self.iterate(args.into_iter().next().unwrap_or(Value::Null))?;
                Ok(Value::List(sorted(items)?))
            }
            Builtin::List => {
                expect_args(name, &args, 1, 1)?;
                let items = self.iterate(args.into_iter().next().unwrap_or(Value::Null))?;
                Ok(Value::List(items))
            }
        }
    }

    /// Items and empty-input provenance for an aggregate
    fn aggregate_input(&self, target: Value, name: &str) -> Result<(Vec<Value>, Provenance), EvalError> {
        match target {
            Value::Series(series) => {
                let fallback = Provenance::column(series.column.clone(), None);
                Ok((self.series_items(&series), fallback))
            }
            Value::List(items) | Value::Tuple(items) => Ok((items, Provenance::default())),
            other => Err(wrong_target(name, &other)),
        }
    }

    /// Values a comprehension or builtin iterates over
    fn iterate(&self, value: Value) -> Result<Vec<Value>, EvalError> {
        match value {
            Value::List(items) | Value::Tuple(items) => Ok(items),
            Value::Series(series) => Ok(self.series_items(&series)),
            // Iterating a frame yields its column names
            Value::Frame(_) => Ok(self
                .dataset
                .columns()
                .iter()
                .map(|c| Value::Str(c.clone()))
                .collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(EvalError::type_mismatch(format!(
                "cannot iterate over a {}",
                other.type_name()
            ))),
        }
    }

    fn series(&self, column: &str, rows: Vec<usize>) -> Result<Series, EvalError> {
        let index = self.dataset.lookup_column(column)?;
        Ok(Series {
            column: column.to_string(),
            index,
            rows,
        })
    }

    fn series_items(&self, series: &Series) -> Vec<Value> {
        series
            .rows
            .iter()
            .map(|&row| self.scalar_value(self.dataset.cell(row, series.index), &series.column, row))
            .collect()
    }

    /// Lift a cell into a value, tagging numbers with their column and row currency
    fn scalar_value(&self, scalar: &Scalar, column: &str, row: usize) -> Value {
        match scalar {
            Scalar::Null => Value::Null,
            Scalar::String(s) => Value::Str(s.clone()),
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(_) | Scalar::Decimal(_) => {
                let n = scalar.as_decimal().unwrap_or_default();
                Value::Num(n, Provenance::column(column, self.row_currency(row)))
            }
        }
    }

    fn row_currency(&self, row: usize) -> Option<String> {
        self.dataset
            .get(row, &self.policy.currency_code_column)
            .as_str()
            .map(str::to_string)
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Num(n) => Value::num(*n),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::None => Value::Null,
    }
}

fn attribute(target: Value, attr: Attribute) -> Result<Value, EvalError> {
    match (attr, target) {
        (Attribute::Iloc, target @ (Value::Frame(_) | Value::Series(_))) => {
            Ok(Value::Indexer(Box::new(target)))
        }
        (Attribute::Empty, Value::Frame(rows)) => Ok(Value::Bool(rows.is_empty())),
        (Attribute::Empty, Value::Series(series)) => Ok(Value::Bool(series.rows.is_empty())),
        (Attribute::Empty, Value::List(items)) => Ok(Value::Bool(items.is_empty())),
        (attr, other) => Err(EvalError::type_mismatch(format!(
            "a {} has no attribute '{}'",
            other.type_name(),
            attr.name()
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Num(n, provenance)) => Ok(Value::Num(-n, provenance)),
        (UnaryOp::Pos, value @ Value::Num(..)) => Ok(value),
        (UnaryOp::Not, value) => Ok(Value::Bool(!truthy(&value)?)),
        (UnaryOp::Invert, Value::Mask(mask)) => Ok(Value::Mask(mask.invert())),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, value) => Err(EvalError::type_mismatch(format!(
            "cannot apply '{}' to a {}",
            op,
            value.type_name()
        ))),
    }
}

fn arithmetic(left: Value, op: BinaryOp, right: Value) -> Result<Value, EvalError> {
    let arith = match op {
        BinaryOp::Add => ArithOp::Add,
        BinaryOp::Sub => ArithOp::Sub,
        BinaryOp::Mul => ArithOp::Mul,
        _ => ArithOp::Div,
    };
    match (left, right) {
        // Derived numbers lose their column
        (Value::Num(a, _), Value::Num(b, _)) => Ok(Value::num(arith.apply(a, b)?)),
        (Value::Str(a), Value::Str(b)) if arith == ArithOp::Add => Ok(Value::Str(a + &b)),
        (left @ Value::Series(_), _) | (_, left @ Value::Series(_)) => Err(EvalError::type_mismatch(
            format!("'{}' on a {}, aggregate it first", op, left.type_name()),
        )),
        (left, right) => Err(EvalError::type_mismatch(format!(
            "cannot apply '{}' to a {} and a {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn logical(left: Value, op: BinaryOp, right: Value) -> Result<Value, EvalError> {
    let both = op == BinaryOp::BitAnd;
    match (left, right) {
        (Value::Mask(a), Value::Mask(b)) => Ok(Value::Mask(if both { a.and(&b) } else { a.or(&b) })),
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if both { a && b } else { a || b })),
        (left, right) => Err(EvalError::type_mismatch(format!(
            "cannot apply '{}' to a {} and a {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn truthy(value: &Value) -> Result<bool, EvalError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Num(n, _) => Ok(!n.is_zero()),
        Value::Str(s) => Ok(!s.is_empty()),
        Value::List(items) | Value::Tuple(items) => Ok(!items.is_empty()),
        Value::Row(_) | Value::Indexer(_) => Ok(true),
        Value::Frame(_) | Value::Series(_) | Value::Mask(_) => Err(EvalError::type_mismatch(format!(
            "the truth value of a {} is ambiguous, use & | ~ or an aggregate",
            value.type_name()
        ))),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Str(_) | Value::Num(..)
    )
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Num(a, _), Value::Num(b, _)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Row(a), Value::Row(b)) => a == b,
        (Value::List(a) | Value::Tuple(a), Value::List(b) | Value::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        // Different types are not equal
        _ => false,
    }
}

fn compare_scalars(left: &Value, op: BinaryOp, right: &Value) -> Result<bool, EvalError> {
    let ordering = match op {
        BinaryOp::Eq => return Ok(values_equal(left, right)),
        BinaryOp::Ne => return Ok(!values_equal(left, right)),
        _ => match (left, right) {
            (Value::Num(a, _), Value::Num(b, _)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => {
                return Err(EvalError::type_mismatch(format!(
                    "cannot compare a {} {} a {}",
                    left.type_name(),
                    op,
                    right.type_name()
                )));
            }
        },
    };
    Ok(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => false,
    })
}

/// Mirror a comparison so the column can sit on the left
fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

fn bind_targets(targets: &[String], item: Value) -> Result<Vec<(String, Value)>, EvalError> {
    if let [single] = targets {
        return Ok(vec![(single.clone(), item)]);
    }
    let parts = match item {
        Value::Tuple(parts) | Value::List(parts) => parts,
        other => {
            return Err(EvalError::type_mismatch(format!(
                "cannot unpack a {} into {} names",
                other.type_name(),
                targets.len()
            )));
        }
    };
    if parts.len() != targets.len() {
        return Err(EvalError::type_mismatch(format!(
            "cannot unpack {} values into {} names",
            parts.len(),
            targets.len()
        )));
    }
    Ok(targets.iter().cloned().zip(parts).collect())
}

fn aggregate_values(
    aggregate: Aggregate,
    items: Vec<Value>,
    fallback: Provenance,
) -> Result<Value, EvalError> {
    let present: Vec<Value> = items.into_iter().filter(|v| *v != Value::Null).collect();

    match aggregate {
        Aggregate::Sum | Aggregate::Mean => {
            let numbers = numeric(&present, aggregate.name())?;
            let provenance = merge_provenance(numbers.iter().map(|(_, p)| *p)).unwrap_or(fallback);
            let total = numbers
                .iter()
                .try_fold(Decimal::ZERO, |acc, (n, _)| ArithOp::Add.apply(acc, *n))?;

            if let Aggregate::Sum = aggregate {
                return Ok(Value::Num(total, provenance));
            }
            if numbers.is_empty() {
                return Err(EvalError::arithmetic("mean of an empty selection"));
            }
            let mean = ArithOp::Div.apply(total, Decimal::from(numbers.len()))?;
            Ok(Value::Num(mean, provenance.with_function(FunctionOutput::Mean)))
        }
        Aggregate::Min | Aggregate::Max => {
            if present.is_empty() {
                return Err(EvalError::arithmetic(format!(
                    "{} of an empty selection",
                    aggregate.name()
                )));
            }
            let mut best: Option<Value> = None;
            for value in present {
                let replace = match &best {
                    None => true,
                    Some(current) => {
                        let op = match aggregate {
                            Aggregate::Min => BinaryOp::Lt,
                            _ => BinaryOp::Gt,
                        };
                        compare_scalars(&value, op, current)?
                    }
                };
                if replace {
                    best = Some(value);
                }
            }
            Ok(best.unwrap_or(Value::Null))
        }
    }
}

fn numeric<'v>(values: &'v [Value], name: &str) -> Result<Vec<(Decimal, &'v Provenance)>, EvalError> {
    values
        .iter()
        .map(|value| match value {
            Value::Num(n, provenance) => Ok((*n, provenance)),
            other => Err(EvalError::type_mismatch(format!(
                "{} over a {} value",
                name,
                other.type_name()
            ))),
        })
        .collect()
}

/// Common provenance of aggregated numbers
///
/// Keeps the column when all numbers share it, and the currency when all
/// contributing rows agree on one.
fn merge_provenance<'p>(mut provenances: impl Iterator<Item = &'p Provenance>) -> Option<Provenance> {
    let first = provenances.next()?;
    let mut merged = Provenance {
        column: first.column.clone(),
        function: FunctionOutput::Value,
        currency: first.currency.clone(),
    };
    for p in provenances {
        if p.column != merged.column {
            return Some(Provenance::default());
        }
        if p.currency != merged.currency {
            merged.currency = None;
        }
    }
    Some(merged)
}

fn count_value(n: usize) -> Value {
    Value::Num(Decimal::from(n), Provenance::function(FunctionOutput::Count))
}

/// Distinct non-null values in first-appearance order
fn distinct(items: Vec<Value>) -> Result<Vec<Value>, EvalError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let key = match &item {
            Value::Null => continue,
            Value::Num(n, _) => format!("n:{}", n.normalize()),
            Value::Str(s) => format!("s:{}", s),
            Value::Bool(b) => format!("b:{}", b),
            other => {
                return Err(EvalError::type_mismatch(format!(
                    "cannot take distinct values of a {}",
                    other.type_name()
                )));
            }
        };
        if seen.insert(key) {
            out.push(item);
        }
    }
    Ok(out)
}

fn sorted(mut items: Vec<Value>) -> Result<Vec<Value>, EvalError> {
    let all_numbers = items.iter().all(|v| matches!(v, Value::Num(..)));
    let all_strings = items.iter().all(|v| matches!(v, Value::Str(_)));
    if !all_numbers && !all_strings {
        return Err(EvalError::type_mismatch("sorted() needs all numbers or all strings"));
    }
    items.sort_by(|a, b| match (a, b) {
        (Value::Num(x, _), Value::Num(y, _)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    });
    Ok(items)
}

/// Resolve an index, negative counts from the end
fn position(n: Decimal, len: usize) -> Result<usize, EvalError> {
    let index = integer(n).ok_or_else(|| {
        EvalError::type_mismatch(format!("index must be an integer, got {}", n.normalize()))
    })?;
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { len_i + index } else { index };
    if resolved < 0 || resolved >= len_i {
        return Err(EvalError::type_mismatch(format!(
            "position {} out of range for {} items",
            index, len
        )));
    }
    usize::try_from(resolved)
        .map_err(|_| EvalError::type_mismatch(format!("position {} out of range", index)))
}

fn non_negative(value: &Value, name: &str) -> Result<usize, EvalError> {
    match value {
        Value::Num(n, _) => integer(*n)
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| {
                EvalError::type_mismatch(format!(
                    "{}() expects a non-negative integer, got {}",
                    name,
                    n.normalize()
                ))
            }),
        other => Err(EvalError::type_mismatch(format!(
            "{}() expects an integer, got a {}",
            name,
            other.type_name()
        ))),
    }
}

fn integer(n: Decimal) -> Option<i64> {
    if n.fract().is_zero() {
        i64::try_from(n).ok()
    } else {
        None
    }
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{} to {}", min, max)
    };
    Err(EvalError::type_mismatch(format!(
        "{}() takes {} argument(s), got {}",
        name,
        expected,
        args.len()
    )))
}

fn wrong_target(name: &str, target: &Value) -> EvalError {
    EvalError::type_mismatch(format!("{}() is not supported on a {}", name, target.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse_expression;
    use serde_json::json;

    fn accounts() -> Dataset {
        Dataset::from_json(&json!([
            {"acct_no": "A001", "curr_cd": "KRW", "bal": 1000000, "intr_rate": 1.25},
            {"acct_no": "A002", "curr_cd": "USD", "bal": 1000, "intr_rate": 2.5},
            {"acct_no": "A003", "curr_cd": "JPY", "bal": 100000, "intr_rate": null},
            {"acct_no": "A004", "curr_cd": "KRW", "bal": 2000000, "intr_rate": 0.75}
        ]))
        .unwrap()
    }

    fn eval(source: &str, data: &Dataset) -> Result<Value, EvalError> {
        let expr = parse_expression(source)?;
        let policy = ColumnPolicy::default();
        Evaluator::new(data, &policy).evaluate(&expr)
    }

    fn render(source: &str, spec: Option<&str>, data: &Dataset) -> Result<String, EvalError> {
        let expr = parse_expression(source)?;
        let policy = ColumnPolicy::default();
        let mut evaluator = Evaluator::new(data, &policy);
        let value = evaluator.evaluate(&expr)?;
        let spec = spec.map(FormatSpec::parse).transpose()?;
        evaluator.display(&value, spec.as_ref())
    }

    #[test]
    fn test_filtered_sum() {
        let data = accounts();
        assert_eq!(
            render("df[df['curr_cd'] == 'KRW']['bal'].sum()", Some(",.0f"), &data).unwrap(),
            "3,000,000"
        );
    }

    #[test]
    fn test_per_currency_join_in_first_appearance_order() {
        let data = accounts();
        let out = render(
            r#"'\n'.join([f"- {c}: {df[df['curr_cd'] == c]['bal'].sum():,.2f}" for c in df['curr_cd'].unique()])"#,
            None,
            &data,
        )
        .unwrap();
        assert_eq!(out, "- KRW: 3,000,000.00\n- USD: 1,000.00\n- JPY: 100,000.00");
    }

    #[test]
    fn test_currency_decides_default_format() {
        let data = accounts();
        // Single currency among contributing rows
        assert_eq!(
            render("df[df['curr_cd'] == 'USD']['bal'].sum()", None, &data).unwrap(),
            "1,000.00"
        );
        assert_eq!(
            render("df[df['curr_cd'] == 'KRW']['bal'].sum()", None, &data).unwrap(),
            "3,000,000"
        );
        // Mixed currencies fall back to an integer
        assert_eq!(render("df['bal'].sum()", None, &data).unwrap(), "3,101,000");
        // Rate columns keep two decimals, means always do
        assert_eq!(render("df['intr_rate'].max()", None, &data).unwrap(), "2.50");
        assert_eq!(render("df['bal'].mean()", None, &data).unwrap(), "775,250.00");
        assert_eq!(render("len(df)", None, &data).unwrap(), "4");
    }

    #[test]
    fn test_derived_numbers_are_natural() {
        let data = accounts();
        assert_eq!(
            render("df['bal'].sum() / 4", None, &data).unwrap(),
            "775250"
        );
        assert_eq!(render("1.50 + 1", None, &data).unwrap(), "2.5");
    }

    #[test]
    fn test_mask_combinators() {
        let data = accounts();
        let count = |src: &str| render(src, None, &data).unwrap();
        assert_eq!(
            count("len(df[(df['curr_cd'] == 'KRW') & (df['bal'] > 1000000)])"),
            "1"
        );
        assert_eq!(
            count("len(df[(df['curr_cd'] == 'USD') | (df['curr_cd'] == 'JPY')])"),
            "2"
        );
        assert_eq!(count("len(df[~(df['curr_cd'] == 'KRW')])"), "2");
        assert_eq!(count("len(df[df['curr_cd'].isin(['USD', 'JPY'])])"), "2");
        assert_eq!(count("df[df['bal'] >= 100000]['acct_no'].count()"), "3");
        // Null cells never match an ordering comparison
        assert_eq!(count("len(df[df['intr_rate'] < 5])"), "3");
        assert_eq!(count("len(df[df['intr_rate'] != 1.25])"), "3");
    }

    #[test]
    fn test_scalar_on_left_of_column_comparison() {
        let data = accounts();
        assert_eq!(render("len(df[100000 < df['bal']])", None, &data).unwrap(), "2");
    }

    #[test]
    fn test_iterrows_and_positional_rows() {
        let data = accounts();
        assert_eq!(
            render(
                "', '.join([row['acct_no'] for _, row in df.iterrows() if row['curr_cd'] == 'KRW'])",
                None,
                &data
            )
            .unwrap(),
            "A001, A004"
        );
        assert_eq!(render("df.iloc[0]['acct_no']", None, &data).unwrap(), "A001");
        assert_eq!(render("df.iloc[-1]['bal']", None, &data).unwrap(), "2,000,000");
        assert_eq!(render("df['acct_no'].iloc[1]", None, &data).unwrap(), "A002");
        assert!(matches!(
            eval("df.iloc[10]", &data),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_conditional_and_builtins() {
        let data = accounts();
        assert_eq!(
            render("'many' if len(df) > 1 else 'one'", None, &data).unwrap(),
            "many"
        );
        assert_eq!(
            render("sorted(df['curr_cd'].unique())", None, &data).unwrap(),
            "JPY, KRW, USD"
        );
        assert_eq!(render("df['curr_cd'].nunique()", None, &data).unwrap(), "3");
        assert_eq!(render("round(2.675, 2)", None, &data).unwrap(), "2.68");
        assert_eq!(render("round(2.5)", None, &data).unwrap(), "2");
        assert_eq!(render("abs(-3)", None, &data).unwrap(), "3");
        assert_eq!(render("int('42') + 1", None, &data).unwrap(), "43");
        assert_eq!(render("str(df['bal'].sum())", None, &data).unwrap(), "3101000");
        assert_eq!(render("max(1, 7, 3)", None, &data).unwrap(), "7");
        assert_eq!(render("min(df['acct_no'])", None, &data).unwrap(), "A001");
        assert_eq!(render("sum(x for x in [1, 2, 3])", None, &data).unwrap(), "6");
        assert_eq!(render("len(df.head(2))", None, &data).unwrap(), "2");
        assert_eq!(render("'bal' in df", None, &data).unwrap(), "true");
        assert_eq!(render("'EUR' not in df['curr_cd']", None, &data).unwrap(), "true");
        assert_eq!(render("' krw '.strip().upper()", None, &data).unwrap(), "KRW");
    }

    #[test]
    fn test_row_get_with_default() {
        let data = accounts();
        assert_eq!(
            render("df.iloc[0].get('memo', 'n/a')", None, &data).unwrap(),
            "n/a"
        );
        assert_eq!(render("df.iloc[0].get('curr_cd')", None, &data).unwrap(), "KRW");
    }

    #[test]
    fn test_empty_selection() {
        let data = accounts();
        let empty = "df[df['curr_cd'] == 'EUR']['bal']";
        assert_eq!(render(&format!("{}.sum()", empty), None, &data).unwrap(), "0");
        assert_eq!(render(&format!("{}.count()", empty), None, &data).unwrap(), "0");
        assert_eq!(render(&format!("{}.unique()", empty), None, &data).unwrap(), "");
        for agg in ["mean", "min", "max"] {
            assert!(matches!(
                eval(&format!("{}.{}()", empty, agg), &data),
                Err(EvalError::ArithmeticError(_))
            ));
        }
        assert_eq!(render("df[df['curr_cd'] == 'EUR'].empty", None, &data).unwrap(), "true");
    }

    #[test]
    fn test_errors() {
        let data = accounts();
        assert_eq!(
            eval("df['nonexistent'].sum()", &data),
            Err(EvalError::UnknownColumn("nonexistent".to_string()))
        );
        assert!(matches!(eval("1 / 0", &data), Err(EvalError::ArithmeticError(_))));
        assert!(matches!(
            eval("df['acct_no'].sum()", &data),
            Err(EvalError::TypeMismatch(_))
        ));
        assert!(matches!(
            eval("'yes' if df['bal'] else 'no'", &data),
            Err(EvalError::TypeMismatch(_))
        ));
        assert!(matches!(eval("df['bal'] + 1", &data), Err(EvalError::TypeMismatch(_))));
        assert!(matches!(eval("', '.join([1, 2])", &data), Err(EvalError::TypeMismatch(_))));
        assert!(matches!(eval("df.iterrows(1)", &data), Err(EvalError::TypeMismatch(_))));
        assert!(matches!(
            render("df[df['bal'] > 0]", None, &data),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_out_of_range_number_is_not_summed_silently() {
        let data = Dataset::from_json(&json!([{"x": 1e300}, {"x": 5}])).unwrap();
        assert!(matches!(eval("df['x'].sum()", &data), Err(EvalError::TypeMismatch(_))));
        assert_eq!(render("len(df['x'])", None, &data).unwrap(), "2");
    }

    #[test]
    fn test_dataset_without_columns() {
        let data = Dataset::new();
        assert_eq!(render("df['bal'].sum()", None, &data).unwrap(), "0");
        assert_eq!(render("len(df)", None, &data).unwrap(), "0");
    }

    #[test]
    fn test_row_display() {
        let data = Dataset::from_json(&json!([{"acct_no": "A001", "bal": 1500}])).unwrap();
        assert_eq!(
            render("df.iloc[0]", None, &data).unwrap(),
            "acct_no: A001, bal: 1,500"
        );
    }
}

//! Template rendering
//!
//! Scans a template for directives, routes each one by shape and splices
//! the results back into the literal text. Any directive failure aborts the
//! whole render; no partial output is returned.

pub mod format;
pub mod scanner;

pub use format::FormatSpec;
pub use scanner::{TemplateSegment, scan_template};

use crate::classify::{ColumnPolicy, DEFAULT_POLICY};
use crate::dataset::Dataset;
use crate::directive::SimpleDirective;
use crate::error::{EvalError, RenderError};
use crate::expr::render_expression;

/// Renders templates under one classification policy
#[derive(Debug, Clone, Copy)]
pub struct Renderer<'p> {
    policy: &'p ColumnPolicy,
}

impl<'p> Renderer<'p> {
    pub fn new(policy: &'p ColumnPolicy) -> Self {
        Self { policy }
    }

    /// Render a template against a dataset
    pub fn render(&self, template: &str, dataset: &Dataset) -> Result<String, RenderError> {
        let segments = scan_template(template)?;
        let mut out = String::with_capacity(template.len());

        for segment in segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(&text),
                TemplateSegment::Directive {
                    body,
                    spec,
                    position,
                } => {
                    let text = self
                        .render_directive(&body, spec.as_deref(), dataset)
                        .map_err(|kind| RenderError::new(position, body.as_str(), kind))?;
                    out.push_str(&text);
                }
            }
        }

        Ok(out)
    }

    /// Evaluate one directive body with its optional raw specifier
    pub fn render_directive(
        &self,
        body: &str,
        spec: Option<&str>,
        dataset: &Dataset,
    ) -> Result<String, EvalError> {
        let spec = spec.map(FormatSpec::parse).transpose()?;

        if let Some(simple) = SimpleDirective::match_shape(body) {
            log::debug!("Directive `{}` routed to simple resolver", body.trim());
            return Ok(simple.evaluate(dataset)?.render(spec.as_ref()));
        }

        log::debug!("Directive `{}` routed to expression evaluator", body.trim());
        render_expression(body, spec.as_ref(), dataset, self.policy)
    }
}

/// Render with the built-in classification policy
pub fn render_template(template: &str, dataset: &Dataset) -> Result<String, RenderError> {
    Renderer::new(&DEFAULT_POLICY).render(template, dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accounts() -> Dataset {
        Dataset::from_json(&json!([
            {"acct_no": "A001", "curr_cd": "KRW", "bal": 1000000},
            {"acct_no": "A002", "curr_cd": "USD", "bal": 1000},
            {"acct_no": "A003", "curr_cd": "JPY", "bal": 100000},
            {"acct_no": "A004", "curr_cd": "KRW", "bal": 2000000}
        ]))
        .unwrap()
    }

    #[test]
    fn test_account_count() {
        let out = render_template("총 계좌 수는 {count(acct_no)}개입니다.", &accounts()).unwrap();
        assert_eq!(out, "총 계좌 수는 4개입니다.");
    }

    #[test]
    fn test_filtered_balance_with_spec() {
        let out = render_template(
            "KRW 계좌 잔액은 {df[df['curr_cd'] == 'KRW']['bal'].sum():,.0f}원입니다.",
            &accounts(),
        )
        .unwrap();
        assert_eq!(out, "KRW 계좌 잔액은 3,000,000원입니다.");
    }

    #[test]
    fn test_per_currency_listing() {
        let template = r#"{'\n'.join([f"- {c}: {df[df['curr_cd'] == c]['bal'].sum():,.2f}" for c in df['curr_cd'].unique()])}"#;
        let out = render_template(template, &accounts()).unwrap();
        assert_eq!(out, "- KRW: 3,000,000.00\n- USD: 1,000.00\n- JPY: 100,000.00");
    }

    #[test]
    fn test_unknown_column_aborts_render() {
        let err = render_template("Total {sum(nonexistent)} won", &accounts()).unwrap_err();
        assert_eq!(err.kind, EvalError::UnknownColumn("nonexistent".to_string()));
        assert_eq!(err.position, 6);
        assert_eq!(err.directive, "sum(nonexistent)");
    }

    #[test]
    fn test_no_directives_round_trip() {
        let data = accounts();
        for template in ["", "plain text", "줄바꿈\n\t공백  유지", "{{escaped}}"] {
            let once = render_template(template, &data).unwrap();
            if !template.contains('{') {
                assert_eq!(once, template);
            }
            // Output without directive syntax renders to itself
            if !once.contains('{') {
                assert_eq!(render_template(&once, &data).unwrap(), once);
            }
        }
    }

    #[test]
    fn test_fstring_wrapper_artifact() {
        let out = render_template(r#"f"{count(acct_no)}개""#, &accounts()).unwrap();
        assert_eq!(out, "4개");
    }

    #[test]
    fn test_simple_functions() {
        let data = accounts();
        assert_eq!(render_template("{sum(bal)}", &data).unwrap(), "3,101,000");
        assert_eq!(render_template("{average(bal)}", &data).unwrap(), "775,250.00");
        assert_eq!(render_template("{unique(curr_cd)}", &data).unwrap(), "JPY, KRW, USD");
        assert_eq!(render_template("{sum(bal):,.2f}", &data).unwrap(), "3,101,000.00");
        assert_eq!(
            render_template("{median(bal)}", &data).unwrap_err().kind,
            EvalError::UnknownFunction("median".to_string())
        );
    }

    #[test]
    fn test_empty_dataset_defaults() {
        let empty = Dataset::new();
        assert_eq!(render_template("{count(acct_no)}", &empty).unwrap(), "0");
        assert_eq!(render_template("{sum(bal)}", &empty).unwrap(), "0");
        assert_eq!(render_template("{unique(curr_cd)}", &empty).unwrap(), "");
        assert!(matches!(
            render_template("{average(bal)}", &empty).unwrap_err().kind,
            EvalError::ArithmeticError(_)
        ));
        assert!(matches!(
            render_template("{df[df['curr_cd'] == 'EUR']['bal'].mean()}", &accounts())
                .unwrap_err()
                .kind,
            EvalError::ArithmeticError(_)
        ));
    }

    #[test]
    fn test_rejections_carry_position() {
        let data = accounts();
        let err = render_template("ok {__import__('os').system('ls')}", &data).unwrap_err();
        assert_eq!(err.position, 3);
        assert_eq!(err.kind, EvalError::DisallowedOperation("__import__".to_string()));

        let err = render_template("{df.to_csv('x')}", &data).unwrap_err();
        assert_eq!(err.kind, EvalError::DisallowedOperation("to_csv".to_string()));

        let err = render_template("{count(acct_no):,.x}", &data).unwrap_err();
        assert!(matches!(err.kind, EvalError::MalformedTemplate(_)));

        let err = render_template("{df['bal'].sum()", &data).unwrap_err();
        assert!(matches!(err.kind, EvalError::MalformedTemplate(_)));
    }

    #[test]
    fn test_fstring_inside_comprehension_is_sandboxed() {
        let data = accounts();
        let template = r#"{'\n'.join([f"{df.to_csv()}" for c in df['curr_cd'].unique()])}"#;
        let err = render_template(template, &data).unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.kind, EvalError::DisallowedOperation("to_csv".to_string()));
    }

    #[test]
    fn test_simple_functions_inside_fstring() {
        let data = accounts();
        assert_eq!(
            render_template(r#"{', '.join([f"{count(acct_no)}" for c in ['x']])}"#, &data).unwrap(),
            "4"
        );
        assert_eq!(
            render_template(
                r#"{', '.join([f"{c}: {count(acct_no):,.2f}" for c in ['a', 'b']])}"#,
                &data
            )
            .unwrap(),
            "a: 4.00, b: 4.00"
        );
        assert_eq!(
            render_template(r#"{', '.join([f"{median(bal)}" for c in ['x']])}"#, &data)
                .unwrap_err()
                .kind,
            EvalError::UnknownFunction("median".to_string())
        );
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let data = accounts();
        let template = format!("total {{{}}}", vec!["df['bal'].sum()"; 1000].join(" + "));
        let err = render_template(&template, &data).unwrap_err();
        assert_eq!(err.position, 6);
        assert!(matches!(err.kind, EvalError::MalformedTemplate(_)));

        let short = format!("{{{}}}", vec!["df['bal'].sum()"; 3].join(" + "));
        assert_eq!(render_template(&short, &data).unwrap(), "9303000");
    }

    #[test]
    fn test_policy_changes_default_format() {
        let data = accounts();
        let template = "{df[df['curr_cd'] == 'USD']['bal'].sum()}";
        assert_eq!(render_template(template, &data).unwrap(), "1,000.00");

        let policy = ColumnPolicy {
            local_currency: "USD".to_string(),
            ..ColumnPolicy::default()
        };
        assert_eq!(Renderer::new(&policy).render(template, &data).unwrap(), "1,000");
    }

    #[test]
    fn test_spec_ignored_for_text() {
        let data = accounts();
        assert_eq!(
            render_template("{df.iloc[0]['acct_no']:,.2f}", &data).unwrap(),
            "A001"
        );
    }
}

//! `combine` command handler

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use rust_decimal::Decimal;

use crate::combine::combine;

#[derive(Args, Debug)]
pub struct CombineCommands {
    /// Flat arithmetic expression over operand names, e.g. "inflow - outflow"
    pub expression: String,

    /// Operand value as NAME=VALUE (repeatable)
    #[arg(short, long = "operand", value_name = "NAME=VALUE")]
    pub operands: Vec<String>,

    /// Print the operands used before the result
    #[arg(long)]
    pub explain: bool,
}

/// Handle the combine command
pub fn handle_combine_command(args: CombineCommands) -> Result<()> {
    let operands = parse_operands(&args.operands)?;

    if args.explain {
        let mut names: Vec<_> = operands.keys().collect();
        names.sort();
        for name in names {
            println!("{} = {}", name.cyan(), operands[name]);
        }
        println!();
    }

    let result = combine(&args.expression, &operands)
        .with_context(|| format!("Failed to combine '{}'", args.expression))?;
    println!("{}", result.normalize());
    Ok(())
}

/// Parse `NAME=VALUE` pairs into an operand map
fn parse_operands(pairs: &[String]) -> Result<HashMap<String, Decimal>> {
    let mut operands = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            anyhow::bail!("Operand must be NAME=VALUE, got '{}'", pair);
        };
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Operand name is empty in '{}'", pair);
        }
        let value: Decimal = value
            .trim()
            .replace(',', "")
            .parse()
            .with_context(|| format!("Operand '{}' is not a number: '{}'", name, value.trim()))?;
        if operands.insert(name.to_string(), value).is_some() {
            log::warn!("Operand '{}' given more than once, keeping the last value", name);
        }
    }
    Ok(operands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_operands() {
        let operands = parse_operands(&pairs(&["A=1,000,000", "B = 500000.50"])).unwrap();
        assert_eq!(operands["A"], Decimal::from(1_000_000));
        assert_eq!(operands["B"], "500000.50".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_parse_operands_rejects_bad_pairs() {
        assert!(parse_operands(&pairs(&["A"])).is_err());
        assert!(parse_operands(&pairs(&["=5"])).is_err());
        assert!(parse_operands(&pairs(&["A=abc"])).is_err());
    }

    #[test]
    fn test_duplicate_operand_keeps_last() {
        let operands = parse_operands(&pairs(&["A=1", "A=2"])).unwrap();
        assert_eq!(operands["A"], Decimal::from(2));
    }
}

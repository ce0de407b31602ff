//! `render` command handler

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::*;

use crate::config::Config;
use crate::dataset::Dataset;
use crate::render::Renderer;

#[derive(Args, Debug)]
pub struct RenderCommands {
    /// Template text
    #[arg(short, long, conflicts_with = "template_file")]
    pub template: Option<String>,

    /// Read the template from a file
    #[arg(long, value_name = "PATH")]
    pub template_file: Option<PathBuf>,

    /// JSON dataset: an array of rows or grouped `{key, data}` entries
    #[arg(short, long, value_name = "PATH")]
    pub data: PathBuf,

    /// Print the directives found in the template before rendering
    #[arg(long)]
    pub show_directives: bool,
}

/// Handle the render command
pub fn handle_render_command(args: RenderCommands, config: &Config) -> Result<()> {
    let template = read_template(&args)?;
    let dataset = load_dataset(&args.data)?;
    log::info!(
        "Loaded {} rows with {} columns from {}",
        dataset.len(),
        dataset.columns().len(),
        args.data.display()
    );

    if args.show_directives {
        print_directives(&template)?;
    }

    let renderer = Renderer::new(&config.classification);
    let rendered = renderer
        .render(&template, &dataset)
        .context("Failed to render template")?;

    println!("{}", rendered);
    Ok(())
}

fn read_template(args: &RenderCommands) -> Result<String> {
    if let Some(template) = &args.template {
        return Ok(template.clone());
    }

    let Some(path) = &args.template_file else {
        anyhow::bail!("Either provide --template or use --template-file to specify a template file");
    };
    if !path.exists() {
        anyhow::bail!("Template file does not exist: {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read template file: {}", path.display()))?;
    // Editors add a trailing newline the template never meant
    Ok(content.strip_suffix('\n').unwrap_or(&content).to_string())
}

/// Load a dataset from a JSON file
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file: {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Data file is not valid JSON: {}", path.display()))?;
    Dataset::from_json(&json).with_context(|| format!("Data file is not tabular: {}", path.display()))
}

fn print_directives(template: &str) -> Result<()> {
    let segments = crate::render::scan_template(template).context("Failed to scan template")?;
    for segment in segments {
        if let crate::render::TemplateSegment::Directive {
            body,
            spec,
            position,
        } = segment
        {
            match spec {
                Some(spec) => println!(
                    "{} {} {}",
                    format!("@{}", position).dimmed(),
                    body.cyan(),
                    format!(":{}", spec).yellow()
                ),
                None => println!("{} {}", format!("@{}", position).dimmed(), body.cyan()),
            }
        }
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_dataset_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"acct_no": "A001", "bal": 10}}, {{"acct_no": "A002", "bal": 20}}]"#
        )
        .unwrap();

        let dataset = load_dataset(file.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.columns(), ["acct_no", "bal"]);
    }

    #[test]
    fn test_load_dataset_rejects_scalar_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "42").unwrap();
        assert!(load_dataset(file.path()).is_err());
    }

    #[test]
    fn test_template_file_trailing_newline_dropped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "총 {{count(acct_no)}}개").unwrap();
        let args = RenderCommands {
            template: None,
            template_file: Some(file.path().to_path_buf()),
            data: PathBuf::from("unused.json"),
            show_directives: false,
        };
        assert_eq!(read_template(&args).unwrap(), "총 {count(acct_no)}개");
    }
}

//! DS-012: CLI subcommands: init, validate, compile, render.

use crate::core::{assembler, codegen, parser, registry::Registry};
use clap::{Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new dagsmith project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate dagsmith.yaml without compiling it
    Validate {
        /// Path to dagsmith.yaml
        #[arg(short, long, default_value = "dagsmith.yaml")]
        file: PathBuf,
    },

    /// Compile the pipeline and print the graph
    Compile {
        /// Path to dagsmith.yaml
        #[arg(short, long, default_value = "dagsmith.yaml")]
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = GraphFormat::Json)]
        format: GraphFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render the pipeline as an Airflow DAG module
    Render {
        /// Path to dagsmith.yaml
        #[arg(short, long, default_value = "dagsmith.yaml")]
        file: PathBuf,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Json,
    Yaml,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Compile {
            file,
            format,
            output,
        } => cmd_compile(&file, format, output.as_deref()),
        Commands::Render { file, output } => cmd_render(&file, output.as_deref()),
    }
}

const TEMPLATE: &str = r#"version: "1.0"
name: my-pipeline
description: "Compiled by dagsmith"

dag:
  schedule_interval: "@daily"
  start_date: "2024-01-01"

transforms: {}

stages:
  - kind: data_sources
    layers:
      - data/train.csv: { read_csv: ~ }
  - kind: feature_engineering
    layers:
      - age: { normalize_values: ~ }
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("dagsmith.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized dagsmith project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file).map_err(|e| e.to_string())?;
    let registry = Registry::from_config(&config);
    let errors = parser::validate_config(&config, registry.router());

    if errors.is_empty() {
        let layers: usize = config.stages.iter().map(|s| s.layers.len()).sum();
        println!(
            "OK: {} ({} stages, {} layers)",
            config.name,
            config.stages.len(),
            layers
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_compile(file: &Path, format: GraphFormat, output: Option<&Path>) -> Result<(), String> {
    let config = load_valid(file)?;
    let graph = assembler::compile(&config).map_err(|e| e.to_string())?;
    let text = match format {
        GraphFormat::Json => codegen::render_json(&graph),
        GraphFormat::Yaml => codegen::render_yaml(&graph),
    }
    .map_err(|e| e.to_string())?;
    emit(&text, output)
}

fn cmd_render(file: &Path, output: Option<&Path>) -> Result<(), String> {
    let config = load_valid(file)?;
    let graph = assembler::compile(&config).map_err(|e| e.to_string())?;
    let text = codegen::render_airflow(&graph, &config.dag).map_err(|e| e.to_string())?;
    emit(&text, output)
}

fn load_valid(file: &Path) -> Result<crate::core::types::PipelineConfig, String> {
    let config = parser::parse_config_file(file).map_err(|e| e.to_string())?;
    let registry = Registry::from_config(&config);
    let errors = parser::validate_config(&config, registry.router());
    if let Some(first) = errors.first() {
        return Err(format!("{} ({} validation error(s))", first, errors.len()));
    }
    Ok(config)
}

fn emit(text: &str, output: Option<&Path>) -> Result<(), String> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! `broker config show|validate|generate` — configuration management,
//! grounded on the teacher's `cli/src/commands/config.rs`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use broker_core::domain::config::Config;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Also print the discovery paths checked
        #[arg(long)]
        paths: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Write a default configuration file
    Generate {
        #[arg(short, long, default_value = "./montage-broker.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = Config::load_or_default(config_override.clone()).context("failed to load configuration")?;

    if show_paths {
        println!("{}", "configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!("  2. MONTAGE_CONFIG_PATH: {}", std::env::var("MONTAGE_CONFIG_PATH").unwrap_or_else(|_| "(not set)".to_string()).dimmed());
        println!("  3. ./montage-broker.yaml");
        println!("  4. ~/.montage-broker/config.yaml");
        println!();
    }

    println!("{}", "effective configuration:".bold());
    println!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("validating configuration...");
    let config = Config::load_or_default(config_path).context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;
    println!("{}", "✓ configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    let config = Config::default();
    config.to_yaml_file(&output).with_context(|| format!("failed to write config to {output:?}"))?;
    println!("{}", format!("✓ configuration generated: {}", output.display()).green());
    Ok(())
}

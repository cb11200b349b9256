//! # wasmlab CLI
//!
//! ## サブコマンド
//! - `build`: バンドラ出力のインポートパス書き換えとモジュール配置
//! - `inspect`: ローダー経由でモジュールを取得し、検証済みのエクスポートを表示
//! - `contracts`: 実効のエクスポート契約を表示

mod cli;
mod config;

use std::sync::Arc;

use clap::Parser;
use wasmlab_loader::{FileSource, HttpSource, ModuleLoader, ModuleSource};
use wasmlab_rewrite::BuildPipeline;
use wasmlab_types::ModuleIdentity;

use cli::{Cli, Commands, CommonArgs};
use config::Config;

fn config_for(common: &CommonArgs, preload_helpers: Vec<String>) -> Config {
    Config::from_env().with_overrides(
        common.modules_root.clone(),
        common.contracts.clone(),
        preload_helpers,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            pkg_dir,
            out_dir,
            preload_helpers,
            common,
        } => {
            let config = config_for(&common, preload_helpers);
            let registry = Arc::new(config.load_registry()?);
            let report = BuildPipeline::new(pkg_dir, out_dir, registry)
                .with_layout(config.layout()?)
                .with_helpers(config.preload_helpers.clone())?
                .run()?;
            println!("{}", report.manifest.to_json()?);
        }

        Commands::Inspect {
            identity,
            dir,
            url,
            common,
        } => {
            let config = config_for(&common, Vec::new());
            let identity = ModuleIdentity::new(identity)?;
            let registry = Arc::new(config.load_registry()?);
            let source: Arc<dyn ModuleSource> = match (dir, url) {
                (Some(dir), _) => Arc::new(FileSource::new(dir, config.layout()?)),
                (None, Some(url)) => Arc::new(HttpSource::new(url, config.layout()?)),
                (None, None) => anyhow::bail!("--dir または --url を指定してください"),
            };

            let loader = ModuleLoader::new(registry, source);
            let handle = loader.acquire(&identity).await?;
            let output = serde_json::json!({
                "module": handle.identity(),
                "validated": handle.is_validated(),
                "exports": handle.surface(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Contracts { common } => {
            let config = config_for(&common, Vec::new());
            let registry = config.load_registry()?;
            println!("{}", serde_json::to_string_pretty(&registry.to_document())?);
        }
    }

    Ok(())
}

// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Asyncify CLI
//!
//! Inspect the host catalog, classify media files and run guest modules.

use anyhow::{Context, Result};
use asyncify_host::{
    Catalog, GuestInvoker, HostConfig, HostContext, HostInstance, MediaClassifier,
    MetricsSnapshot, WasmHost,
};
use asyncify_imaging::{info_fields, register_all, ImageLibrary};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "asyncify")]
#[command(about = "Asyncify - capability host for sandboxed WASM guests", long_about = None)]
struct Cli {
    /// Host configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the capabilities guests can call
    Catalog,

    /// Classify a media file the way argument validation sees it
    Inspect {
        /// File to classify
        file: PathBuf,
    },

    /// Run a guest module with one encoded request
    Run {
        /// Guest module (.wasm or .wat)
        module: PathBuf,

        /// File holding the request passed to the guest's `call` export
        #[arg(long)]
        input: PathBuf,

        /// Where to write the guest's output (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait for pending callbacks before teardown
        #[arg(long, default_value = "30")]
        wait: u64,
    },
}

#[derive(Debug, Serialize)]
struct CapabilityInfo {
    id: String,
    name: String,
    description: String,
    arguments: Vec<ArgumentInfo>,
}

#[derive(Debug, Serialize)]
struct ArgumentInfo {
    name: String,
    kind: &'static str,
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(cli.config.as_deref())?;
    let library = Arc::new(ImageLibrary::new());

    match cli.command {
        Commands::Catalog => {
            let catalog = build_catalog(&library)?;
            let capabilities = describe_catalog(&catalog);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&capabilities)?);
            } else {
                println!("Capabilities ({}):", capabilities.len());
                println!("{:-<60}", "");
                for capability in &capabilities {
                    println!("{} ({})", capability.id, capability.name);
                    if !capability.description.is_empty() {
                        println!("    {}", capability.description);
                    }
                    for arg in &capability.arguments {
                        let marker = if arg.required { "*" } else { " " };
                        println!("    {} {}: {}", marker, arg.name, arg.kind);
                    }
                    println!();
                }
            }
        }

        Commands::Inspect { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let media = library
                .classify(&bytes)
                .with_context(|| format!("Failed to classify {}", file.display()))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&media)?);
            } else {
                for field in info_fields(&media).fields {
                    println!("{:<12} {}", field.r#type, field.value);
                }
            }
        }

        Commands::Run {
            module,
            input,
            output,
            wait,
        } => {
            let request = std::fs::read(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let (reply, metrics) =
                run_guest(&config, library, &module, request, Duration::from_secs(wait)).await?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &reply)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote {} bytes to {}", reply.len(), path.display());
                }
                None => std::io::stdout().write_all(&reply)?,
            }

            if cli.json {
                eprintln!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                info!(
                    calls = metrics.calls,
                    rejected = metrics.rejected,
                    pending = metrics.pending,
                    delivered = metrics.delivered,
                    cancelled = metrics.cancelled,
                    "Guest finished"
                );
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    match path {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(HostConfig::default()),
    }
}

fn build_catalog(library: &Arc<ImageLibrary>) -> Result<Arc<Catalog>> {
    let catalog = Arc::new(Catalog::new());
    register_all(&catalog, Arc::clone(library)).context("Failed to register capabilities")?;
    Ok(catalog)
}

fn describe_catalog(catalog: &Catalog) -> Vec<CapabilityInfo> {
    catalog
        .entries()
        .into_iter()
        .filter_map(|entry| {
            let capability = catalog.get(&entry.id)?;
            let arguments = capability
                .descriptor()
                .schema
                .arguments()
                .iter()
                .map(|arg| ArgumentInfo {
                    name: arg.name.clone(),
                    kind: arg.validator.kind.name(),
                    required: arg.validator.required,
                    description: arg.description.clone(),
                })
                .collect();
            Some(CapabilityInfo {
                id: entry.id,
                name: entry.name,
                description: entry.desc,
                arguments,
            })
        })
        .collect()
}

/// Launch a guest, enter it once and tear it down after its callbacks drain.
async fn run_guest(
    config: &HostConfig,
    library: Arc<ImageLibrary>,
    module: &Path,
    request: Vec<u8>,
    wait: Duration,
) -> Result<(Vec<u8>, MetricsSnapshot)> {
    let catalog = build_catalog(&library)?;
    let host = WasmHost::new(config)?;
    let context = HostContext {
        catalog,
        classifier: library,
        runtime: tokio::runtime::Handle::current(),
    };

    let instance = HostInstance::launch(config, context, |dispatcher| {
        Ok(Box::new(host.load_file(module, dispatcher)?) as Box<dyn GuestInvoker>)
    })
    .with_context(|| format!("Failed to load guest {}", module.display()))?;

    let result = instance.call_async(request).await;

    // Joining the guest thread blocks
    tokio::task::block_in_place(|| {
        if result.is_ok() && !instance.wait_idle(wait) {
            warn!(
                pending = instance.table().pending_count(),
                "Guest still has pending futures, cancelling"
            );
        }
        instance.teardown();
    });

    let reply = result.context("Guest call failed")?;
    Ok((reply, instance.metrics()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncify_host::wire;

    const CATALOG_GUEST: &str = r#"
        (module
          (import "asyncify" "invoke" (func $invoke (param i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (func (export "allocate") (param $len i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $heap))
            (global.set $heap (i32.add (global.get $heap) (local.get $len)))
            (local.get $ptr))
          (func (export "call") (param $in i32) (param $len i32) (param $out i32)
            (drop (call $invoke (local.get $out) (local.get $in) (local.get $len))))
          (func (export "callback") (param i32 i32 i32 i32 i32 i32)))
    "#;

    #[test]
    fn test_describe_catalog() {
        let catalog = build_catalog(&Arc::new(ImageLibrary::new())).unwrap();
        let capabilities = describe_catalog(&catalog);
        assert_eq!(capabilities.len(), 4);

        let compress = capabilities
            .iter()
            .find(|c| c.id == "image.compress")
            .unwrap();
        let kinds: Vec<_> = compress.arguments.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, ["Media", "String", "Int", "Int"]);
        assert!(compress.arguments[0].required);

        let json = serde_json::to_value(&capabilities).unwrap();
        assert_eq!(json[0]["id"], "image.compress");
        assert_eq!(json[0]["arguments"][1]["kind"], "String");
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "inline_threshold = 64\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.inline_threshold, 64);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_guest_lists_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("guest.wat");
        std::fs::write(&module, CATALOG_GUEST).unwrap();

        let request = wire::encode(&wire::Call {
            id: "catalog.list".into(),
            args: vec![],
            future: None,
        });
        let (output, metrics) = run_guest(
            &HostConfig::default(),
            Arc::new(ImageLibrary::new()),
            &module,
            request,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let reply: wire::Reply = wire::decode(&output).unwrap();
        assert!(matches!(reply.result, Some(wire::reply::Result::Value(_))));
        assert_eq!(metrics.calls, 1);
        assert_eq!(metrics.completed, 1);
    }
}

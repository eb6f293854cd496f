use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use warctap::archive::reader::parse_records;
use warctap::configuration::config::Config;
use warctap::data_capture::pipeline::CapturePipeline;
use warctap::network::forward_handler::ForwardHandler;
use warctap::network::proxy_listener::ProxyListener;
use warctap::storage::file_storage::FileStorage;

#[derive(Parser)]
#[command(name = "warctap")]
#[command(version = "0.1.0")]
#[command(about = "A capturing TCP/HTTP proxy that archives every connection as WARC")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy with settings from a TOML file
    Run { config_file: PathBuf },
    /// Run the proxy with settings given as flags
    Serve(Config),
    /// Print a summary of the records in a stored archive
    Inspect {
        warc_file: PathBuf,
        /// Emit one JSON object per record instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run { config_file } => {
            info!("Importing configuration from {}", config_file.display());
            let config = Config::from_file(&config_file).unwrap_or_else(|e| {
                error!("Unable to import configuration from file: {}", e);
                std::process::exit(1);
            });
            serve(config).await;
        }
        Command::Serve(config) => {
            if let Err(e) = config.validate() {
                error!("Invalid configuration: {}", e);
                std::process::exit(1);
            }
            serve(config).await;
        }
        Command::Inspect { warc_file, json } => inspect(&warc_file, json),
    }
}

async fn serve(config: Config) {
    println!(
        "
==============================================================================
                 warctap v0.1.0 - capturing proxy to WARC
==============================================================================
"
    );

    let storage = FileStorage::new(&config.storage_path).unwrap_or_else(|e| {
        error!("Unable to open archive storage: {}", e);
        std::process::exit(1);
    });

    let bind_addr = config.bind_addr().unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });
    let listener = ProxyListener::bind(
        bind_addr,
        config.upstream_address.clone(),
        config.sniff_timeout(),
    )
    .await
    .unwrap_or_else(|e| {
        error!("Unable to start listener: {}", e);
        std::process::exit(1);
    });
    let local = listener.local_addr().unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });

    let source_identity = config
        .source_identity
        .clone()
        .unwrap_or_else(|| local.ip().to_string());
    let pipeline = CapturePipeline::builder()
        .storage(Arc::new(storage))
        .source_identity(source_identity)
        .max_capture_bytes(config.max_capture_bytes)
        .drain_timeout(config.drain_timeout())
        .handler_timeout(config.connection_timeout())
        .build()
        .unwrap_or_else(|e| {
            error!("Unable to create the capture pipeline: {}, exiting...", e);
            std::process::exit(1);
        });
    let pipeline = Arc::new(pipeline);
    let handler = Arc::new(ForwardHandler::new(config.upstream_address.clone()));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for ctrl-c: {}; running until killed", e);
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = listener
        .serve(
            Arc::clone(&pipeline),
            handler,
            shutdown,
            config.shutdown_grace(),
        )
        .await
    {
        error!("Listener stopped: {}", e);
    }

    let report = pipeline.shutdown(config.shutdown_grace()).await;
    info!(
        "Stopped; {} archive(s) stored, {} failed, {} abandoned",
        report.stored, report.failed, report.abandoned
    );
}

fn inspect(path: &Path, json: bool) {
    let raw = std::fs::read(path).unwrap_or_else(|e| {
        error!("Unable to read {}: {}", path.display(), e);
        std::process::exit(1);
    });
    let records = parse_records(&raw).unwrap_or_else(|e| {
        error!("{} is not a valid archive: {}", path.display(), e);
        std::process::exit(1);
    });

    if json {
        for record in &records {
            match serde_json::to_string(&record.summary()) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Unable to serialize record summary: {}", e),
            }
        }
        return;
    }

    println!("{}: {} record(s)", path.display(), records.len());
    for record in &records {
        let summary = record.summary();
        println!(
            "  {:<9} {} {} {:>8} bytes {}",
            summary.warc_type.as_deref().unwrap_or("?"),
            summary.record_id.as_deref().unwrap_or("-"),
            summary.date.as_deref().unwrap_or("-"),
            summary.content_length,
            summary.target_uri.as_deref().unwrap_or(""),
        );
    }
}

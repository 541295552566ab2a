// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bsread_recorder::config::{apply_env_overrides, ConfigLoader, LoggingConfig};
use bsread_recorder::relay::load_channels;
use bsread_recorder::stream::{open_session, StreamConnector, ZenohConnector, ZenohSink};
use bsread_recorder::{
    dispatcher, load_config_with_env, ControlInterface, EngineFactory, RecorderConfig,
    RecorderManager, RecorderSettings, RelayService, Termination,
};

/// Beam-synchronous stream relay and windowed recorder
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay a stream through a bounded buffer
    Relay {
        /// File with one channel name per line
        #[arg(long)]
        channels_file: PathBuf,

        /// Relay buffer capacity (overrides config file)
        #[arg(long)]
        capacity: Option<usize>,

        /// Key expression the relayed stream is published on
        #[arg(long)]
        output: Option<String>,

        /// Log absent channels of every message
        #[arg(long)]
        analyze: bool,
    },

    /// Record a window of a stream, controlled over REST
    Writer {
        /// Key expression of the input stream
        #[arg(long)]
        stream: Option<String>,

        /// Output directory for the recording
        #[arg(long)]
        output: Option<String>,

        /// Host the REST interface binds to
        #[arg(long)]
        rest_host: Option<String>,

        /// Port of the REST interface
        #[arg(long)]
        rest_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let code = match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let mut config = load(args.config.as_deref())?;

    match &args.command {
        Command::Relay {
            capacity,
            output,
            analyze,
            ..
        } => {
            if let Some(capacity) = capacity {
                config.relay.capacity = *capacity;
            }
            if let Some(output) = output {
                config.relay.output_key_expr = output.clone();
            }
            config.relay.analyze |= *analyze;
        }
        Command::Writer {
            stream,
            output,
            rest_host,
            rest_port,
        } => {
            if let Some(stream) = stream {
                config.stream.key_expr = stream.clone();
            }
            if let Some(output) = output {
                config.storage.filesystem.base_path = output.clone();
            }
            if let Some(host) = rest_host {
                config.writer.rest.host = host.clone();
            }
            if let Some(port) = rest_port {
                config.writer.rest.port = *port;
            }
        }
    }
    ConfigLoader::validate(&config)?;

    init_tracing(&config.logging)?;
    if let Some(path) = &args.config {
        info!("Loaded configuration from: {:?}", path);
    }

    match args.command {
        Command::Relay { channels_file, .. } => run_relay(config, &channels_file).await,
        Command::Writer { .. } => run_writer(config).await,
    }
}

fn load(path: Option<&Path>) -> Result<RecorderConfig> {
    match path {
        Some(path) => load_config_with_env(path),
        None => {
            let mut config = RecorderConfig::default();
            apply_env_overrides(&mut config);
            ConfigLoader::validate(&config)?;
            Ok(config)
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}

async fn run_relay(config: RecorderConfig, channels_file: &Path) -> Result<i32> {
    let channels = load_channels(channels_file)?;
    info!("Relaying {} channels from {:?}", channels.len(), channels_file);

    let dispatcher = dispatcher::from_config(&config)?;
    let key_expr = dispatcher.request_stream(&channels).await?;

    let session = open_session(&config.zenoh).await?;
    let connector = ZenohConnector::new(session.clone(), key_expr);
    let source = connector.connect().await?;
    let sink = ZenohSink::declare(&session, config.relay.output_key_expr.clone()).await?;

    let service = RelayService::new(&config.relay, config.stream.receive_timeout())?;

    let code = tokio::select! {
        result = service.run(source, Box::new(sink)) => match result {
            Ok(()) => 0,
            Err(e) => {
                error!("Relay failed: {:#}", e);
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            service.stop();
            0
        }
    };

    if let Err(e) = session.close().await {
        warn!("Failed to close Zenoh session: {}", e);
    }
    Ok(code)
}

async fn run_writer(config: RecorderConfig) -> Result<i32> {
    info!("Starting writer on stream '{}'", config.stream.key_expr);
    info!("Storage backend: {}", config.storage.backend);

    let session = open_session(&config.zenoh).await?;
    let connector = Arc::new(ZenohConnector::new(
        session.clone(),
        config.stream.key_expr.clone(),
    ));

    let engine = EngineFactory::create(&config.storage)?;
    info!("Storage engine created: {}", engine.backend_type());

    let (terminator, mut terminations) = mpsc::unbounded_channel();
    let recorder_manager = Arc::new(RecorderManager::new(
        connector,
        engine,
        RecorderSettings::from_config(&config),
        terminator,
    ));

    let control_interface = ControlInterface::new(
        recorder_manager.clone(),
        config.writer.rest.host.clone(),
        config.writer.rest.port,
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(control_interface.run(async {
        let _ = shutdown_rx.await;
    }));

    let termination = tokio::select! {
        Some(termination) = terminations.recv() => termination,
        result = &mut server => {
            match result {
                Ok(Ok(())) => error!("Control interface stopped unexpectedly"),
                Ok(Err(e)) => error!("Control interface failed: {:#}", e),
                Err(e) => error!("Control interface panicked: {}", e),
            }
            recorder_manager.shutdown().await;
            Termination::Fatal
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            recorder_manager.shutdown().await;
            Termination::Stopped
        }
    };

    info!("Writer terminating: {:?}", termination);

    // Let the reply to the terminating request go out
    let _ = shutdown_tx.send(());
    if !server.is_finished()
        && tokio::time::timeout(Duration::from_secs(2), &mut server)
            .await
            .is_err()
    {
        warn!("Control interface did not shut down in time");
    }

    if let Err(e) = session.close().await {
        warn!("Failed to close Zenoh session: {}", e);
    }
    Ok(termination.exit_code())
}

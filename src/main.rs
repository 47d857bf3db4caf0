//! voicegate - text-to-speech gateway CLI
//!
//! A single binary providing:
//! - `serve` - Run the HTTP server (default)
//! - `synthesize` - Run one synthesis locally and print the result
//! - `refs` - List, add, remove and rename reference audio
//!
//! Usage:
//!   voicegate serve --port 8000 --engine-program ./engine.sh
//!   voicegate synthesize --text "hello" --reference voice1.wav --format wav
//!   voicegate refs list

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use voicegate::{
    cli_style::{
        format_audio_info, print_error, print_info, print_reference_list,
        print_server_startup, print_success, print_warning,
    },
    config::{
        init_tracing, load_dotenv, Cli, Commands, RefsArgs, RefsCommand, ServeArgs,
        SynthesizeArgs,
    },
    references::ReferenceLibrary,
    server::{self, AppState},
};

/// Main entry point with subcommand dispatch
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_level());

    let serve_args = cli.serve_args();
    match cli.command {
        Some(Commands::Synthesize(args)) => run_synthesize(args).await,
        Some(Commands::Refs(args)) => run_refs(args).await,
        Some(Commands::Serve(_)) | None => run_server(serve_args).await,
    }
}

/// Run the HTTP server
async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting voicegate server");

    let pipeline = args
        .pipeline
        .build_pipeline()
        .context("failed to prepare output directory")?;

    let ffmpeg = pipeline.transcoder().ffmpeg_available();
    if !ffmpeg {
        warn!(ffmpeg = %args.pipeline.ffmpeg, "ffmpeg not found, mp3 output will fall back to wav");
    }
    match pipeline.references().list() {
        Ok(clips) => info!(
            count = clips.len(),
            dir = %args.pipeline.reference_dir.display(),
            "reference library loaded"
        ),
        Err(e) => warn!(error = %e, "could not read reference library"),
    }

    if !args.quiet {
        print_server_startup(
            &args.host,
            args.port,
            pipeline.gate().engine_name(),
            pipeline.gate().capacity(),
            ffmpeg,
        );
    }

    let state = AppState::new(pipeline);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => {
            info!(address = %addr, "server bound to address");
            l
        }
        Err(e) => {
            error!(address = %addr, error = %e, "failed to bind to address");
            return Err(e.into());
        }
    };

    info!("server ready - accepting connections");
    if let Err(e) = server::serve_with_shutdown(listener, state, shutdown_signal()).await {
        error!(error = %e, "server error");
        return Err(e.into());
    }

    info!("server exited cleanly");
    Ok(())
}

/// Run one request through the pipeline and print the result as JSON
async fn run_synthesize(args: SynthesizeArgs) -> anyhow::Result<()> {
    let pipeline = args
        .pipeline
        .build_pipeline()
        .context("failed to prepare output directory")?;
    let request = args.to_request();

    let result = match pipeline.handle(&request).await {
        Ok(result) => result,
        Err(e) => {
            print_error(&e.to_string());
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(url) = &result.audio_url {
        let name = url.trim_start_matches("/audio/");
        let path = pipeline.store().output_dir().join(name);
        print_success(&format!("audio written to {}", path.display()));
    }
    for warning in &result.warnings {
        print_warning(warning);
    }
    if !result.success {
        anyhow::bail!("{}", result.message);
    }
    Ok(())
}

/// Manage the reference audio library
async fn run_refs(args: RefsArgs) -> anyhow::Result<()> {
    let library = ReferenceLibrary::new(&args.reference_dir);
    tokio::task::spawn_blocking(move || refs_command(&library, args.action)).await?
}

fn refs_command(library: &ReferenceLibrary, action: RefsCommand) -> anyhow::Result<()> {
    match action {
        RefsCommand::List => {
            let clips = library.list()?;
            let details: Vec<_> = clips
                .iter()
                .map(|clip| library.inspect(&clip.filename).ok())
                .collect();
            print_reference_list(&clips, &details);
        }
        RefsCommand::Add {
            source,
            name,
            force,
        } => {
            let path = library.add(&source, name.as_deref(), force)?;
            let stored = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            print_success(&format!("added reference audio {stored}"));
            match library.inspect(&stored) {
                Ok(info) => print_info(&format_audio_info(&info)),
                Err(e) => print_warning(&e.to_string()),
            }
        }
        RefsCommand::Remove { name } => {
            library.remove(&name)?;
            print_success(&format!("removed {name}"));
        }
        RefsCommand::Rename { old, new } => {
            library.rename(&old, &new)?;
            print_success(&format!("renamed {old} -> {new}"));
        }
    }
    Ok(())
}

/// Create a future that resolves on shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}

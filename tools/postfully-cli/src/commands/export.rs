//! Export a story video.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use postfully_common::config::AppConfig;
use postfully_project_model::artifact::ExportArtifact;
use postfully_project_model::export::ExportFormat;
use postfully_render_engine::{
    DriverSettings, ExportDriver, ExportOutcome, ExportProgress, ExportRequest, FormatSinkFactory,
};

use crate::RenderArgs;

pub async fn run(
    app: &AppConfig,
    args: RenderArgs,
    format: Option<ExportFormat>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = args.export_config(app, format)?;
    let output_dir = output.unwrap_or_else(|| app.output_dir.clone());
    std::fs::create_dir_all(&output_dir)?;

    println!("Exporting {} story", args.background.label());
    println!("  Output dir: {}", output_dir.display());
    println!("  Format: {}", config.format.extension());
    println!("  Resolution: {}x{} @ {} fps", config.width, config.height, config.frame_rate);
    if args.overlay.is_none() && !args.no_overlay {
        println!("  Note: no --overlay card given, exporting background only");
    }

    let target_dir = output_dir.clone();
    let mut request = ExportRequest::new(
        config,
        args.background,
        args.providers(app),
        Arc::new(FormatSinkFactory),
        Box::new(move |artifact: ExportArtifact| {
            let path = target_dir.join(&artifact.file_name);
            std::fs::write(&path, &artifact.bytes)?;
            tracing::info!(path = %path.display(), bytes = artifact.len(), "Artifact written");
            Ok(())
        }),
    )
    .with_progress(Box::new(print_progress));
    if let Some(capture) = args.overlay_capture() {
        request = request.with_overlay(capture, args.placement());
    }

    let driver = ExportDriver::new(DriverSettings::from(&app.export));
    let handle = driver.begin_export(request).await?;

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut states = handle.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::debug!(%state, "Export state changed");
            if state.is_terminal() {
                break;
            }
        }
    });

    match handle.wait().await {
        Ok(ExportOutcome::Completed(summary)) => {
            println!(
                "\nExport complete: {} ({} frames, {} bytes)",
                output_dir.join(&summary.file_name).display(),
                summary.frames,
                summary.byte_len
            );
            Ok(())
        }
        Ok(ExportOutcome::Cancelled) => {
            println!("\nExport cancelled; nothing was written.");
            Ok(())
        }
        Err(e) => {
            println!("\nExport failed: {e}");
            Err(e.into())
        }
    }
}

fn print_progress(p: ExportProgress) {
    let eta = match p.eta_secs {
        Some(secs) => format!("{secs:.0}s"),
        None => "--".to_string(),
    };
    print!(
        "\r  Progress: {:.1}% ({}/{} frames, ETA: {eta})  ",
        p.fraction() * 100.0,
        p.frames_done,
        p.frames_total,
    );
    std::io::stdout().flush().ok();
}

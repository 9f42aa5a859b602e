//! Render a single frame (or the bare overlay card) to PNG.

use std::path::PathBuf;
use std::time::Duration;

use postfully_common::config::AppConfig;
use postfully_render_engine::overlay::capture_snapshot;
use postfully_render_engine::{acquire_background, export_overlay_png, export_still};

use crate::RenderArgs;

pub async fn run(
    app: &AppConfig,
    args: RenderArgs,
    at: f64,
    overlay_only: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let snapshot = match args.overlay_capture() {
        Some(capture) if !args.no_overlay || overlay_only => {
            Some(capture_snapshot(capture.as_ref(), args.placement()).await?)
        }
        _ => None,
    };

    if overlay_only {
        let snapshot = snapshot
            .ok_or_else(|| anyhow::anyhow!("--overlay-only needs an --overlay card"))?;
        let artifact = export_overlay_png(&snapshot)?;
        let path = output.unwrap_or_else(|| app.output_dir.join(&artifact.file_name));
        write_png(&path, &artifact.bytes)?;
        println!("Overlay written: {}", path.display());
        return Ok(());
    }

    let config = args.export_config(app, None)?;
    let mut source = acquire_background(
        &args.providers(app),
        args.background,
        config.width,
        config.height,
        Duration::from_millis(app.export.acquire_timeout_ms),
    )
    .await?;

    let rendered = export_still(source.as_mut(), snapshot.as_ref(), at, &config).await;
    if let Err(e) = source.close().await {
        tracing::warn!(error = %e, "Failed to close background source");
    }
    let png = rendered?;

    let path = output.unwrap_or_else(|| {
        app.output_dir.join(format!(
            "reddit-story-{}-{:.2}s.png",
            args.background.slug(),
            at
        ))
    });
    write_png(&path, &png)?;
    println!("Frame at {at:.2}s written: {}", path.display());
    Ok(())
}

fn write_png(path: &std::path::Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

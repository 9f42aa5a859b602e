//! Subcommand implementations and the setup they share.

use std::sync::Arc;

use postfully_common::config::AppConfig;
use postfully_project_model::export::{ExportConfig, ExportFormat};
use postfully_project_model::overlay::OverlayPlacement;
use postfully_render_engine::background::{ClipProvider, ProceduralProvider};
use postfully_render_engine::{BackgroundProvider, OverlayCapture, PngOverlay};

use crate::RenderArgs;

pub mod check;
pub mod config;
pub mod export;
pub mod still;

impl RenderArgs {
    /// Build the run configuration, filling gaps from the app config.
    pub fn export_config(
        &self,
        app: &AppConfig,
        format: Option<ExportFormat>,
    ) -> anyhow::Result<ExportConfig> {
        let format = match format {
            Some(format) => format,
            None => app.export.format.parse().map_err(|e| {
                anyhow::anyhow!("Invalid format {:?} in config: {e}", app.export.format)
            })?,
        };

        Ok(ExportConfig {
            total_duration_secs: self.duration,
            overlay_start_secs: self.start,
            overlay_visible_secs: self.visible,
            exit_animation: self.exit,
            show_overlay: !self.no_overlay,
            disappear_after_time: !self.persist,
            frame_rate: app.export.frame_rate,
            width: self.width.unwrap_or(app.export.width),
            height: self.height.unwrap_or(app.export.height),
            format,
        })
    }

    /// Background providers in priority order.
    pub fn providers(&self, app: &AppConfig) -> Vec<Arc<dyn BackgroundProvider>> {
        let procedural: Arc<dyn BackgroundProvider> = Arc::new(ProceduralProvider {
            loop_secs: self.loop_secs,
            seed: self.seed,
        });
        if self.procedural {
            vec![procedural]
        } else {
            let clip: Arc<dyn BackgroundProvider> = Arc::new(ClipProvider::new(&app.backgrounds_dir));
            vec![clip, procedural]
        }
    }

    pub fn overlay_capture(&self) -> Option<Arc<dyn OverlayCapture>> {
        let path = self.overlay.as_ref()?;
        let capture: Arc<dyn OverlayCapture> = Arc::new(PngOverlay::new(path));
        Some(capture)
    }

    pub fn placement(&self) -> OverlayPlacement {
        OverlayPlacement::new(self.offset_x, self.offset_y, self.scale)
    }
}

//! Check encoders and background clips.

use std::io::Read as _;

use postfully_common::config::{config_file_path, AppConfig};
use postfully_project_model::export::BackgroundKind;
use postfully_render_engine::background::ClipProvider;
use postfully_render_engine::media_tools::{command_exists, is_lfs_pointer};

pub fn run(app: &AppConfig) -> anyhow::Result<()> {
    println!("Postfully System Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config: {}", path.display());
    } else {
        println!("[INFO] Config: {} (not found, using defaults)", path.display());
    }

    let ffmpeg = command_exists("ffmpeg");
    let ffprobe = command_exists("ffprobe");
    report(ffmpeg, "ffmpeg", "needed for WebM/MP4 export and clip decoding");
    report(ffprobe, "ffprobe", "needed to read clip durations");

    println!();
    println!("Background clips in {}:", app.backgrounds_dir.display());
    let clips = ClipProvider::new(&app.backgrounds_dir);
    let mut usable = 0;
    for kind in BackgroundKind::ALL {
        let clip = clips.clip_path(kind);
        if !clip.exists() {
            println!("[WARN] {}: missing {}", kind.label(), clip.display());
            continue;
        }
        let mut head = [0u8; 64];
        let n = std::fs::File::open(&clip).and_then(|mut f| f.read(&mut head))?;
        if is_lfs_pointer(&head[..n]) {
            println!(
                "[WARN] {}: {} is a Git LFS pointer (run `git lfs pull`)",
                kind.label(),
                clip.display()
            );
        } else {
            println!("[OK] {}: {}", kind.label(), clip.display());
            usable += 1;
        }
    }

    println!();
    if !ffmpeg {
        println!("Only Y4M export is available. Install ffmpeg for WebM/MP4.");
    } else if usable < BackgroundKind::ALL.len() || !ffprobe {
        println!("Exports will fall back to generated backgrounds where clips are unusable.");
    } else {
        println!("All encoders and background clips are available. Postfully is ready.");
    }

    Ok(())
}

fn report(available: bool, name: &str, purpose: &str) {
    if available {
        println!("[OK] {name} found on PATH");
    } else {
        println!("[MISSING] {name}: {purpose}");
    }
}

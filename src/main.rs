mod capture;
mod config;
mod dashboard;
mod display;
mod frame_loop;
mod gesture;
mod logging;
mod model_download;
mod osc;
mod pipeline;
mod render;
mod types;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;

use config::{DEFAULT_SETTINGS_PATH, Settings};
use dashboard::{DashboardState, spawn_dashboard_server};
use display::PreviewWindow;
use frame_loop::{FrameLoop, LoopSettings};
use osc::OscEmitter;
use pipeline::{CameraSource, HandLandmarker, LandmarkerConfig, available_cameras};
use render::{OverlayRenderer, RenderOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML). Missing file means built-in defaults.
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Camera index, overriding the settings file
    #[arg(long)]
    camera: Option<u32>,

    /// List available cameras and exit
    #[arg(long)]
    list_cameras: bool,

    /// Do not start the HTTP dashboard
    #[arg(long)]
    no_dashboard: bool,

    /// Do not send OSC messages
    #[arg(long)]
    no_osc: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(index) = self.camera {
            settings.camera_index = index;
        }
        if self.no_dashboard {
            settings.dashboard.enabled = false;
        }
        if self.no_osc {
            settings.osc.enabled = false;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load(&args.config)?;
    args.apply(&mut settings);
    logging::init(&settings.logs_dir)?;

    if args.config.exists() {
        log::info!("settings loaded from {}", args.config.display());
    } else {
        log::info!("{} not found, using defaults", args.config.display());
    }

    if args.list_cameras {
        for device in available_cameras()? {
            println!("{}: {}", device.index, device.label);
        }
        return Ok(());
    }

    let dashboard = Arc::new(DashboardState::new());
    if settings.dashboard.enabled {
        if let Err(err) = spawn_dashboard_server(
            Arc::clone(&dashboard),
            &settings.dashboard.host,
            settings.dashboard.port,
        ) {
            log::warn!("dashboard disabled: {err:#}");
        }
    }

    let camera = match CameraSource::open(settings.camera_index, settings.width, settings.height)
    {
        Ok(camera) => camera,
        Err(err) => {
            log::error!(
                "{err:#}. On macOS, grant camera access to the terminal in System Settings > Privacy & Security > Camera."
            );
            return Ok(());
        }
    };

    let landmarker = HandLandmarker::new(LandmarkerConfig::from_settings(&settings))
        .context("failed to prepare hand landmark models")?;

    let mut frame_loop = FrameLoop::new(
        camera,
        landmarker,
        PreviewWindow::new(settings.window_title.clone()),
        OverlayRenderer::new(RenderOptions::from_settings(&settings)),
        dashboard,
        LoopSettings::from_settings(&settings),
    );

    if settings.osc.enabled {
        match OscEmitter::new(
            &settings.osc.host,
            settings.osc.port,
            settings.osc.send_landmarks,
            settings.osc.fps_interval(),
        ) {
            Ok(osc) => frame_loop = frame_loop.with_osc(osc),
            Err(err) => log::warn!("OSC disabled: {err:#}"),
        }
    }

    frame_loop.run()?;
    Ok(())
}

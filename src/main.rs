//! Rawcam-pipe binary: stream raw camera frames to stdout.

use clap::Parser;
use rawcam_pipe::output::stdout_sink;
use rawcam_pipe::shutdown::install_handler;
use rawcam_pipe::{
    list_devices, Args, Camera, CameraError, CaptureConfig, CaptureLoop, ShutdownFlag, V4L2Device,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> rawcam_pipe::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list {
        report_devices();
        return Ok(());
    }

    let config = CaptureConfig::try_from(&args)?;
    let mut sink = stdout_sink()?;

    let shutdown = ShutdownFlag::new();
    install_handler(shutdown.clone())?;

    let devices = list_devices();
    if devices.is_empty() {
        return Err(CameraError::DeviceUnavailable(config.camera_index()));
    }
    for device in &devices {
        info!(
            index = device.index,
            name = %device.name,
            path = %device.path.display(),
            "camera attached"
        );
    }

    let device = V4L2Device::open(config.camera_index())?;
    let camera = Camera::new(device)?;
    eprint!("{}", camera.info());

    let mut camera = camera.configure(&config)?.start()?;
    let result = CaptureLoop::new(&mut camera, &config, &mut sink, shutdown).run();

    // Stop and release even when the loop failed, then report the loop's outcome.
    let released = camera.stop().and_then(Camera::close);
    let summary = result?;
    released?;

    info!(
        frames = summary.frames,
        timeouts = summary.timeouts,
        errors = summary.errors,
        "camera released"
    );
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn report_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        warn!("no cameras attached");
        return;
    }
    eprintln!("Attached cameras:");
    for device in devices {
        eprintln!("  {}: {} ({})", device.index, device.name, device.path.display());
    }
}

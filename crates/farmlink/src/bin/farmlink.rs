//! Farmlink CLI
//!
//! Usage:
//!   farmlink watch [--duration S] [--snapshot PATH]   # Relay camera frames
//!   farmlink speaker volume 12                        # Send a speaker command
//!   farmlink speaker play-file 5
//!   farmlink camera status                            # Camera HTTP control
//!   farmlink camera resolution "HD(1280x720)"

use anyhow::Context;
use argh::FromArgs;
use std::path::PathBuf;
use std::time::Duration;

use farmlink::camera::{Resolution, XCLK_MAX_MHZ, XCLK_MIN_MHZ};
use farmlink::{AppConfig, AppContext, CommandResult, Delivery};

/// Farmlink - camera relay and speaker control for field rigs
#[derive(FromArgs)]
struct Args {
    /// config file (default: ~/.farmlink/config.yaml)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// show version information
    #[argh(switch, short = 'V')]
    version: bool,

    #[argh(subcommand)]
    command: Option<Command>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Watch(WatchArgs),
    Speaker(SpeakerArgs),
    Camera(CameraArgs),
}

/// Relay frames from the camera stream and report them
#[derive(FromArgs)]
#[argh(subcommand, name = "watch")]
struct WatchArgs {
    /// stop after this many seconds (default: run until Ctrl+C)
    #[argh(option, short = 'd')]
    duration: Option<u64>,

    /// how often to poll for a new frame in milliseconds (default: 100)
    #[argh(option, short = 'i', default = "100")]
    interval_ms: u64,

    /// write the latest frame's encoded bytes to this path
    #[argh(option, short = 's')]
    snapshot: Option<PathBuf>,
}

/// Send one command to the MP3 speaker
#[derive(FromArgs)]
#[argh(subcommand, name = "speaker")]
struct SpeakerArgs {
    #[argh(subcommand)]
    action: SpeakerAction,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum SpeakerAction {
    PlayTest(PlayTestArgs),
    Stop(StopArgs),
    Volume(VolumeArgs),
    DefaultSound(DefaultSoundArgs),
    PlayFile(PlayFileArgs),
}

/// Play the test sound
#[derive(FromArgs)]
#[argh(subcommand, name = "play-test")]
struct PlayTestArgs {}

/// Stop playback
#[derive(FromArgs)]
#[argh(subcommand, name = "stop")]
struct StopArgs {}

/// Set the volume (0-30)
#[derive(FromArgs)]
#[argh(subcommand, name = "volume")]
struct VolumeArgs {
    /// volume level
    #[argh(positional)]
    level: i64,
}

/// Set the default sound file number
#[derive(FromArgs)]
#[argh(subcommand, name = "default-sound")]
struct DefaultSoundArgs {
    /// sound file number
    #[argh(positional)]
    file_number: i64,
}

/// Play a specific sound file
#[derive(FromArgs)]
#[argh(subcommand, name = "play-file")]
struct PlayFileArgs {
    /// sound file number
    #[argh(positional)]
    file_number: i64,
}

/// Control the camera board over HTTP
#[derive(FromArgs)]
#[argh(subcommand, name = "camera")]
struct CameraArgs {
    #[argh(subcommand)]
    action: CameraAction,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum CameraAction {
    Status(CameraStatusArgs),
    Config(CameraConfigArgs),
    Xclk(XclkArgs),
    Resolution(ResolutionArgs),
    Resolutions(ResolutionsArgs),
}

/// Check whether the camera answers
#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
struct CameraStatusArgs {}

/// Print the camera's current settings as JSON
#[derive(FromArgs)]
#[argh(subcommand, name = "config")]
struct CameraConfigArgs {}

/// Set the sensor clock in MHz (20-40)
#[derive(FromArgs)]
#[argh(subcommand, name = "xclk")]
struct XclkArgs {
    /// clock in MHz
    #[argh(positional)]
    mhz: u32,
}

/// Set the frame size by label, short name or index
#[derive(FromArgs)]
#[argh(subcommand, name = "resolution")]
struct ResolutionArgs {
    /// e.g. "HD(1280x720)", "vga" or 12
    #[argh(positional)]
    name: String,
}

/// List supported frame sizes
#[derive(FromArgs)]
#[argh(subcommand, name = "resolutions")]
struct ResolutionsArgs {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    farmlink::runtime::setup_logging();

    let args: Args = argh::from_env();

    if args.version {
        println!("farmlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(command) = args.command else {
        eprintln!("Farmlink - camera relay and speaker control for field rigs\n");
        eprintln!("Usage: farmlink [-c config.yaml] <command>\n");
        eprintln!("Commands:");
        eprintln!("  watch     Relay camera frames (-d seconds, -s snapshot path)");
        eprintln!("  speaker   play-test, stop, volume N, default-sound N, play-file N");
        eprintln!("  camera    status, config, xclk N, resolution NAME, resolutions");
        eprintln!("\nRun 'farmlink <command> --help' for more information.");
        return Ok(());
    };

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let mut context = AppContext::new(config).context("Failed to set up telemetry")?;

    let result = match command {
        Command::Watch(args) => run_watch(&mut context, args).await,
        Command::Speaker(args) => run_speaker(&mut context, args.action).await,
        Command::Camera(args) => run_camera(&context, args.action).await,
    };

    context.shutdown().await;
    result
}

async fn run_watch(context: &mut AppContext, args: WatchArgs) -> anyhow::Result<()> {
    let mut shutdown = farmlink::runtime::shutdown_signal().context("Failed to set Ctrl+C handler")?;

    context
        .start_relay()
        .with_context(|| format!("Failed to start relay for {}", context.config().relay.url))?;
    log::info!(
        "Relaying frames from {}. Press Ctrl+C to stop.",
        context.config().relay.url
    );

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut poll = tokio::time::interval(Duration::from_millis(args.interval_ms.max(10)));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = &mut deadline => {
                log::info!("Watch duration elapsed");
                break;
            }
            _ = poll.tick() => {}
        }

        match context.relay().next_frame() {
            Some(Delivery::Frame(frame)) => {
                log::info!(
                    "Frame #{} {:?} {}x{} ({} bytes)",
                    frame.sequence,
                    frame.format,
                    frame.width,
                    frame.height,
                    frame.encoded.len()
                );
                if let Some(path) = &args.snapshot {
                    tokio::fs::write(path, &frame.encoded[..])
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                }
            }
            Some(Delivery::Error(e)) => log::warn!("Frame error: {}", e),
            None => {}
        }
    }

    let stats = context.relay().stats();
    println!(
        "connections={} frames={} decode_errors={}",
        stats.connections, stats.frames, stats.decode_errors
    );
    Ok(())
}

async fn run_speaker(context: &mut AppContext, action: SpeakerAction) -> anyhow::Result<()> {
    let client = context
        .connect_broker()
        .await
        .context("Failed to connect to broker")?;

    let result: CommandResult = match action {
        SpeakerAction::PlayTest(_) => client.play_test_sound(),
        SpeakerAction::Stop(_) => client.stop_sound(),
        SpeakerAction::Volume(args) => client.set_volume(args.level),
        SpeakerAction::DefaultSound(args) => client.set_default_sound_file(args.file_number),
        SpeakerAction::PlayFile(args) => client.play_sound_file(args.file_number),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!("{}", result.message);
    }
    // Context shutdown waits for the telemetry mirror and flushes the session
    Ok(())
}

async fn run_camera(context: &AppContext, action: CameraAction) -> anyhow::Result<()> {
    let camera = || {
        context
            .camera()
            .context("Camera address not set (camera.address or CAMERA_IP)")
    };

    match action {
        CameraAction::Resolutions(_) => {
            for resolution in Resolution::ALL {
                let default = if resolution == Resolution::default() { " (default)" } else { "" };
                println!("{:>2}  {}{}", resolution.framesize(), resolution, default);
            }
        }
        CameraAction::Status(_) => {
            let camera = camera()?;
            if camera.check_status().await {
                println!("Camera at {} is online", camera.base_url());
            } else {
                anyhow::bail!("Camera at {} is not reachable", camera.base_url());
            }
        }
        CameraAction::Config(_) => {
            let settings = camera()?.configuration().await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        CameraAction::Xclk(args) => {
            camera()?.set_xclk(args.mhz).await.with_context(|| {
                format!("XCLK must be {}-{} MHz and the camera reachable", XCLK_MIN_MHZ, XCLK_MAX_MHZ)
            })?;
            println!("XCLK set to {}", args.mhz);
        }
        CameraAction::Resolution(args) => {
            let resolution: Resolution = args.name.parse()?;
            camera()?.set_resolution(resolution).await?;
            println!("Resolution set to {}", resolution);
        }
    }
    Ok(())
}

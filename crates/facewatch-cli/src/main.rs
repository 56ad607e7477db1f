use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_hw::Camera;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facewatch", about = "facewatch capture and recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the capture scheduler
    Start,
    /// Stop the capture scheduler
    Stop,
    /// Rebuild the reference index from the photo store
    Rebuild,
    /// Show daemon status
    Status,
    /// Show the most recent recognition report
    Last,
    /// List V4L2 capture devices
    Devices,
    /// Capture one still directly from a camera (bypasses the daemon)
    Snapshot {
        /// Camera device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Output image file; format follows the extension
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
    },
}

#[zbus::proxy(
    interface = "org.facewatch.Daemon1",
    default_service = "org.facewatch.Daemon1",
    default_path = "/org/facewatch/Daemon1"
)]
trait Facewatch {
    async fn start(&self) -> zbus::Result<bool>;
    async fn stop(&self) -> zbus::Result<bool>;
    async fn rebuild(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
    async fn last_result(&self) -> zbus::Result<String>;
}

async fn daemon() -> Result<FacewatchProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    FacewatchProxy::new(&conn)
        .await
        .context("facewatchd is not reachable on D-Bus")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn snapshot(device: &str, output: &Path, width: u32, height: u32) -> Result<()> {
    if image::ImageFormat::from_path(output).is_err() {
        bail!("unsupported output format: {}", output.display());
    }

    let camera = Camera::open(device, width, height)
        .with_context(|| format!("failed to open {device}"))?;
    camera.warm_up(4);
    let frame = camera.capture_still().context("capture failed")?;

    frame
        .image
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "{}x{} still ({:?}, brightness {:.0}) written to {}",
        frame.width(),
        frame.height(),
        camera.pixel_format(),
        frame.avg_brightness(),
        output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            if daemon().await?.start().await? {
                println!("scheduler started");
            } else {
                println!("scheduler already running");
            }
        }
        Commands::Stop => {
            if daemon().await?.stop().await? {
                println!("scheduler stopped");
            } else {
                println!("scheduler was not running");
            }
        }
        Commands::Rebuild => {
            let descriptors = daemon().await?.rebuild().await?;
            println!("reference index rebuilt: {descriptors} descriptors");
        }
        Commands::Status => print_json(&daemon().await?.status().await?)?,
        Commands::Last => print_json(&daemon().await?.last_result().await?)?,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Snapshot {
            device,
            output,
            width,
            height,
        } => {
            tracing::debug!(device = %device, output = %output.display(), "snapshot");
            tokio::task::spawn_blocking(move || snapshot(&device, &output, width, height))
                .await??;
        }
    }

    Ok(())
}

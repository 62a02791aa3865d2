// Copyright 2025 Google LLC
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

//! AirScan publisher - Demo Tool
//!
//! Publishes one virtual eSCL scanner on the local network. Scan jobs render
//! a generated test page, so any driverless scan client can be tried against
//! it without scanner hardware.

#![allow(clippy::items_after_statements)]

use airscan_discovery::DeviceAdvertiser;
use airscan_discovery_mdns::MdnsAdvertiser;
use airscan_discovery_mock::{MockAdvertiser, MockBackend};
use airscan_server::settings::{MAX_HEIGHT, MAX_WIDTH};
use airscan_server::{
    Capabilities, CertificateKey, ColorMode, DeviceConfig, ScanJob, ScanJobFactory, ScanServer,
    ScanSettings, SecurityPolicy, ServerOptions, StatusCallback, StatusTransition,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use colored::Colorize;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "airscan-publisher")]
#[command(about = "Publish a virtual eSCL scanner on the local network", long_about = None)]
struct Cli {
    /// Make and model shown to scan clients
    #[arg(long, default_value = "AirScan Test Scanner")]
    name: String,

    /// Device UUID (random if not given)
    #[arg(long)]
    uuid: Option<Uuid>,

    /// Preferred HTTP port (0 = random)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Preferred HTTPS port (0 = random)
    #[arg(long, default_value_t = 0)]
    tls_port: u16,

    /// Serve HTTPS only
    #[arg(long)]
    require_https: bool,

    /// Serve HTTP only
    #[arg(long)]
    disable_https: bool,

    /// Only serve HTTPS with the certificate given by --cert/--key
    #[arg(long)]
    require_trusted_certificate: bool,

    /// Send permissive CORS headers
    #[arg(long)]
    allow_cors: bool,

    /// PEM certificate to serve HTTPS with
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key for --cert
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// PNG icon served at /eSCL/icon.png
    #[arg(long)]
    icon: Option<PathBuf>,

    /// Do not advertise over mDNS
    #[arg(long)]
    no_mdns: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

impl Cli {
    fn security_policy(&self) -> SecurityPolicy {
        let mut policy = SecurityPolicy::empty();
        if self.require_https {
            policy |= SecurityPolicy::REQUIRE_HTTPS;
        }
        if self.disable_https {
            policy |= SecurityPolicy::DISABLE_HTTPS;
        }
        if self.require_trusted_certificate {
            policy |= SecurityPolicy::REQUIRE_TRUSTED_CERTIFICATE;
        }
        if self.allow_cors {
            policy |= SecurityPolicy::ALLOW_CORS;
        }
        policy
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v flags
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::default())
            .with_target(true)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        use tracing::Level;
        let log_level = match cli.verbose.log_level_filter() {
            clap_verbosity_flag::log::LevelFilter::Off => None,
            clap_verbosity_flag::log::LevelFilter::Error => Some(Level::ERROR),
            clap_verbosity_flag::log::LevelFilter::Warn => Some(Level::WARN),
            clap_verbosity_flag::log::LevelFilter::Info => Some(Level::INFO),
            clap_verbosity_flag::log::LevelFilter::Debug => Some(Level::DEBUG),
            clap_verbosity_flag::log::LevelFilter::Trace => Some(Level::TRACE),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::default())
            .with_target(false);

        if let Some(level) = log_level {
            subscriber.with_max_level(level).init();
        } else {
            subscriber.init();
        }
    }

    println!("{}", "AirScan Publisher".bright_cyan().bold());
    println!();

    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Publisher failed: {e:?}");
            println!("{} {:#}", "✗ Failed:".bright_red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let certificate = match (&cli.cert, &cli.key) {
        (Some(cert), Some(key)) => Some(CertificateKey::load_from_pem_files(cert, key)?),
        _ => None,
    };

    let mut capabilities = Capabilities::new(cli.name.clone());
    if let Some(path) = &cli.icon {
        let icon = std::fs::read(path)
            .with_context(|| format!("Failed to read icon from {}", path.display()))?;
        capabilities.icon_png = Some(icon);
    }

    let advertiser: Arc<dyn DeviceAdvertiser> = if cli.no_mdns {
        info!("mDNS disabled, device will only be reachable directly");
        Arc::new(MockAdvertiser::new(MockBackend::new()))
    } else {
        Arc::new(MdnsAdvertiser::new().context("Failed to start mDNS responder")?)
    };

    let options = ServerOptions {
        security_policy: cli.security_policy(),
        certificate,
        ..ServerOptions::default()
    };
    let server = ScanServer::new(options, advertiser);

    let uuid = cli.uuid.unwrap_or_else(Uuid::new_v4);
    let mut device = DeviceConfig::new(uuid, capabilities, Arc::new(TestPatternFactory));
    device.port = cli.port;
    device.tls_port = cli.tls_port;
    server.add_device(device)?;

    server.start().await?;

    if let Some(cert) = server.certificate() {
        println!(
            "{} {}",
            "Certificate SPKI SHA-256:".bright_green(),
            cert.fingerprint.to_base64().bright_white()
        );
    }
    if let Some(config) = server.device_config(uuid) {
        let policy = server.options().security_policy;
        if policy.allows_http() {
            println!(
                "{} http://localhost:{}/eSCL/ScannerCapabilities",
                "Serving".bright_green(),
                config.port.to_string().bright_white().bold()
            );
        }
        if server.certificate().is_some() && policy.allows_https() {
            println!(
                "{} https://localhost:{}/eSCL/ScannerCapabilities",
                "Serving".bright_green(),
                config.tls_port.to_string().bright_white().bold()
            );
        }
    }
    println!("{}", "Press Ctrl-C to stop".bright_yellow());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!();
    info!("Shutting down");
    server.stop().await;
    println!("{}", "✓ Stopped".bright_green().bold());
    Ok(())
}

/// Creates [`TestPatternJob`]s
struct TestPatternFactory;

#[async_trait]
impl ScanJobFactory for TestPatternFactory {
    async fn create_job(&self, settings: &ScanSettings) -> Result<Box<dyn ScanJob>> {
        let format = match settings.document_format.as_deref() {
            None | Some("image/jpeg") => ImageFormat::Jpeg,
            Some("image/png") => ImageFormat::Png,
            Some(other) => bail!("Unsupported document format {other}"),
        };
        let pages = if settings.duplex { 2 } else { 1 };
        debug!(pages, ?format, "Creating test pattern job");
        Ok(Box::new(TestPatternJob::new(settings.clone(), format, pages)))
    }
}

struct PageState {
    ready: VecDeque<Vec<u8>>,
    rendering_done: bool,
    scanned: u32,
    current: Option<Vec<u8>>,
    cancelled: bool,
    idle_sent: bool,
}

#[derive(Default)]
struct Notifier {
    callback: Option<StatusCallback>,
    /// Transitions raised before a callback was registered
    pending: Vec<StatusTransition>,
}

struct JobShared {
    state: Mutex<PageState>,
    page_ready: Notify,
    notifier: Mutex<Notifier>,
}

impl JobShared {
    fn notify(&self, transition: StatusTransition) {
        let mut guard = self.notifier.lock();
        let notifier = &mut *guard;
        match &notifier.callback {
            Some(callback) => callback(transition),
            None => notifier.pending.push(transition),
        }
    }

    /// Report the device idle at most once per job
    fn release_device(&self) {
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.idle_sent, true)
        };
        if first {
            self.notify(StatusTransition::DeviceIdle);
        }
    }

    fn finish_rendering(&self, failed: bool) {
        let cancelled = {
            let mut state = self.state.lock();
            state.rendering_done = true;
            state.cancelled
        };
        self.page_ready.notify_waiters();
        if cancelled {
            return;
        }
        if failed {
            self.notify(StatusTransition::AbortJob);
        }
        self.release_device();
    }
}

/// Renders one generated page per side
///
/// Pages are rendered in the background as soon as the job is created. The
/// device is reported idle once the last page is rendered, whether or not the
/// client ever fetches it.
struct TestPatternJob {
    pages: u32,
    shared: Arc<JobShared>,
    render_task: JoinHandle<()>,
}

impl TestPatternJob {
    fn new(settings: ScanSettings, format: ImageFormat, pages: u32) -> Self {
        let shared = Arc::new(JobShared {
            state: Mutex::new(PageState {
                ready: VecDeque::new(),
                rendering_done: false,
                scanned: 0,
                current: None,
                cancelled: false,
                idle_sent: false,
            }),
            page_ready: Notify::new(),
            notifier: Mutex::new(Notifier::default()),
        });
        let render_task = tokio::spawn(render_pages(Arc::clone(&shared), settings, format, pages));
        Self {
            pages,
            shared,
            render_task,
        }
    }
}

async fn render_pages(
    shared: Arc<JobShared>,
    settings: ScanSettings,
    format: ImageFormat,
    pages: u32,
) {
    for _ in 0..pages {
        let settings = settings.clone();
        let rendered = tokio::task::spawn_blocking(move || render_page(&settings, format)).await;
        let page = match rendered {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                warn!("Failed to render test page: {e:#}");
                shared.finish_rendering(true);
                return;
            }
            Err(e) => {
                warn!("Render task failed: {e}");
                shared.finish_rendering(true);
                return;
            }
        };
        {
            let mut state = shared.state.lock();
            if state.cancelled {
                return;
            }
            state.ready.push_back(page);
        }
        shared.page_ready.notify_waiters();
    }
    shared.finish_rendering(false);
}

#[async_trait]
impl ScanJob for TestPatternJob {
    fn cancel(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.ready.clear();
        }
        self.render_task.abort();
        self.shared.page_ready.notify_waiters();
        self.shared.notify(StatusTransition::CancelJob);
        self.shared.release_device();
    }

    async fn wait_for_next_document(&self) -> bool {
        loop {
            // Registered before checking so a page pushed in between is not missed
            let page_ready = self.shared.page_ready.notified();
            {
                let mut state = self.shared.state.lock();
                if state.cancelled {
                    return false;
                }
                if let Some(page) = state.ready.pop_front() {
                    state.current = Some(page);
                    state.scanned += 1;
                    return true;
                }
                if state.rendering_done {
                    return false;
                }
            }
            page_ready.await;
        }
    }

    async fn write_document_to(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()> {
        let page = self.shared.state.lock().current.take().unwrap_or_default();
        out.write_all(&page).await
    }

    async fn write_progress_to(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()> {
        let scanned = self.shared.state.lock().scanned;
        let progress = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Progress><Scanned>{scanned}</Scanned><Total>{}</Total></Progress>\n",
            self.pages
        );
        out.write_all(progress.as_bytes()).await
    }

    fn register_status_transition(&self, callback: StatusCallback) {
        let mut notifier = self.shared.notifier.lock();
        for transition in std::mem::take(&mut notifier.pending) {
            callback(transition);
        }
        notifier.callback = Some(callback);
    }
}

impl Drop for TestPatternJob {
    fn drop(&mut self) {
        self.render_task.abort();
    }
}

// Letter at the requested resolution, capped to keep rendering cheap
const PAGE_WIDTH_INCHES: f32 = 8.5;
const PAGE_HEIGHT_INCHES: f32 = 11.0;
const DEFAULT_DPI: u32 = 100;
const MAX_DPI: u32 = 300;

fn render_page(settings: &ScanSettings, format: ImageFormat) -> Result<Vec<u8>> {
    let dpi = match settings.x_resolution {
        0 => DEFAULT_DPI,
        dpi => dpi.min(MAX_DPI),
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (width, height) = if settings.region.width > 0 && settings.region.height > 0 {
        (
            scale_to_dpi(settings.region.width, MAX_WIDTH, dpi),
            scale_to_dpi(settings.region.height, MAX_HEIGHT, dpi),
        )
    } else {
        (
            (PAGE_WIDTH_INCHES * dpi as f32) as u32,
            (PAGE_HEIGHT_INCHES * dpi as f32) as u32,
        )
    };
    let (width, height) = (width.max(1), height.max(1));

    let image = match settings.color_mode {
        ColorMode::BlackAndWhite1 => {
            DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
                let on = ((x / 32) + (y / 32)) % 2 == 0;
                Luma([if on { 0 } else { 255 }])
            }))
        }
        mode if mode.is_gray() => {
            DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
                Luma([gradient(x, width)])
            }))
        }
        _ => DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([gradient(x, width), gradient(y, height), 128])
        })),
    };

    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, format)
        .context("Failed to encode test page")?;
    Ok(encoded.into_inner())
}

/// Convert a length in 1/300 inch to pixels, clamped to the platen size
fn scale_to_dpi(extent: u32, max: u32, dpi: u32) -> u32 {
    let pixels = u64::from(extent.min(max)) * u64::from(dpi) / 300;
    u32::try_from(pixels).unwrap_or(u32::MAX)
}

#[allow(clippy::cast_possible_truncation)]
fn gradient(position: u32, extent: u32) -> u8 {
    (u64::from(position) * 255 / u64::from(extent.max(1))) as u8
}

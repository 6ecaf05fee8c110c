use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, eyre};
use jardim_bridge::{Bridge, ConnectStatus};
use jardim_core::{Actuator, DeviceId, DiscoveredDevice, NotificationId, PotDraft, PotId, SwitchState};
use jardim_hub::{
    Config, FileStore, Hub, KeyValueStore, LogNotifier, MemoryStore, StorageConfig, compute_mood,
};
use jardim_link::permissions::{FixedPrompt, Grant};
use jardim_link::{Provisioner, ProvisioningError, SessionConfig, request_link_permissions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "jardim-hub")]
#[command(about = "Provision and monitor smart plant pots")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "jardim-hub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look for pots waiting to be configured
    Scan {
        /// Seconds to scan for
        #[arg(long, default_value_t = 5)]
        secs: u64,
    },
    /// Hand Wi-Fi credentials to a pot and save it
    Provision {
        /// Link address of the pot controller
        #[arg(long)]
        device: String,
        #[arg(long)]
        ssid: String,
        #[arg(long)]
        password: String,
        #[command(flatten)]
        pot: PotArgs,
    },
    /// Save a pot without configuring a device
    Add {
        #[command(flatten)]
        pot: PotArgs,
    },
    /// List saved pots
    List,
    /// Delete a pot
    Remove { id: PotId },
    /// Apply live telemetry to a pot until interrupted
    Monitor {
        /// Pot to follow; defaults to the first saved pot
        #[arg(long)]
        pot: Option<PotId>,
    },
    /// Switch a pot's light or pump
    Actuate {
        id: PotId,
        actuator: ActuatorArg,
        state: StateArg,
    },
    /// Show mood notifications
    Notifications {
        /// Mark one notification as read
        #[arg(long, conflicts_with_all = ["read_all", "clear"])]
        read: Option<NotificationId>,
        /// Mark every notification as read
        #[arg(long)]
        read_all: bool,
        /// Delete all notifications
        #[arg(long)]
        clear: bool,
    },
}

#[derive(clap::Args)]
struct PotArgs {
    #[arg(long)]
    name: String,
    /// Common name of the plant
    #[arg(long, default_value = "")]
    plant: String,
    #[arg(long, default_value = "")]
    species: String,
    #[arg(long, default_value = "")]
    location: String,
    #[arg(long)]
    image: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

impl From<PotArgs> for PotDraft {
    fn from(args: PotArgs) -> Self {
        PotDraft {
            name: args.name,
            plant_popular_name: args.plant,
            plant_species: args.species,
            location_label: args.location,
            image_ref: args.image,
            description: args.description,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ActuatorArg {
    Light,
    Pump,
}

impl From<ActuatorArg> for Actuator {
    fn from(arg: ActuatorArg) -> Self {
        match arg {
            ActuatorArg::Light => Actuator::Light,
            ActuatorArg::Pump => Actuator::Pump,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    On,
    Off,
}

impl From<StateArg> for SwitchState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::On => SwitchState::On,
            StateArg::Off => SwitchState::Off,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "jardim_hub=info,jardim_link=info,jardim_bridge=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    match config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            run(cli.command, config, MemoryStore::default()).await
        }
        StorageConfig::File { ref path } => {
            info!(path = ?path, "Using file storage");
            let store = FileStore::new(path.clone());
            run(cli.command, config, store).await
        }
    }
}

async fn run<S>(command: Command, config: Config, store: S) -> color_eyre::Result<()>
where
    S: KeyValueStore + Clone,
{
    let bridge = Bridge::new(config.bridge.clone());
    let hub = Hub::new(Arc::clone(&bridge), store, Arc::new(LogNotifier));

    match command {
        Command::Scan { secs } => scan(&config, Duration::from_secs(secs)).await,
        Command::Provision {
            device,
            ssid,
            password,
            pot,
        } => provision(&config, &hub, DeviceId(device), &ssid, &password, pot.into()).await,
        Command::Add { pot } => {
            let pot = hub.add_pot(pot.into(), None).await?;
            println!("{}  {}", pot.id, pot.name);
            Ok(())
        }
        Command::List => {
            for pot in hub.pots().await? {
                let status = if pot.is_online() {
                    format!("online at {} on {}", pot.ip_address, pot.wifi_ssid)
                } else if pot.has_device() {
                    "offline".to_owned()
                } else {
                    "no device".to_owned()
                };
                println!(
                    "{}  {:<16} moisture {:>5}  light {:<3} pump {:<3} {:<7}  {}",
                    pot.id,
                    pot.name,
                    pot.moisture_percent.to_string(),
                    on_off(pot.light_on),
                    on_off(pot.pump_on),
                    compute_mood(&pot).to_string(),
                    status,
                );
            }
            Ok(())
        }
        Command::Remove { id } => {
            let pot = hub.remove_pot(id).await?;
            println!("Removed {}", pot.name);
            Ok(())
        }
        Command::Monitor { pot } => monitor(&hub, pot).await,
        Command::Actuate {
            id,
            actuator,
            state,
        } => {
            if bridge.connect(CancellationToken::new()).await == ConnectStatus::Pending {
                warn!("Broker not connected, the command will be dropped");
            }

            let delivery = hub.set_actuator(id, actuator.into(), state.into()).await;
            bridge.shutdown().await;
            println!("{:?}", delivery?);
            Ok(())
        }
        Command::Notifications {
            read,
            read_all,
            clear,
        } => {
            if let Some(id) = read {
                hub.mark_notification_read(id).await?;
            } else if read_all {
                let changed = hub.mark_all_notifications_read().await?;
                println!("Marked {changed} notifications as read");
            } else if clear {
                hub.clear_notifications().await?;
                println!("Notifications cleared");
                return Ok(());
            }

            for notification in hub.notifications().await? {
                let marker = if notification.read { " " } else { "*" };
                println!(
                    "{marker} {}  {}  {}\n    {}",
                    notification.id, notification.created_at, notification.title, notification.body
                );
            }
            Ok(())
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

fn provisioner(config: &Config) -> Provisioner<jardim_link::mock::MockLink> {
    let session = SessionConfig::from(&config.provisioning);
    info!(?session, "Using mock link");
    Provisioner::new(config.link.mock_link(), session)
}

async fn ensure_permissions(config: &Config) -> color_eyre::Result<()> {
    // The CLI cannot show an OS prompt; running it means the grants exist.
    if !request_link_permissions(config.platform, &FixedPrompt(Grant::Granted)).await {
        return Err(ProvisioningError::PermissionDenied.into());
    }
    Ok(())
}

async fn scan(config: &Config, window: Duration) -> color_eyre::Result<()> {
    ensure_permissions(config).await?;

    let devices = provisioner(config).scan_for(window).await?;
    if devices.is_empty() {
        println!("No pots found");
    }
    for device in devices {
        println!(
            "{}  {}",
            device.device_id,
            device.advertised_name.as_deref().unwrap_or("(unnamed)")
        );
    }
    Ok(())
}

async fn provision<S>(
    config: &Config,
    hub: &Hub<S>,
    device_id: DeviceId,
    ssid: &str,
    password: &str,
    draft: PotDraft,
) -> color_eyre::Result<()>
where
    S: KeyValueStore + Clone,
{
    ensure_permissions(config).await?;
    if ssid.trim().is_empty() {
        bail!("an SSID is required");
    }

    let provisioner = provisioner(config);
    let found = provisioner.scan_for(provisioner.config().scan_timeout).await?;
    let device = found
        .into_iter()
        .find(|d| d.device_id == device_id)
        .unwrap_or_else(|| {
            warn!(%device_id, "Device not seen while scanning, connecting anyway");
            DiscoveredDevice {
                device_id: device_id.clone(),
                advertised_name: None,
            }
        });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling provisioning");
            interrupt.cancel();
        }
    });

    let mut progress = provisioner.watch_state();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = *progress.borrow_and_update();
            info!(?state, "Provisioning progress");
        }
    });

    let result = provisioner
        .send_credentials(&device, ssid, password, &cancel)
        .await;
    drop(provisioner);
    let _ = reporter.await;

    let result = result.map_err(|e| match e {
        ProvisioningError::CredentialsRejected { .. } => {
            eyre!("{e}. Check the Wi-Fi password and try again")
        }
        ProvisioningError::ProvisioningTimeout { .. } => {
            eyre!("{e}. The pot may still have joined; check your router")
        }
        other => other.into(),
    })?;

    println!("Pot joined {} with address {}", result.ssid, result.ip);
    let pot = hub.add_pot(draft, Some((device, result))).await?;
    println!("{}  {}", pot.id, pot.name);
    Ok(())
}

async fn monitor<S>(hub: &Hub<S>, pot: Option<PotId>) -> color_eyre::Result<()>
where
    S: KeyValueStore + Clone,
{
    let pot = match pot {
        Some(id) => id,
        None => hub
            .pots()
            .await?
            .first()
            .map(|p| p.id)
            .ok_or_else(|| eyre!("no pots saved yet"))?,
    };
    hub.select_pot(pot).await?;

    let cancel = CancellationToken::new();
    let rx = hub.start(256).await?;

    match hub.bridge().connect(cancel.clone()).await {
        ConnectStatus::Connected => info!("Broker connected"),
        ConnectStatus::Pending => warn!("Broker not reachable yet, waiting in background"),
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            shutdown.cancel();
        }
    });

    hub.run(rx, cancel).await;
    hub.bridge().shutdown().await;
    info!("jardim-hub shut down complete");
    Ok(())
}

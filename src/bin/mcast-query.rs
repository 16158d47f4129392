use mcastq::config::ConfigManager;
use mcastq::igmp::{AsyncIgmpSocket, IgmpParser, IgmpWriter, MulticastMembership, RawIgmpSocket};
use mcastq::interface::LocalInterface;

use clap::Parser;

use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Sends an IGMPv3 General Query and prints every IGMP message seen on the link.
#[derive(Parser, Debug)]
#[clap(name = "mcast-query", version)]
struct Cli {
    /// configuration file (TOML)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// interface address, overrides the configuration
    #[clap(short = 'i', long)]
    interface_address: Option<Ipv4Addr>,

    /// interface name, overrides the configuration
    #[clap(long)]
    interface: Option<String>,

    /// send the query and exit without listening
    #[clap(long)]
    once: bool,
}

fn main() {
    env_logger::init();
    let args = Cli::parse();
    let config_manager = ConfigManager::new(args.config.as_ref());
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async move {
        config_manager.load().await?;
        log::debug!("Configuration: {:?}", config_manager.get());

        let config_reloader = config_manager.clone();
        tokio::spawn(async move {
            let mut signal = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(e) => {
                    log::warn!("Failed to install SIGHUP handler: {}", e);
                    return;
                }
            };
            loop {
                signal.recv().await;
                log::info!("Received SIGHUP, reloading configuration");
                if let Err(e) = config_reloader.load().await {
                    log::warn!("Failed to reload configuration: {:?}", e);
                }
            }
        });

        run(config_manager, &args).await
    });

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn local_interface(config: &ConfigManager, args: &Cli) -> Result<LocalInterface, std::io::Error> {
    let mut global = config.get().unwrap_or_default().global;
    if args.interface.is_some() {
        global.interface = args.interface.clone();
    }
    if args.interface_address.is_some() {
        global.interface_address = args.interface_address;
    }
    global.local_interface()
}

async fn send_general_query(socket: &AsyncIgmpSocket, config: &ConfigManager) -> Result<(), std::io::Error> {
    let query_config = config.get().unwrap_or_default().query;
    let mut writer = IgmpWriter::new();
    writer.set_destination(query_config.destination);
    writer.set_raw(&query_config.general_query()).map_err(std::io::Error::other)?;
    socket.send_writer(&writer).await?;
    log::info!("Sent General Query to {} (mrc:{} flags:0x{:02x} qqic:{})",
        query_config.destination,
        query_config.max_response_code().raw(),
        query_config.flags(),
        query_config.query_interval_code().raw(),
    );
    Ok(())
}

async fn run(config: ConfigManager, args: &Cli) -> Result<(), std::io::Error> {
    let interface = local_interface(&config, args)?;
    log::info!("Using interface {}", interface);

    let raw_socket = RawIgmpSocket::new()?;
    raw_socket.join_multicast(mcastq::igmp::ALL_IGMPV3_ROUTERS, &interface)?;
    raw_socket.set_multicast_ttl(1)?;
    raw_socket.set_router_alert(true)?;
    raw_socket.set_multicast_loop(config.get().unwrap_or_default().query.loopback)?;
    if !interface.is_any() {
        raw_socket.set_multicast_interface(&interface)?;
    }
    let socket = raw_socket.into_async()?;

    send_general_query(&socket, &config).await?;
    if args.once {
        return Ok(());
    }

    let query_socket = socket.clone();
    let query_config = config.clone();
    tokio::spawn(async move {
        loop {
            let current = query_config.get().unwrap_or_default().query;
            tokio::time::sleep(current.query_interval()).await;
            if !query_config.get().unwrap_or_default().query.repeat {
                continue;
            }
            if let Err(e) = send_general_query(&query_socket, &query_config).await {
                log::error!("Failed to send General Query: {}", e);
            }
        }
    });

    let mut parser = IgmpParser::new();
    loop {
        if let Err(e) = socket.recv_parser(&mut parser).await {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        let packet = parser.packet();
        let src = packet.source_addr().unwrap_or(packet.target_addr);
        let dst = packet.destination_addr().unwrap_or(Ipv4Addr::UNSPECIFIED);

        if config.get().unwrap_or_default().query.verify_checksum {
            if let Err(e) = parser.verify_checksum() {
                log::warn!("{} -> {}: {}", src, dst, e);
            }
        }

        match parser.parse() {
            Ok(message) => {
                println!("\n{} -> {}", src, dst);
                println!("{}", message);
            }
            Err(e) => {
                log::debug!("{} -> {}: skipping packet: {}", src, dst, e);
            }
        }
    }
}

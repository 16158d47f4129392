use mcastq::igmp::{MembershipSocket, MulticastMembership};
use mcastq::interface::LocalInterface;

use clap::{CommandFactory, Parser};

use std::net::Ipv4Addr;

/// Joins a multicast group with a source filter and holds the membership until interrupted.
#[derive(Parser, Debug)]
#[clap(name = "mcast-join", version)]
struct Cli {
    /// exclude mode: receive from every source except the listed ones
    #[clap(short, long)]
    exclude: bool,

    /// local interface address
    #[clap(short = 'i', long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface_address: Ipv4Addr,

    /// multicast group to join
    group: Ipv4Addr,

    /// source addresses to include (or exclude with -e)
    sources: Vec<Ipv4Addr>,
}

fn join(socket: &MembershipSocket, args: &Cli, interface: &LocalInterface) -> Result<(), std::io::Error> {
    if args.exclude {
        socket.join_multicast(args.group, interface)?;
        for &source in &args.sources {
            socket.block_source(args.group, interface, source)?;
        }
        log::info!("Joined {} on {} in exclude mode ({} blocked sources)", args.group, interface, args.sources.len());
    } else {
        for &source in &args.sources {
            socket.add_source_membership(args.group, interface, source)?;
        }
        log::info!("Joined {} on {} in include mode ({} sources)", args.group, interface, args.sources.len());
    }
    Ok(())
}

fn leave(socket: &MembershipSocket, args: &Cli, interface: &LocalInterface) -> Result<(), std::io::Error> {
    if args.exclude {
        for &source in &args.sources {
            socket.unblock_source(args.group, interface, source)?;
        }
        socket.leave_multicast(args.group, interface)?;
    } else {
        for &source in &args.sources {
            socket.drop_source_membership(args.group, interface, source)?;
        }
    }
    log::info!("Left {}", args.group);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let args = Cli::parse();

    if !args.group.is_multicast() {
        Cli::command()
            .error(clap::error::ErrorKind::ValueValidation, format!("{} is not a multicast group", args.group))
            .exit();
    }
    if !args.exclude && args.sources.is_empty() {
        Cli::command()
            .error(clap::error::ErrorKind::MissingRequiredArgument, "include mode needs at least one source")
            .exit();
    }

    let interface = LocalInterface::by_address(args.interface_address);
    let socket = match MembershipSocket::new() {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("Failed to open socket: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = join(&socket, &args, &interface) {
        log::error!("Failed to join {}: {}", args.group, e);
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to wait for interrupt: {}", e);
    }

    if let Err(e) = leave(&socket, &args, &interface) {
        log::warn!("Failed to leave {}: {}", args.group, e);
    }
}

use super::packet;
use crate::interface::LocalInterface;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use std::ffi::c_int;
use std::net::Ipv4Addr;
use libc::socket;
use libc::setsockopt;
use std::os::fd::AsRawFd;
use std::os::fd::RawFd;
use std::sync::Arc;

/// IP router alert option (RFC 2113), value 0: examine packet.
const ROUTER_ALERT_OPTION: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

fn in_addr(addr: Ipv4Addr) -> libc::in_addr {
    libc::in_addr { s_addr: u32::from_ne_bytes(addr.octets()) }
}

fn sockaddr_in(addr: Ipv4Addr) -> libc::sockaddr_in {
    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_addr = in_addr(addr);
    sin
}

fn ip_mreqn(group: Ipv4Addr, interface: &LocalInterface) -> libc::ip_mreqn {
    libc::ip_mreqn {
        imr_multiaddr: in_addr(group),
        imr_address: in_addr(interface.address),
        imr_ifindex: interface.index as c_int,
    }
}

fn ip_mreq_source(group: Ipv4Addr, interface: &LocalInterface, source: Ipv4Addr) -> libc::ip_mreq_source {
    libc::ip_mreq_source {
        imr_multiaddr: in_addr(group),
        imr_interface: in_addr(interface.address),
        imr_sourceaddr: in_addr(source),
    }
}

unsafe fn set_option<T: Sized, O: SocketOpt>(fd: RawFd, opt: O, optval: &T) -> Result<(), std::io::Error> {
    set_option_bytes(fd, opt, optval as *const _ as *const libc::c_void, std::mem::size_of::<T>())
}

unsafe fn set_option_bytes<O: SocketOpt>(fd: RawFd, opt: O, optval: *const libc::c_void, optlen: usize) -> Result<(), std::io::Error> {
    let code = unsafe {
        setsockopt(fd, opt.level(), opt.optname(), optval, optlen as libc::socklen_t)
    };
    if code < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Group membership and source filter requests on an IPv4 socket.
///
/// Memberships live as long as the socket; closing it leaves every group.
pub trait MulticastMembership: AsRawFd {
    fn join_multicast(&self, group: Ipv4Addr, interface: &LocalInterface) -> Result<(), std::io::Error> {
        let mreq = ip_mreqn(group, interface);
        unsafe { set_option(self.as_raw_fd(), Ipv4Opt::IP_ADD_MEMBERSHIP, &mreq) }
    }

    fn leave_multicast(&self, group: Ipv4Addr, interface: &LocalInterface) -> Result<(), std::io::Error> {
        let mreq = ip_mreqn(group, interface);
        unsafe { set_option(self.as_raw_fd(), Ipv4Opt::IP_DROP_MEMBERSHIP, &mreq) }
    }

    /// Exclude mode: stop receiving `source` on a group joined with [`Self::join_multicast`].
    fn block_source(&self, group: Ipv4Addr, interface: &LocalInterface, source: Ipv4Addr) -> Result<(), std::io::Error> {
        let mreq = ip_mreq_source(group, interface, source);
        unsafe { set_option(self.as_raw_fd(), Ipv4Opt::IP_BLOCK_SOURCE, &mreq) }
    }

    fn unblock_source(&self, group: Ipv4Addr, interface: &LocalInterface, source: Ipv4Addr) -> Result<(), std::io::Error> {
        let mreq = ip_mreq_source(group, interface, source);
        unsafe { set_option(self.as_raw_fd(), Ipv4Opt::IP_UNBLOCK_SOURCE, &mreq) }
    }

    /// Include mode: join `group` for traffic from `source` only.
    fn add_source_membership(&self, group: Ipv4Addr, interface: &LocalInterface, source: Ipv4Addr) -> Result<(), std::io::Error> {
        let mreq = ip_mreq_source(group, interface, source);
        unsafe { set_option(self.as_raw_fd(), Ipv4Opt::IP_ADD_SOURCE_MEMBERSHIP, &mreq) }
    }

    fn drop_source_membership(&self, group: Ipv4Addr, interface: &LocalInterface, source: Ipv4Addr) -> Result<(), std::io::Error> {
        let mreq = ip_mreq_source(group, interface, source);
        unsafe { set_option(self.as_raw_fd(), Ipv4Opt::IP_DROP_SOURCE_MEMBERSHIP, &mreq) }
    }
}

/// UDP socket used only to hold group memberships; needs no privileges.
#[derive(Debug)]
pub struct MembershipSocket {
    socket: c_int,
}

impl MembershipSocket {
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = unsafe { socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if socket < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { socket })
    }
}

impl MulticastMembership for MembershipSocket {}

impl Drop for MembershipSocket {
    fn drop(&mut self) {
        if self.socket < 0 {
            return;
        }
        unsafe { libc::close(self.socket) };
    }
}

impl AsRawFd for MembershipSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket
    }
}

/// Raw IPPROTO_IGMP socket. Received datagrams include the IPv4 header, sent
/// ones get it from the kernel.
#[derive(Debug)]
pub struct RawIgmpSocket {
    socket: c_int,
}

impl RawIgmpSocket {
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = unsafe { socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_IGMP) };
        if socket < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { socket })
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), std::io::Error> {
        let flags = unsafe { libc::fcntl(self.socket, libc::F_GETFL, 0) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let oldflags = flags;

        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };

        if flags == oldflags {
            return Ok(());
        }

        let code = unsafe { libc::fcntl(self.socket, libc::F_SETFL, flags) };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    pub fn set_multicast_ttl(&self, ttl: u8) -> Result<(), std::io::Error> {
        let ttl = ttl as c_int;
        unsafe { set_option(self.socket, Ipv4Opt::IP_MULTICAST_TTL, &ttl) }
    }

    pub fn set_multicast_loop(&self, loopback: bool) -> Result<(), std::io::Error> {
        let loopback: c_int = if loopback { 1 } else { 0 };
        unsafe { set_option(self.socket, Ipv4Opt::IP_MULTICAST_LOOP, &loopback) }
    }

    /// Outgoing interface for multicast sends.
    pub fn set_multicast_interface(&self, interface: &LocalInterface) -> Result<(), std::io::Error> {
        let mreq = ip_mreqn(Ipv4Addr::UNSPECIFIED, interface);
        unsafe { set_option(self.socket, Ipv4Opt::IP_MULTICAST_IF, &mreq) }
    }

    /// Adds (or removes) the router alert IP option on everything sent, as IGMP requires.
    pub fn set_router_alert(&self, router_alert: bool) -> Result<(), std::io::Error> {
        let options: &[u8] = if router_alert { &ROUTER_ALERT_OPTION } else { &[] };
        unsafe {
            set_option_bytes(self.socket, Ipv4Opt::IP_OPTIONS, options.as_ptr() as *const libc::c_void, options.len())
        }
    }

    pub fn recv(&self, packet: &mut packet::Packet) -> Result<(), std::io::Error> {
        let mut src: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut src_len = std::mem::size_of_val(&src) as libc::socklen_t;

        let len = unsafe {
            libc::recvfrom(
                self.socket,
                packet.data.as_mut_ptr() as *mut libc::c_void,
                packet.data.len(),
                0,
                &mut src as *mut _ as *mut libc::sockaddr,
                &mut src_len,
            )
        };
        if len < 0 {
            return Err(std::io::Error::last_os_error());
        }

        packet.data_len = (len as usize).min(packet.data.len());
        packet.target_addr = Ipv4Addr::from(src.sin_addr.s_addr.to_ne_bytes());
        Ok(())
    }

    pub fn recv_parser(&self, parser: &mut super::IgmpParser) -> Result<(), std::io::Error> {
        self.recv(&mut parser.packet)?;
        Ok(())
    }

    pub fn send(&self, packet: &packet::Packet) -> Result<(), std::io::Error> {
        let dst = sockaddr_in(packet.target_addr);
        let data = packet.data();

        let code = unsafe {
            libc::sendto(
                self.socket,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
                &dst as *const _ as *const libc::sockaddr,
                std::mem::size_of_val(&dst) as libc::socklen_t,
            )
        };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    pub fn send_writer(&self, writer: &super::IgmpWriter) -> Result<(), std::io::Error> {
        self.send(&writer.packet)
    }

    pub fn into_async(self) -> Result<AsyncIgmpSocket, std::io::Error> {
        AsyncIgmpSocket::new(self)
    }
}

impl MulticastMembership for RawIgmpSocket {}

impl Drop for RawIgmpSocket {
    fn drop(&mut self) {
        if self.socket < 0 {
            return;
        }
        unsafe { libc::close(self.socket) };
    }
}

impl AsRawFd for RawIgmpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket
    }
}

#[derive(Debug, Clone)]
pub struct AsyncIgmpSocket {
    inner: Arc<AsyncFd<RawIgmpSocket>>,
}

impl AsyncIgmpSocket {
    pub fn new(socket: RawIgmpSocket) -> Result<Self, std::io::Error> {
        socket.set_nonblocking(true)?;
        let inner = Arc::new(AsyncFd::with_interest(socket, Interest::READABLE | Interest::WRITABLE)?);
        Ok(Self { inner })
    }

    pub fn get_ref(&self) -> &RawIgmpSocket {
        self.inner.get_ref()
    }

    pub async fn recv(&self, packet: &mut packet::Packet) -> Result<(), std::io::Error> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv(packet)) {
                Ok(res) => {
                    return res;
                }

                Err(_) => continue,
            }
        }
    }

    pub async fn recv_parser(&self, parser: &mut super::IgmpParser) -> Result<(), std::io::Error> {
        self.recv(&mut parser.packet).await?;
        Ok(())
    }

    pub async fn send(&self, packet: &packet::Packet) -> Result<(), std::io::Error> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send(packet)) {
                Ok(res) => {
                    return res;
                }

                Err(_) => continue,
            }
        }
    }

    pub async fn send_writer(&self, writer: &super::IgmpWriter) -> Result<(), std::io::Error> {
        self.send(&writer.packet).await?;
        Ok(())
    }
}

pub trait SocketOpt {
    fn level(&self) -> c_int;
    fn optname(&self) -> c_int;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Opt(c_int);

impl SocketOpt for Ipv4Opt {
    fn level(&self) -> c_int {
        libc::IPPROTO_IP
    }

    fn optname(&self) -> c_int {
        self.0
    }
}

impl Ipv4Opt {
    pub const IP_OPTIONS: Self = Self(libc::IP_OPTIONS);
    pub const IP_MULTICAST_IF: Self = Self(libc::IP_MULTICAST_IF);
    pub const IP_MULTICAST_TTL: Self = Self(libc::IP_MULTICAST_TTL);
    pub const IP_MULTICAST_LOOP: Self = Self(libc::IP_MULTICAST_LOOP);
    pub const IP_ADD_MEMBERSHIP: Self = Self(libc::IP_ADD_MEMBERSHIP);
    pub const IP_DROP_MEMBERSHIP: Self = Self(libc::IP_DROP_MEMBERSHIP);
    pub const IP_UNBLOCK_SOURCE: Self = Self(libc::IP_UNBLOCK_SOURCE);
    pub const IP_BLOCK_SOURCE: Self = Self(libc::IP_BLOCK_SOURCE);
    pub const IP_ADD_SOURCE_MEMBERSHIP: Self = Self(libc::IP_ADD_SOURCE_MEMBERSHIP);
    pub const IP_DROP_SOURCE_MEMBERSHIP: Self = Self(libc::IP_DROP_SOURCE_MEMBERSHIP);
}

use std::ffi::CString;
use std::net::Ipv4Addr;

pub type InterfaceId = libc::c_uint;

pub fn index_to_name(index: InterfaceId) -> Result<String, std::io::Error> {
    let mut ifname_buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    let ret = unsafe { libc::if_indextoname(index, ifname_buf.as_mut_ptr()) };
    if ret.is_null() {
        return Err(std::io::Error::last_os_error());
    }

    let name = unsafe { std::ffi::CStr::from_ptr(ret as *const libc::c_char) };
    Ok(name.to_string_lossy().into_owned())
}

pub fn name_to_index(name: &str) -> Result<InterfaceId, std::io::Error> {
    let name = CString::new(name).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(index)
}

/// Local interface used for multicast membership and outgoing queries.
///
/// Either field may be left unspecified (`0.0.0.0` / index 0), in which case the
/// kernel picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInterface {
    pub address: Ipv4Addr,
    pub index: InterfaceId,
}

impl LocalInterface {
    pub const ANY: Self = Self {
        address: Ipv4Addr::UNSPECIFIED,
        index: 0,
    };

    pub fn by_address(address: Ipv4Addr) -> Self {
        Self {
            address,
            index: 0,
        }
    }

    pub fn by_name(name: &str) -> Result<Self, std::io::Error> {
        Ok(Self {
            address: Ipv4Addr::UNSPECIFIED,
            index: name_to_index(name)?,
        })
    }

    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl Default for LocalInterface {
    fn default() -> Self {
        Self::ANY
    }
}

impl std::fmt::Display for LocalInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.index != 0 {
            match index_to_name(self.index) {
                Ok(name) => write!(f, "{}", name)?,
                Err(_) => write!(f, "if#{}", self.index)?,
            }
            if !self.address.is_unspecified() {
                write!(f, " ({})", self.address)?;
            }
            Ok(())
        } else {
            write!(f, "{}", self.address)
        }
    }
}

pub mod config;
pub mod igmp;
pub mod interface;
pub mod util;

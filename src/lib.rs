//! ENM management server toolkit: the chassis expansion workflow and the
//! plumbing it drives (LITP REST model, MCollective agents, Onboard
//! Administrators over SSH).

pub mod clock;
pub mod config;
pub mod enclosure;
pub mod exit;
pub mod expansion;
pub mod interrupt;
pub mod litp;
pub mod logging;
pub mod rpc;
pub mod shell;
pub mod wait;

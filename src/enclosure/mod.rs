//! Onboard Administrator driver: typed commands, output parsers, active-OA
//! resolution and bounded waits on blade state.

mod command;
mod controller;
mod error;
mod parse;
mod transport;

pub use command::OaCommand;
pub use controller::{EbipaEntry, OnboardAdministrator};
pub use error::OaError;
pub use parse::{
    bay_serials, ebipa_servers, is_active, oa_network, server_list, server_names, OaNetwork,
    Serial, ServerBay,
};
pub use transport::{OaTransport, SshTransport};

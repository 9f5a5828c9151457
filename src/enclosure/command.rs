use std::fmt;

/// Onboard Administrator CLI commands, rendered exactly as the OA expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OaCommand {
    ShowOaStatus,
    ShowServerNames,
    ShowServerList,
    ShowEbipaServer,
    ShowOaNetwork,
    SetEbipaServer { ip: String, netmask: String, bay: u32 },
    SetEbipaGateway { gateway: String, bay: u32 },
    SetEbipaDomain { domain: String, bay: u32 },
    EnableEbipaServer { bay: u32 },
    DisableEbipaServer { bay: u32 },
    ClearEbipaServer { bay: u32 },
    ClearEbipaGateway { bay: u32 },
    SaveEbipa,
    PowerOnServer { bay: u32 },
    ResetServer { bay: u32 },
}

impl OaCommand {
    /// Read-only commands may go to either OA; everything else only to the
    /// active one.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            OaCommand::ShowOaStatus
                | OaCommand::ShowServerNames
                | OaCommand::ShowServerList
                | OaCommand::ShowEbipaServer
                | OaCommand::ShowOaNetwork
        )
    }
}

impl fmt::Display for OaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OaCommand::ShowOaStatus => f.write_str("SHOW OA STATUS"),
            OaCommand::ShowServerNames => f.write_str("SHOW SERVER NAMES"),
            OaCommand::ShowServerList => f.write_str("SHOW SERVER LIST"),
            OaCommand::ShowEbipaServer => f.write_str("SHOW EBIPA SERVER"),
            OaCommand::ShowOaNetwork => f.write_str("SHOW OA NETWORK"),
            OaCommand::SetEbipaServer { ip, netmask, bay } => {
                write!(f, "SET EBIPA SERVER {ip} {netmask} {bay}")
            }
            OaCommand::SetEbipaGateway { gateway, bay } => {
                write!(f, "SET EBIPA SERVER GATEWAY {gateway} {bay}")
            }
            OaCommand::SetEbipaDomain { domain, bay } => {
                write!(f, "SET EBIPA SERVER DOMAIN {domain} {bay}")
            }
            OaCommand::EnableEbipaServer { bay } => write!(f, "ENABLE EBIPA SERVER {bay}"),
            OaCommand::DisableEbipaServer { bay } => write!(f, "DISABLE EBIPA SERVER {bay}"),
            OaCommand::ClearEbipaServer { bay } => write!(f, "SET EBIPA SERVER NONE NONE {bay}"),
            OaCommand::ClearEbipaGateway { bay } => {
                write!(f, "SET EBIPA SERVER GATEWAY NONE {bay}")
            }
            OaCommand::SaveEbipa => f.write_str("SAVE EBIPA"),
            OaCommand::PowerOnServer { bay } => write!(f, "POWERON SERVER {bay}"),
            OaCommand::ResetServer { bay } => write!(f, "RESET SERVER {bay}"),
        }
    }
}

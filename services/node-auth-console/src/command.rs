//! Console command tokens.

use nodeauth_identity::Stage;

/// Everything the console can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ClientProvision,
    Stage(Stage),
    LockStatus,
    LockConfig,
    LockData,
    Info,
    SerialNumber,
    MacAddress,
    Status,
    Help,
}

#[derive(Debug)]
pub struct CommandSpec {
    pub token: &'static str,
    pub command: Command,
    pub description: &'static str,
}

/// Protocol commands first, then utilities, in menu order.
pub const COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        token: "client-provision",
        command: Command::ClientProvision,
        description: "Configure and load certificate data onto the secure element.",
    },
    CommandSpec {
        token: "client-build",
        command: Command::Stage(Stage::RebuildCerts),
        description: "Read certificate data off the secure element and rebuild full signer and device certificates.",
    },
    CommandSpec {
        token: "host-chain-verify",
        command: Command::Stage(Stage::VerifyChain),
        description: "Verify the certificate chain from the client.",
    },
    CommandSpec {
        token: "host-gen-chal",
        command: Command::Stage(Stage::GenerateChallenge),
        description: "Generate challenge for the client.",
    },
    CommandSpec {
        token: "client-gen-resp",
        command: Command::Stage(Stage::GenerateResponse),
        description: "Generate response to challenge from host.",
    },
    CommandSpec {
        token: "host-verify-resp",
        command: Command::Stage(Stage::VerifyResponse),
        description: "Verify the client response to the challenge.",
    },
    CommandSpec {
        token: "lockstat",
        command: Command::LockStatus,
        description: "zone lock status",
    },
    CommandSpec {
        token: "lockcfg",
        command: Command::LockConfig,
        description: "lock config zone",
    },
    CommandSpec {
        token: "lockdata",
        command: Command::LockData,
        description: "lock data and OTP zones",
    },
    CommandSpec {
        token: "info",
        command: Command::Info,
        description: "get the chip revision",
    },
    CommandSpec {
        token: "sernum",
        command: Command::SerialNumber,
        description: "get the chip serial number",
    },
    CommandSpec {
        token: "macaddress",
        command: Command::MacAddress,
        description: "get the mac address (not supported)",
    },
    CommandSpec {
        token: "status",
        command: Command::Status,
        description: "session state as JSON",
    },
    CommandSpec {
        token: "help",
        command: Command::Help,
        description: "show this menu",
    },
];

/// Look up a trimmed input line. Only whole tokens match.
pub fn parse(line: &str) -> Option<Command> {
    let token = line.trim();
    COMMAND_TABLE
        .iter()
        .find(|spec| spec.token == token)
        .map(|spec| spec.command)
}

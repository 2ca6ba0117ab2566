//! Command execution and console output.

use std::io::{self, Write};

use nodeauth_identity::{
    AuthError, CertRole, LockZone, Orchestrator, ProvisionOptions, Provisionable, Stage,
};
use tracing::warn;

use crate::command::{parse, Command, COMMAND_TABLE};

pub const PROMPT: &str = "$ ";

const HEX_LINE_WIDTH: usize = 16;

/// Operator console over one authentication orchestrator.
pub struct Console<E> {
    orchestrator: Orchestrator<E>,
}

impl<E: Provisionable> Console<E> {
    pub fn new(orchestrator: Orchestrator<E>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator<E> {
        &self.orchestrator
    }

    /// Execute one input line. Empty lines do nothing.
    pub async fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let Some(command) = parse(line) else {
            writeln!(out, "\nsyntax error in command: {line}")?;
            return Ok(());
        };

        match command {
            Command::Help => write_help(out),
            Command::LockStatus => self.lock_status(out).await,
            Command::LockConfig => self.lock_zone(LockZone::Config, out).await,
            Command::LockData => self.lock_zone(LockZone::Data, out).await,
            Command::Info => self.info(out).await,
            Command::SerialNumber => self.serial_number(out).await,
            // The element holds no symmetric MAC key.
            Command::MacAddress => writeln!(out, "\nmacaddress: not supported by this element"),
            Command::Status => self.status(out),
            Command::ClientProvision => self.provision(out).await,
            Command::Stage(stage) => self.stage(stage, out).await,
        }
    }

    async fn provision<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let result = match ProvisionOptions::now() {
            Ok(options) => self.orchestrator.provision(options).await,
            Err(err) => Err(AuthError::from(err)),
        };
        match result {
            Ok(chain) => {
                write_hex_block(
                    out,
                    "CLIENT: Root CA public key (trust anchor):",
                    chain.root_public_key.as_bytes(),
                )?;
                writeln!(out, "CLIENT: Provisioned signer {:04X}", chain.signer_id)
            }
            Err(err) => write_failure(out, "client_provision", &err),
        }
    }

    async fn stage<W: Write>(&mut self, stage: Stage, out: &mut W) -> io::Result<()> {
        if let Err(err) = self.orchestrator.advance(stage).await {
            return write_failure(out, stage.function_name(), &err);
        }

        let store = self.orchestrator.session().store();
        match stage {
            Stage::RebuildCerts => {
                write_hex_block(
                    out,
                    "CLIENT: Rebuilt Signer Certificate:",
                    store.certificate(CertRole::Signer).as_der(),
                )?;
                write_hex_block(
                    out,
                    "CLIENT: Rebuilt Device Certificate:",
                    store.certificate(CertRole::Device).as_der(),
                )
            }
            Stage::VerifyChain => {
                writeln!(
                    out,
                    "HOST: Signer certificate verified against signer certificate authority (CA) public key!"
                )?;
                writeln!(out, "HOST: Device certificate verified against signer public key!")
            }
            Stage::GenerateChallenge => match store.challenge() {
                Some(challenge) => {
                    write_hex_block(out, "HOST: Generated challenge:", challenge.as_bytes())
                }
                None => Ok(()),
            },
            Stage::GenerateResponse => match store.response() {
                Some(response) => write_hex_block(
                    out,
                    "CLIENT: Calculated response to host challenge:",
                    response.as_bytes(),
                ),
                None => Ok(()),
            },
            Stage::VerifyResponse => {
                if let Some(trusted) = self.orchestrator.trusted() {
                    write_hex_block(
                        out,
                        "HOST: Device public key from certificate:",
                        trusted.device_public_key().as_bytes(),
                    )?;
                }
                writeln!(out, "HOST: Device response to challenge verified!")
            }
        }
    }

    async fn lock_status<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let gateway = self.orchestrator.session().gateway();
        let config = gateway
            .run("lock status", |element| element.is_locked(LockZone::Config))
            .await;
        let config = match config {
            Ok(locked) => locked,
            Err(_) => return writeln!(out, "can't read cfg lock"),
        };
        let data = match gateway
            .run("lock status", |element| element.is_locked(LockZone::Data))
            .await
        {
            Ok(locked) => locked,
            Err(_) => return writeln!(out, "can't read data lock"),
        };

        writeln!(out, "Config Zone Lock: {}", lock_label(config))?;
        writeln!(out, "Data Zone Lock  : {}", lock_label(data))
    }

    async fn lock_zone<W: Write>(&self, zone: LockZone, out: &mut W) -> io::Result<()> {
        let result = self
            .orchestrator
            .session()
            .gateway()
            .run("lock", move |element| element.lock(zone))
            .await;
        if let Err(err) = result {
            warn!(%zone, error = %err, "Console :: lock refused");
            writeln!(out, "Could not lock {zone} zone")?;
        }
        self.lock_status(out).await
    }

    async fn info<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let result = self
            .orchestrator
            .session()
            .gateway()
            .run("info", |element| element.info())
            .await;
        match result {
            Ok(revision) => writeln!(out, "\nrevision:\n{}", hex::encode_upper(revision)),
            Err(err) => write_failure(out, "info", &err.into()),
        }
    }

    async fn serial_number<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let result = self
            .orchestrator
            .session()
            .gateway()
            .run("read serial number", |element| element.serial_number())
            .await;
        match result {
            Ok(serial) => writeln!(out, "\nserial number:\n{}", hex::encode_upper(serial)),
            Err(err) => writeln!(
                out,
                "\nReading serial number failed with error code 0x{:08X}",
                err.code()
            ),
        }
    }

    fn status<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let status = serde_json::to_string_pretty(&self.orchestrator.status())?;
        writeln!(out, "{status}")
    }
}

fn lock_label(locked: bool) -> &'static str {
    if locked {
        "locked"
    } else {
        "unlocked"
    }
}

fn write_failure<W: Write>(out: &mut W, function: &str, err: &AuthError) -> io::Result<()> {
    writeln!(out, "{function} failed with error code 0x{:X}", err.code())
}

pub fn write_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "\nUsage:")?;
    let (protocol, utilities): (Vec<_>, Vec<_>) = COMMAND_TABLE.iter().partition(|spec| {
        matches!(spec.command, Command::ClientProvision | Command::Stage(_))
    });
    for spec in protocol {
        writeln!(out, "{:<17} - {}", spec.token, spec.description)?;
    }
    writeln!(out, "Utility functions:")?;
    for spec in utilities {
        writeln!(out, "{:<8} - {}", spec.token, spec.description)?;
    }
    writeln!(out)
}

/// Labelled upper-case hex, 16 bytes per line.
pub fn write_hex_block<W: Write>(out: &mut W, label: &str, bytes: &[u8]) -> io::Result<()> {
    writeln!(out, "{label}")?;
    for line in bytes.chunks(HEX_LINE_WIDTH) {
        let hex: Vec<String> = line.iter().map(|byte| format!("{byte:02X}")).collect();
        writeln!(out, "{}", hex.join(" "))?;
    }
    Ok(())
}

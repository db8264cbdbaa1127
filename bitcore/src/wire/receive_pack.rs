//! Receive-pack (push, spec §4.9): ref advertisement (shared with
//! [`super::upload_pack`] via [`super::advertised_refs`]), command parsing,
//! raw packfile ingestion, and per-ref status reporting. Grounded on the
//! teacher crate's `bit-receive-pack` binary for the overall shape of a
//! push handler; that binary stops at printing the received commands, so
//! the pack ingestion and ref-update report below are new.

use std::io::prelude::*;

use crate::error::{BitError, BitErrorExt, BitResult};
use crate::hash::Oid;
use crate::pack::indexer;
use crate::repo::Repo;

use super::pktline::{PktLine, PktLineReader, PktLineWriter};
use super::{Capabilities, WireLimits};

/// One `<old-id> <new-id> <ref-name>` push command (spec §4.9): a zero id
/// on either side means "ref doesn't exist" — `old` zero is a create,
/// `new` zero is a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub old: Oid,
    pub new: Oid,
    pub name: String,
}

impl Command {
    pub fn is_create(&self) -> bool {
        self.old.is_unknown()
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_unknown()
    }
}

#[derive(Debug, Clone)]
pub enum CommandStatus {
    Ok,
    Rejected(String),
}

pub struct ReceivePack<'r> {
    repo: &'r Repo,
    limits: WireLimits,
}

impl<'r> ReceivePack<'r> {
    pub fn new(repo: &'r Repo) -> BitResult<Self> {
        Ok(Self { repo, limits: WireLimits::from_config(repo)? })
    }

    pub fn advertise_refs(&self, writer: &mut PktLineWriter<impl Write>, service: Option<&str>) -> BitResult<()> {
        let refs = super::advertised_refs(self.repo)?;
        super::write_ref_advertisement(writer, &refs, &super::capability_string(self.repo)?, service)
    }

    /// Reads commands and the pack that follows them, applies every
    /// command whose precondition still holds, and writes the
    /// `unpack ok|<error>` + per-ref status report (spec §4.9).
    pub fn run(&self, reader: &mut impl BufRead, writer: &mut impl Write) -> BitResult<()> {
        let mut pkt_reader = PktLineReader::new(reader);
        let (commands, _caps) = self.read_commands(&mut pkt_reader)?;
        let mut pkt_writer = PktLineWriter::new(writer);

        if commands.is_empty() {
            return Ok(());
        }

        let unpack_result = self.unpack(pkt_reader.into_inner());
        let statuses = match &unpack_result {
            Ok(()) => self.apply_commands(&commands),
            Err(_) => commands.iter().map(|_| CommandStatus::Rejected("unpack failed".to_owned())).collect(),
        };

        self.write_report(&mut pkt_writer, &unpack_result, &commands, &statuses)
    }

    /// Reads the command lines up to the flush that precedes the pack
    /// (caps follow a NUL on the first line, same convention as `want`).
    fn read_commands(&self, reader: &mut PktLineReader<impl BufRead>) -> BitResult<(Vec<Command>, Capabilities)> {
        let mut commands = vec![];
        let mut caps = Capabilities::default();
        let mut first = true;
        loop {
            match reader.read_line()? {
                PktLine::Flush => break,
                PktLine::Data(bytes) => {
                    let line = String::from_utf8_lossy(&bytes);
                    let mut line = line.trim_end();
                    if first {
                        if let Some(nul) = line.find('\0') {
                            caps = Capabilities::parse(&line[nul + 1..]);
                            line = &line[..nul];
                        }
                        first = false;
                    }

                    let mut parts = line.splitn(3, ' ');
                    let (old, new, name) = (
                        parts.next().ok_or_else(|| BitError::Negotiation("missing old id".to_owned()))?,
                        parts.next().ok_or_else(|| BitError::Negotiation("missing new id".to_owned()))?,
                        parts.next().ok_or_else(|| BitError::Negotiation("missing ref name".to_owned()))?,
                    );
                    if name.len() as u32 > self.limits.max_ref_name_length {
                        return Err(BitError::LimitExceeded(format!(
                            "ref name `{}` exceeds {} bytes",
                            name, self.limits.max_ref_name_length
                        ))
                        .into());
                    }
                    commands.push(Command { old: old.parse()?, new: new.parse()?, name: name.to_owned() });
                }
                other => {
                    return Err(
                        BitError::Negotiation(format!("unexpected line in command list: {:?}", other)).into()
                    )
                }
            }
        }
        Ok((commands, caps))
    }

    /// Unpacks the trailing packfile bytes directly to loose storage,
    /// mirroring git's behaviour for a small push (`unpack-objects` rather
    /// than keeping a second `.pack`/`.idx` pair around for one commit).
    fn unpack(&self, mut reader: impl BufRead) -> BitResult<()> {
        let mut bytes = vec![];
        reader.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let (_index, objects) = indexer::scan(&bytes, &self.repo.odb)?;
        for obj in &objects {
            self.repo.write_obj(obj)?;
        }
        Ok(())
    }

    /// Applies each command's ref update under CAS against `old`,
    /// independently of the others — one command's rejection doesn't
    /// block the rest (spec §4.9 "each ref is reported separately"). A
    /// create (`old` all-zero) additionally requires the ref not already
    /// exist, since [`crate::refs::store::FileRefStore::set`]'s `None`
    /// CAS argument means "no check" rather than "must be absent".
    fn apply_commands(&self, commands: &[Command]) -> Vec<CommandStatus> {
        commands
            .iter()
            .map(|cmd| {
                let result = if cmd.is_create() {
                    match self.repo.refs.resolve(&cmd.name) {
                        Ok(Some(_)) => Err(BitError::RefAlreadyExists(cmd.name.clone()).into()),
                        Ok(None) => self.repo.refs.set(&cmd.name, cmd.new, None),
                        Err(err) => Err(err),
                    }
                } else if cmd.is_delete() {
                    self.repo.refs.delete(&cmd.name, Some(cmd.old))
                } else {
                    self.repo.refs.set(&cmd.name, cmd.new, Some(cmd.old))
                };
                match result {
                    Ok(()) => CommandStatus::Ok,
                    Err(err) => CommandStatus::Rejected(err.to_string()),
                }
            })
            .collect()
    }

    fn write_report(
        &self,
        writer: &mut PktLineWriter<impl Write>,
        unpack_result: &BitResult<()>,
        commands: &[Command],
        statuses: &[CommandStatus],
    ) -> BitResult<()> {
        match unpack_result {
            Ok(()) => writer.write_text("unpack ok\n")?,
            Err(err) => writer.write_text(format!("unpack {}\n", err))?,
        }
        for (cmd, status) in commands.iter().zip(statuses) {
            match status {
                CommandStatus::Ok => writer.write_text(format!("ok {}\n", cmd.name))?,
                CommandStatus::Rejected(reason) => writer.write_text(format!("ng {} {}\n", cmd.name, reason))?,
            }
        }
        writer.write_flush()
    }
}

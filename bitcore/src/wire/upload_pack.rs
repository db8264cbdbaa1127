//! Upload-pack (fetch, spec §4.9): ref advertisement, want/have
//! negotiation, and a generated pack of everything the client asked for
//! that it doesn't already have. Grounded on the teacher crate's
//! `bit-upload-pack/src/main.rs` for the ref-advertisement shape
//! (`CAPABILITIES`, `write_ref_discovery`); that binary never implements
//! negotiation past the ref advertisement, so the want/have loop, object
//! closure, and pack streaming below are new.

use std::collections::HashSet;
use std::io::prelude::*;

use crate::error::{BitError, BitErrorExt, BitResult};
use crate::hash::Oid;
use crate::obj::BitObjKind;
use crate::pack::writer::{PackWriter, PackWriterConfig};
use crate::repo::Repo;

use super::pktline::{PktLine, PktLineReader, PktLineWriter};
use super::{
    advertised_refs, capability_string, write_ref_advertisement, Capabilities, Channel, MultiAck,
    SidebandWriter, WireLimits,
};

pub struct UploadPack<'r> {
    repo: &'r Repo,
    limits: WireLimits,
}

impl<'r> UploadPack<'r> {
    pub fn new(repo: &'r Repo) -> BitResult<Self> {
        Ok(Self { repo, limits: WireLimits::from_config(repo)? })
    }

    /// Writes the ref advertisement a client reads before sending its
    /// first `want` line. `service` is `Some("git-upload-pack")` for the
    /// smart-HTTP `info/refs?service=...` response, `None` for a plain
    /// connection (spec §6).
    pub fn advertise_refs(&self, writer: &mut PktLineWriter<impl Write>, service: Option<&str>) -> BitResult<()> {
        let refs = advertised_refs(self.repo)?;
        write_ref_advertisement(writer, &refs, &capability_string(self.repo)?, service)
    }

    /// Runs the want/have negotiation and streams the resulting pack.
    /// Returns with nothing written if the client sends an empty want
    /// list (a bare ref probe).
    pub fn run(&self, reader: &mut impl BufRead, writer: &mut impl Write) -> BitResult<()> {
        let mut reader = PktLineReader::new(reader);

        let (wants, caps) = self.read_wants(&mut reader)?;
        if wants.is_empty() {
            return Ok(());
        }

        let multi_ack = MultiAck::negotiate(&caps);
        let use_sideband = caps.contains("side-band-64k") || caps.contains("side-band");
        let mut pkt_writer = PktLineWriter::new(writer);

        let haves = match self.negotiate(&mut reader, &mut pkt_writer, multi_ack) {
            Ok(haves) => haves,
            Err(err) => return self.abort(&mut pkt_writer, use_sideband, caps.contains("side-band-64k"), err),
        };

        let result = self.send_pack(&wants, &haves, &mut pkt_writer, use_sideband, caps.contains("side-band-64k"));
        if let Err(err) = result {
            return self.abort(&mut pkt_writer, use_sideband, caps.contains("side-band-64k"), err);
        }
        Ok(())
    }

    fn send_pack(
        &self,
        wants: &[Oid],
        haves: &[Oid],
        pkt_writer: &mut PktLineWriter<impl Write>,
        use_sideband: bool,
        use_64k: bool,
    ) -> BitResult<()> {
        let mut have_closure = HashSet::new();
        for &oid in haves {
            have_closure.extend(object_closure(self.repo, &[oid])?);
        }
        let wanted = object_closure(self.repo, wants)?;
        let mut to_send: Vec<Oid> = wanted.difference(&have_closure).copied().collect();
        to_send.sort();

        let objects: Vec<BitObjKind> =
            to_send.iter().map(|&oid| self.repo.read_obj(oid)).collect::<BitResult<_>>()?;
        let pack_bytes = PackWriter::new(PackWriterConfig::default()).write_to_vec(&objects)?;

        if use_sideband {
            let mut sideband = SidebandWriter::new(PktLineWriter::new(pkt_writer.inner_mut()), use_64k);
            sideband.write_channel(Channel::Pack, &pack_bytes)?;
            sideband.flush()
        } else {
            pkt_writer.write_data(pack_bytes)
        }
    }

    /// Wire errors during negotiation or pack generation abort the
    /// connection with a side-band channel-3 message when side-band was
    /// negotiated, or a plain error pkt-line otherwise (spec §7).
    fn abort(
        &self,
        pkt_writer: &mut PktLineWriter<impl Write>,
        use_sideband: bool,
        use_64k: bool,
        err: crate::error::BitGenericError,
    ) -> BitResult<()> {
        let message = format!("ERR {}\n", err);
        if use_sideband {
            let mut sideband = SidebandWriter::new(PktLineWriter::new(pkt_writer.inner_mut()), use_64k);
            sideband.write_channel(Channel::Error, message.as_bytes())?;
        } else {
            pkt_writer.write_text(message)?;
        }
        Err(err)
    }

    /// Reads `want` lines up to the first flush; `shallow`/`deepen` lines
    /// are accepted and ignored (shallow clones are out of scope). Returns
    /// the wanted ids and the capabilities carried after the NUL on the
    /// first `want` line.
    fn read_wants(&self, reader: &mut PktLineReader<impl BufRead>) -> BitResult<(Vec<Oid>, Capabilities)> {
        let mut wants = vec![];
        let mut caps = Capabilities::default();
        let mut first = true;
        loop {
            match reader.read_line()? {
                PktLine::Flush => break,
                PktLine::Data(bytes) => {
                    let line = String::from_utf8_lossy(&bytes);
                    let line = line.trim_end();
                    let Some(rest) = line.strip_prefix("want ") else { continue };

                    let id_str = if first {
                        match rest.split_once(' ') {
                            Some((id, rest_caps)) => {
                                caps = Capabilities::parse(rest_caps);
                                if caps.len() as u32 > self.limits.max_capabilities {
                                    return Err(BitError::LimitExceeded(format!(
                                        "client sent {} capabilities, limit is {}",
                                        caps.len(),
                                        self.limits.max_capabilities
                                    ))
                                    .into());
                                }
                                id
                            }
                            None => rest,
                        }
                    } else {
                        rest
                    };
                    first = false;

                    wants.push(id_str.parse::<Oid>()?);
                    if wants.len() as u32 > self.limits.max_wants {
                        return Err(BitError::LimitExceeded(format!(
                            "client sent more than {} wants",
                            self.limits.max_wants
                        ))
                        .into());
                    }
                }
                other => {
                    return Err(
                        BitError::Negotiation(format!("unexpected line in want list: {:?}", other)).into()
                    )
                }
            }
        }
        Ok((wants, caps))
    }

    /// The have/ack rounds (spec §4.9): batches of `have` lines terminated
    /// by a flush, each ACKed per the negotiated [`MultiAck`] mode, until
    /// the client sends `done`.
    fn negotiate(
        &self,
        reader: &mut PktLineReader<impl BufRead>,
        writer: &mut PktLineWriter<impl Write>,
        multi_ack: MultiAck,
    ) -> BitResult<Vec<Oid>> {
        let mut haves = vec![];
        let mut rounds = 0u32;
        loop {
            rounds += 1;
            if rounds > self.limits.max_rounds {
                return Err(BitError::LimitExceeded(format!(
                    "negotiation exceeded {} rounds",
                    self.limits.max_rounds
                ))
                .into());
            }

            let mut round_haves = vec![];
            let mut done = false;
            loop {
                match reader.read_line()? {
                    PktLine::Flush => break,
                    PktLine::Data(bytes) => {
                        let line = String::from_utf8_lossy(&bytes);
                        let line = line.trim_end();
                        if line == "done" {
                            done = true;
                            break;
                        }
                        if let Some(id) = line.strip_prefix("have ") {
                            round_haves.push(id.parse::<Oid>()?);
                        }
                    }
                    other => {
                        return Err(BitError::Negotiation(format!(
                            "unexpected line during negotiation: {:?}",
                            other
                        ))
                        .into())
                    }
                }
            }

            for &oid in &round_haves {
                if self.repo.odb.has(oid).unwrap_or(false) {
                    match multi_ack {
                        MultiAck::None => {}
                        MultiAck::Basic => writer.write_text(format!("ACK {}\n", oid.hex()))?,
                        MultiAck::Detailed => writer.write_text(format!("ACK {} common\n", oid.hex()))?,
                    }
                }
            }
            haves.extend(round_haves);
            if haves.len() as u32 > self.limits.max_haves {
                return Err(
                    BitError::LimitExceeded(format!("client sent more than {} haves", self.limits.max_haves))
                        .into(),
                );
            }

            if done {
                let final_common = haves.iter().rev().find(|&&oid| self.repo.odb.has(oid).unwrap_or(false));
                match final_common {
                    Some(&oid) => writer.write_text(format!("ACK {}\n", oid.hex()))?,
                    None => writer.write_text("NAK\n")?,
                }
                break;
            }
            if multi_ack == MultiAck::None {
                writer.write_text("NAK\n")?;
            }
        }
        Ok(haves)
    }
}

/// Every object reachable from `roots`: each commit plus its ancestry,
/// each commit's tree and everything that tree reaches, and (for an
/// annotated tag root) the object it points at. Distinct from
/// [`crate::history::commit_walk::ancestors_of`], which only walks commit
/// parentage — upload-pack's want/have diff needs the full object graph,
/// not just the commit graph.
pub fn object_closure(repo: &Repo, roots: &[Oid]) -> BitResult<HashSet<Oid>> {
    let mut seen = HashSet::new();
    let mut stack: Vec<Oid> = roots.to_vec();
    while let Some(oid) = stack.pop() {
        if !seen.insert(oid) {
            continue;
        }
        match repo.read_obj(oid) {
            Ok(BitObjKind::Commit(commit)) => {
                stack.push(commit.tree);
                stack.extend(commit.parents);
            }
            Ok(BitObjKind::Tree(tree)) => stack.extend(tree.entries.into_iter().map(|e| e.oid)),
            Ok(BitObjKind::Tag(tag)) => stack.push(tag.target),
            Ok(BitObjKind::Blob(..)) => {}
            // A `have` the client sent for an object we don't actually hold
            // (e.g. from an unrelated history) contributes nothing to the
            // closure rather than aborting the whole negotiation.
            Err(err) if err.is_not_found_err() => {
                seen.remove(&oid);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepo;
    use crate::wire::pktline::{encode, PktLine};

    fn want_request(oid: Oid, caps: &str) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend(encode(&PktLine::text(format!("want {} {}\n", oid.hex(), caps))).unwrap());
        buf.extend(encode(&PktLine::Flush).unwrap());
        buf.extend(encode(&PktLine::text("done\n")).unwrap());
        buf
    }

    #[test]
    fn object_closure_reaches_blobs_through_tree_and_commit() {
        let t = TestRepo::init();
        let blob = t.blob(b"file contents");
        let tree = t.tree([(crate::obj::FileMode::REG, "a.txt", blob)]);
        let commit = t.commit_with_tree(tree, &[], "one", 100);

        let closure = object_closure(&t.repo, &[commit]).unwrap();
        assert!(closure.contains(&commit));
        assert!(closure.contains(&tree));
        assert!(closure.contains(&blob));
    }

    #[test]
    fn empty_want_list_produces_no_output() {
        let t = TestRepo::init();
        let up = UploadPack::new(&t.repo).unwrap();
        let mut input: &[u8] = b"0000";
        let mut out = vec![];
        up.run(&mut input, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn negotiation_with_no_haves_sends_a_full_pack() {
        let t = TestRepo::init();
        let blob = t.blob(b"hello");
        let tree = t.tree([(crate::obj::FileMode::REG, "f", blob)]);
        let commit = t.commit_with_tree(tree, &[], "one", 100);

        let up = UploadPack::new(&t.repo).unwrap();
        let request = want_request(commit, "side-band-64k agent=test");
        let mut input = request.as_slice();
        let mut out = vec![];
        up.run(&mut input, &mut out).unwrap();
        assert!(!out.is_empty());
    }
}

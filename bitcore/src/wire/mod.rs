//! L8: the smart-HTTP wire protocol (spec §4.9, §6). Capability
//! advertisement, ref advertisement, and side-band framing are grounded on
//! the teacher crate's `bit-upload-pack/src/main.rs` (`CAPABILITIES`
//! constant, `write_ref_discovery`) and `libbit/src/protocol.rs`
//! (`BitProtocolRead`/`BitProtocolWrite`); both are async over
//! `tokio::io`, so only their framing and ordering is reused here — see
//! [`pktline`] and DESIGN.md for the synchronous-over-`std::io`
//! divergence this module takes instead. [`upload_pack`] and
//! [`receive_pack`] implement the two smart-HTTP services themselves.

pub mod pktline;
pub mod receive_pack;
pub mod upload_pack;

use std::io::prelude::*;

use crate::error::BitResult;
use crate::hash::Oid;
use crate::obj::BitObjKind;
use crate::repo::Repo;

use pktline::PktLineWriter;

/// `agent=` token this implementation advertises, distinct from the
/// teacher crate's own `agent=bit`.
pub const AGENT: &str = "agent=bitcore";

/// The capability set every ref advertisement offers (spec §4.9), minus
/// `symref`/`agent`, which are computed per-repository by
/// [`capability_string`].
pub const CAPABILITIES: &[&str] = &[
    "multi_ack",
    "multi_ack_detailed",
    "thin-pack",
    "side-band",
    "side-band-64k",
    "ofs-delta",
    "shallow",
    "deepen-since",
    "deepen-not",
    "deepen-relative",
    "no-progress",
    "include-tag",
    "object-format=sha1",
];

/// The full capability line advertised for `repo`: the constant set plus
/// `symref=HEAD:<target>` (only present while `HEAD` is attached to a
/// branch) and this crate's `agent` token.
pub fn capability_string(repo: &Repo) -> BitResult<String> {
    let mut caps: Vec<String> = CAPABILITIES.iter().map(|s| s.to_string()).collect();
    if let Some(target) = repo.refs.get_symbolic("HEAD")? {
        caps.push(format!("symref=HEAD:{}", target));
    }
    caps.push(AGENT.to_owned());
    Ok(caps.join(" "))
}

/// A capability string received from a peer (the tokens after the NUL on
/// the first want/command/ref-advertisement line).
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    tokens: Vec<String>,
}

impl Capabilities {
    pub fn parse(s: &str) -> Self {
        Self { tokens: s.split_whitespace().map(str::to_owned).collect() }
    }

    pub fn contains(&self, name: &str) -> bool {
        let with_eq = format!("{}=", name);
        self.tokens.iter().any(|t| t == name || t.starts_with(&with_eq))
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}=", name);
        self.tokens.iter().find_map(|t| t.strip_prefix(prefix.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

/// Which of the three negotiated ACK behaviours (spec §4.9) upload-pack
/// should use, chosen from the capabilities the client sent with its
/// first `want` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiAck {
    None,
    Basic,
    Detailed,
}

impl MultiAck {
    pub fn negotiate(caps: &Capabilities) -> Self {
        if caps.contains("multi_ack_detailed") {
            Self::Detailed
        } else if caps.contains("multi_ack") {
            Self::Basic
        } else {
            Self::None
        }
    }
}

/// Side-band channels a packed response may be split across (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Pack = 1,
    Progress = 2,
    Error = 3,
}

/// Wraps pack/progress/error bytes in side-band-framed pkt-lines, chunked
/// to the negotiated channel's maximum (`side-band-64k` vs plain
/// `side-band`'s 1000-byte pkt-lines), each chunk carrying the channel
/// number as its first byte.
pub struct SidebandWriter<W> {
    writer: PktLineWriter<W>,
    chunk_size: usize,
}

impl<W: Write> SidebandWriter<W> {
    const CHUNK_64K: usize = pktline::MAX_PKT_LINE_PAYLOAD - 1;
    const CHUNK_SMALL: usize = 1000 - 1;

    pub fn new(writer: PktLineWriter<W>, use_64k: bool) -> Self {
        let chunk_size = if use_64k { Self::CHUNK_64K } else { Self::CHUNK_SMALL };
        Self { writer, chunk_size }
    }

    pub fn write_channel(&mut self, channel: Channel, payload: &[u8]) -> BitResult<()> {
        if payload.is_empty() {
            return Ok(());
        }
        for chunk in payload.chunks(self.chunk_size) {
            let mut framed = Vec::with_capacity(chunk.len() + 1);
            framed.push(channel as u8);
            framed.extend_from_slice(chunk);
            self.writer.write_data(framed)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> BitResult<()> {
        self.writer.write_flush()
    }

    pub fn into_inner(self) -> PktLineWriter<W> {
        self.writer
    }
}

/// One ref as shown to a peer: its id, name, and (for an annotated tag)
/// the id it peels down to.
#[derive(Debug, Clone)]
pub struct AdvertisedRef {
    pub oid: Oid,
    pub name: String,
    pub peeled: Option<Oid>,
}

/// Every ref worth advertising (spec §4.9): `HEAD` first (if born), then
/// every other ref in name order, each peeled if it's an annotated tag.
pub fn advertised_refs(repo: &Repo) -> BitResult<Vec<AdvertisedRef>> {
    let mut refs = vec![];
    if let Some(head_oid) = repo.resolve_head()? {
        refs.push(AdvertisedRef { oid: head_oid, name: "HEAD".to_owned(), peeled: None });
    }
    let mut names = repo.refs.list("refs/")?;
    names.sort();
    for name in names {
        let Some(oid) = repo.refs.resolve(&name)? else { continue };
        let peeled = peel_to_non_tag(repo, oid)?;
        refs.push(AdvertisedRef { oid, name, peeled });
    }
    Ok(refs)
}

/// `Some(target)` if `oid` is an annotated tag, peeled all the way down
/// to the first non-tag object it ultimately points at; `None` otherwise.
fn peel_to_non_tag(repo: &Repo, oid: Oid) -> BitResult<Option<Oid>> {
    let BitObjKind::Tag(tag) = repo.read_obj(oid)? else { return Ok(None) };
    let mut target = tag.target;
    loop {
        match repo.read_obj(target)? {
            BitObjKind::Tag(t) => target = t.target,
            _ => return Ok(Some(target)),
        }
    }
}

/// Writes a complete ref advertisement (spec §4.9): capabilities after a
/// NUL on the first ref line, peeled lines for annotated tags, terminated
/// by a flush. `service`, when given, prefixes the smart-HTTP
/// `# service=<name>` pkt-line + flush that `info/refs?service=...`
/// responses carry (spec §6) ahead of the same ref lines a plain
/// upload-pack/receive-pack connection sends without it.
pub fn write_ref_advertisement(
    writer: &mut PktLineWriter<impl Write>,
    refs: &[AdvertisedRef],
    capabilities: &str,
    service: Option<&str>,
) -> BitResult<()> {
    if let Some(service) = service {
        writer.write_text(format!("# service={}\n", service))?;
        writer.write_flush()?;
    }

    if refs.is_empty() {
        writer.write_text(format!("{} capabilities^{{}}\0{}\n", Oid::UNKNOWN.hex(), capabilities))?;
    } else {
        for (i, r) in refs.iter().enumerate() {
            if i == 0 {
                writer.write_text(format!("{} {}\0{}\n", r.oid.hex(), r.name, capabilities))?;
            } else {
                writer.write_text(format!("{} {}\n", r.oid.hex(), r.name))?;
            }
            if let Some(peeled) = r.peeled {
                writer.write_text(format!("{} {}^{{}}\n", peeled.hex(), r.name))?;
            }
        }
    }
    writer.write_flush()
}

/// Per-connection bounds (spec §4.9 "validation limits"), read from
/// `Config`'s `wire.*` keys.
#[derive(Debug, Clone, Copy)]
pub struct WireLimits {
    pub max_rounds: u32,
    pub max_wants: u32,
    pub max_haves: u32,
    pub max_capabilities: u32,
    pub max_ref_name_length: u32,
    pub timeout: u64,
}

impl WireLimits {
    pub fn from_config(repo: &Repo) -> BitResult<Self> {
        let config = repo.config();
        Ok(Self {
            max_rounds: config.max_rounds()?,
            max_wants: config.max_wants()?,
            max_haves: config.max_haves()?,
            max_capabilities: config.max_capabilities()?,
            max_ref_name_length: config.max_ref_name_length()?,
            timeout: config.timeout()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepo;

    #[test]
    fn capabilities_parse_and_detect_value_tokens() {
        let caps = Capabilities::parse("multi_ack_detailed side-band-64k symref=HEAD:refs/heads/main agent=git/2.3");
        assert!(caps.contains("multi_ack_detailed"));
        assert!(caps.contains("side-band-64k"));
        assert_eq!(caps.value("symref"), Some("HEAD:refs/heads/main"));
        assert_eq!(caps.value("agent"), Some("git/2.3"));
        assert!(!caps.contains("thin-pack"));
    }

    #[test]
    fn multi_ack_negotiates_the_strongest_supported_mode() {
        assert_eq!(MultiAck::negotiate(&Capabilities::parse("multi_ack_detailed multi_ack")), MultiAck::Detailed);
        assert_eq!(MultiAck::negotiate(&Capabilities::parse("multi_ack")), MultiAck::Basic);
        assert_eq!(MultiAck::negotiate(&Capabilities::parse("thin-pack")), MultiAck::None);
    }

    #[test]
    fn advertised_refs_puts_head_first_and_peels_tags() {
        let t = TestRepo::init();
        let c1 = t.commit_on_top(&[], "one", 100);
        t.repo.refs.set("refs/heads/master", c1, None).unwrap();
        t.repo.refs.set_symbolic("HEAD", "refs/heads/master").unwrap();

        let tag = crate::obj::BitObjKind::Tag(crate::obj::Tag {
            target: c1,
            target_type: crate::obj::BitObjType::Commit,
            name: "v1".to_owned(),
            tagger: None,
            message: "release\n".to_owned(),
            signature: None,
        });
        let tag_oid = t.repo.write_obj(&tag).unwrap();
        t.repo.refs.set("refs/tags/v1", tag_oid, None).unwrap();

        let refs = advertised_refs(&t.repo).unwrap();
        assert_eq!(refs[0].name, "HEAD");
        assert_eq!(refs[0].oid, c1);

        let tag_ref = refs.iter().find(|r| r.name == "refs/tags/v1").unwrap();
        assert_eq!(tag_ref.oid, tag_oid);
        assert_eq!(tag_ref.peeled, Some(c1));
    }

    #[test]
    fn ref_advertisement_carries_capabilities_on_first_line_only() {
        let t = TestRepo::init();
        let c1 = t.commit_on_top(&[], "one", 100);
        t.repo.refs.set("refs/heads/master", c1, None).unwrap();

        let refs = advertised_refs(&t.repo).unwrap();
        let mut out = vec![];
        write_ref_advertisement(&mut PktLineWriter::new(&mut out), &refs, "side-band agent=bitcore", None)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(&format!("{} refs/heads/master\0side-band agent=bitcore\n", c1.hex())));
        assert!(text.ends_with("0000"));
    }
}

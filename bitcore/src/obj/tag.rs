//! Tag: `{target_id, target_kind, name, tagger?, message, signature?}`
//! (spec §3). The teacher crate's `obj/tag.rs` is an unimplemented stub
//! (`todo!()` throughout); only its owner/inner-wrapper shape is grounded on
//! it, the serialization logic follows git's own annotated-tag format.

use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;

use super::{BitObject, BitObjType};
use crate::error::BitResult;
use crate::hash::Oid;
use crate::io::BufReadExt;
use crate::serialize::{DeserializeSized, Serialize};
use crate::signature::BitSignature;

const SIGNATURE_MARKER: &str = "-----BEGIN PGP SIGNATURE-----";

#[derive(PartialEq, Debug, Clone)]
pub struct Tag {
    pub target: Oid,
    pub target_type: BitObjType,
    pub name: String,
    pub tagger: Option<BitSignature>,
    pub message: String,
    /// A detached PGP signature over everything preceding it, stored
    /// separately from `message` (appended back on serialization).
    pub signature: Option<String>,
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Serialize for Tag {
    fn serialize(&self, writer: &mut dyn Write) -> BitResult<()> {
        writeln!(writer, "object {}", self.target)?;
        writeln!(writer, "type {}", self.target_type)?;
        writeln!(writer, "tag {}", self.name)?;
        if let Some(tagger) = &self.tagger {
            writeln!(writer, "tagger {}", tagger)?;
        }
        writer.write_all(b"\n")?;
        writer.write_all(self.message.as_bytes())?;
        if let Some(signature) = &self.signature {
            writer.write_all(b"\n")?;
            writer.write_all(signature.as_bytes())?;
        }
        Ok(())
    }
}

impl DeserializeSized for Tag {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> BitResult<Self> {
        let mut r = reader.take(size);

        let mut target = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;

        loop {
            let line = r.read_ascii_str(b'\n')?;
            if line.is_empty() {
                break;
            }
            let (key, value) =
                line.split_once(' ').ok_or_else(|| anyhow!("malformed tag header `{}`", line))?;
            match key {
                "object" => target = Some(value.parse()?),
                "type" => target_type = Some(value.parse()?),
                "tag" => name = Some(value.to_owned()),
                "tagger" => tagger = Some(value.parse()?),
                other => bail!("unexpected tag header `{}`", other),
            }
        }

        let mut body = String::new();
        r.read_to_string(&mut body)?;

        let (message, signature) = match body.find(SIGNATURE_MARKER) {
            Some(idx) => (body[..idx].to_owned(), Some(body[idx..].to_owned())),
            None => (body, None),
        };

        Ok(Self {
            target: target.ok_or_else(|| anyhow!("tag missing `object` header"))?,
            target_type: target_type.ok_or_else(|| anyhow!("tag missing `type` header"))?,
            name: name.ok_or_else(|| anyhow!("tag missing `tag` header"))?,
            tagger,
            message,
            signature,
        })
    }
}

impl BitObject for Tag {
    fn obj_type(&self) -> BitObjType {
        BitObjType::Tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha1;
    use crate::obj::BitObjKind;
    use std::str::FromStr;

    #[test]
    fn lightweight_style_tag_round_trips() {
        let tag = Tag {
            target: sha1(b"blob 0\0"),
            target_type: BitObjType::Blob,
            name: "v1.0.0".to_owned(),
            tagger: Some(BitSignature::from_str("A U Thor <a@u.test> 1600000000 +0000").unwrap()),
            message: "release\n".to_owned(),
            signature: None,
        };
        let obj = BitObjKind::Tag(tag.clone());
        let (_, bytes) = obj.serialize_with_header().unwrap();
        let parsed = BitObjKind::parse(&bytes).unwrap().into_tag().unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn signed_tag_splits_message_and_signature() {
        let tag = Tag {
            target: sha1(b"commit 0\0"),
            target_type: BitObjType::Commit,
            name: "v2.0.0".to_owned(),
            tagger: None,
            message: "release\n".to_owned(),
            signature: Some(format!("{}\n\nabcd\n-----END PGP SIGNATURE-----", SIGNATURE_MARKER)),
        };
        let bytes = tag.serialize_to_vec().unwrap();
        let parsed = Tag::deserialize_from_slice(&bytes).unwrap();
        assert_eq!(parsed.message, "release\n");
        assert_eq!(parsed.signature, tag.signature);
    }
}

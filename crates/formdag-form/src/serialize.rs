//! The `.fdf` form file.
//!
//! A form file is a short preamble, a table of tagged sections, the
//! section bodies in table order, and a SHA-256 digest of everything before
//! it:
//!
//! ```text
//! "FDF\0"  major:u8  minor:u8  sections:u16
//! { tag:[u8; 4]  length:u32 } * sections
//! body * sections
//! sha256:[u8; 32]
//! ```
//!
//! Integers are little-endian. Every body is a JSON document. `META` holds
//! the form's identity and engine settings, `TRIG` the triggerables and
//! `INST` the instance tree. Readers skip sections they do not know.
//!
//! Answers inside `INST` are `(type tag, text)` pairs, rebuilt through the
//! [`ValueTypeRegistry`] passed to [`FormFile::from_bytes`].

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use formdag_core::{
    Attribute, ConstraintState, CoreError, DataType, FormInstance, TreeElement,
    ValueTypeRegistry,
};
use formdag_dag::{EngineConfig, Triggerable};

use crate::error::FormError;
use crate::form::FormDef;
use crate::FormId;

const MAGIC: &[u8; 4] = b"FDF\0";
const VERSION_MAJOR: u8 = 1;
const VERSION_MINOR: u8 = 0;

/// Magic, version and section count.
const PREAMBLE_LEN: usize = 8;
/// Tag and body length.
const ENTRY_LEN: usize = 8;
const DIGEST_LEN: usize = 32;

/// The sections a form file is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Meta,
    Triggerables,
    Instance,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Meta, Section::Triggerables, Section::Instance];

    pub fn tag(self) -> [u8; 4] {
        match self {
            Section::Meta => *b"META",
            Section::Triggerables => *b"TRIG",
            Section::Instance => *b"INST",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Section::Meta => "meta",
            Section::Triggerables => "triggerables",
            Section::Instance => "instance",
        }
    }

    fn from_tag(tag: [u8; 4]) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.tag() == tag)
    }
}

/// One entry of a file's section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    /// `None` for a section this version does not know.
    pub section: Option<Section>,
    pub tag: String,
    pub length: usize,
}

/// A stored form: identity, binds, engine settings and the instance with
/// its answers.
#[derive(Debug, Clone)]
pub struct FormFile {
    pub id: FormId,
    pub title: String,
    pub config: EngineConfig,
    pub triggerables: Vec<Triggerable>,
    pub instance: FormInstance,
}

#[derive(Serialize, Deserialize)]
struct Meta {
    id: FormId,
    title: String,
    config: EngineConfig,
}

#[derive(Serialize, Deserialize)]
struct StoredNode {
    name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    template: bool,
    data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<StoredValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<Attribute>,
    relevant: bool,
    required: bool,
    constraint: ConstraintState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<StoredNode>,
}

#[derive(Serialize, Deserialize)]
struct StoredValue {
    tag: String,
    text: String,
}

impl FormFile {
    /// Snapshot a form.
    pub fn from_form(form: &FormDef) -> Self {
        Self {
            id: form.id(),
            title: form.title().to_string(),
            config: form.dag().config().clone(),
            triggerables: form.dag().registry().triggerables().to_vec(),
            instance: form.instance().clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormError> {
        let meta = Meta {
            id: self.id,
            title: self.title.clone(),
            config: self.config.clone(),
        };
        Ok(frame(&[
            (Section::Meta.tag(), encode(Section::Meta, &meta)?),
            (
                Section::Triggerables.tag(),
                encode(Section::Triggerables, &self.triggerables)?,
            ),
            (
                Section::Instance.tag(),
                encode(Section::Instance, &store(self.instance.root()))?,
            ),
        ]))
    }

    /// Parse a form file, rebuilding answers through `values`.
    pub fn from_bytes(data: &[u8], values: &ValueTypeRegistry) -> Result<Self, FormError> {
        let sections = read_sections(data)?;
        let meta: Meta = decode(Section::Meta, body(&sections, Section::Meta)?)?;
        let triggerables: Vec<Triggerable> =
            decode(Section::Triggerables, body(&sections, Section::Triggerables)?)?;
        let stored: StoredNode = decode(Section::Instance, body(&sections, Section::Instance)?)?;

        Ok(Self {
            id: meta.id,
            title: meta.title,
            config: meta.config,
            triggerables,
            instance: FormInstance::new(restore(&stored, values)?),
        })
    }

    /// The section table of a form file, after checking its framing and
    /// digest.
    pub fn sections(data: &[u8]) -> Result<Vec<SectionInfo>, FormError> {
        Ok(read_sections(data)?
            .into_iter()
            .map(|(tag, body)| SectionInfo {
                section: Section::from_tag(tag),
                tag: String::from_utf8_lossy(&tag).into_owned(),
                length: body.len(),
            })
            .collect())
    }

    pub fn write_to(&self, path: &Path) -> Result<(), FormError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn read_from(path: &Path, values: &ValueTypeRegistry) -> Result<Self, FormError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data, values)
    }
}

fn encode<T: Serialize>(section: Section, value: &T) -> Result<Vec<u8>, FormError> {
    serde_json::to_vec(value)
        .map_err(|e| FormError::Serialization(format!("{} section: {e}", section.name())))
}

fn decode<T: DeserializeOwned>(section: Section, body: &[u8]) -> Result<T, FormError> {
    serde_json::from_slice(body)
        .map_err(|e| FormError::Deserialization(format!("{} section: {e}", section.name())))
}

/// Lay out `sections` behind the preamble and table, then append the
/// digest.
fn frame(sections: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let bodies: usize = sections.iter().map(|(_, body)| body.len()).sum();
    let mut out =
        Vec::with_capacity(PREAMBLE_LEN + sections.len() * ENTRY_LEN + bodies + DIGEST_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[VERSION_MAJOR, VERSION_MINOR]);
    out.extend_from_slice(&(sections.len() as u16).to_le_bytes());
    for (tag, body) in sections {
        out.extend_from_slice(tag);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    }
    for (_, body) in sections {
        out.extend_from_slice(body);
    }
    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    out
}

/// Check the preamble and digest, then split the content into its tagged
/// bodies.
fn read_sections(data: &[u8]) -> Result<Vec<([u8; 4], &[u8])>, FormError> {
    let minimum = PREAMBLE_LEN + DIGEST_LEN;
    if data.len() < minimum {
        return Err(FormError::TooShort {
            expected: minimum,
            actual: data.len(),
        });
    }
    if &data[..4] != MAGIC {
        return Err(FormError::InvalidMagic);
    }
    let (major, minor) = (data[4], data[5]);
    if major != VERSION_MAJOR {
        return Err(FormError::UnsupportedVersion { major, minor });
    }

    let (content, digest) = data.split_at(data.len() - DIGEST_LEN);
    let computed = Sha256::digest(content);
    if computed.as_slice() != digest {
        return Err(FormError::IntegrityFailed {
            expected: hex_encode(digest),
            actual: hex_encode(&computed),
        });
    }

    let count = usize::from(u16::from_le_bytes([content[6], content[7]]));
    let table_end = PREAMBLE_LEN + count * ENTRY_LEN;
    let table = content.get(PREAMBLE_LEN..table_end).ok_or(FormError::TooShort {
        expected: table_end + DIGEST_LEN,
        actual: data.len(),
    })?;

    let mut offset = table_end;
    let mut sections = Vec::with_capacity(count);
    for entry in table.chunks_exact(ENTRY_LEN) {
        let tag = [entry[0], entry[1], entry[2], entry[3]];
        let length = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]) as usize;
        let end = offset + length;
        let body = content.get(offset..end).ok_or(FormError::TooShort {
            expected: end + DIGEST_LEN,
            actual: data.len(),
        })?;
        sections.push((tag, body));
        offset = end;
    }
    Ok(sections)
}

fn body<'a>(sections: &[([u8; 4], &'a [u8])], wanted: Section) -> Result<&'a [u8], FormError> {
    sections
        .iter()
        .find(|(tag, _)| *tag == wanted.tag())
        .map(|(_, body)| *body)
        .ok_or(FormError::MissingSection(wanted.name()))
}

fn store(element: &TreeElement) -> StoredNode {
    StoredNode {
        name: element.name().to_string(),
        template: element.is_template(),
        data_type: element.data_type().tag().to_string(),
        value: element.value().map(|v| StoredValue {
            tag: v.data_type().tag().to_string(),
            text: v.display_text(),
        }),
        attributes: element.attributes().to_vec(),
        relevant: element.relevant_flag(),
        required: element.is_required(),
        constraint: element.constraint().clone(),
        children: element.children().iter().map(store).collect(),
    }
}

fn restore(node: &StoredNode, values: &ValueTypeRegistry) -> Result<TreeElement, FormError> {
    let data_type = DataType::from_tag(&node.data_type)
        .ok_or_else(|| CoreError::UnknownValueType(node.data_type.clone()))?;
    let mut element = if node.template {
        TreeElement::template(&node.name)
    } else {
        TreeElement::new(&node.name)
    }
    .with_type(data_type);
    if let Some(value) = &node.value {
        element = element.with_value(values.construct(&value.tag, &value.text)?);
    }
    for attribute in &node.attributes {
        element = element.with_attribute(attribute.clone());
    }
    element.set_relevant(node.relevant);
    element.set_required(node.required);
    element.set_constraint(node.constraint.clone());
    for child in &node.children {
        element.add_child(restore(child, values)?);
    }
    Ok(element)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FormBuilder;
    use crate::definition::FormDefinition;
    use formdag_core::{TreeReference, Value};

    fn form() -> FormDef {
        let definition = FormDefinition::from_json(
            r#"{
                "title": "Visit",
                "instance": { "name": "data", "children": [
                    { "name": "age", "type": "int", "value": "7",
                      "attributes": [{ "namespace": "jr", "name": "preload", "value": "x" }] },
                    { "name": "adult", "type": "boolean" },
                    { "name": "note", "type": "text" }
                ]},
                "binds": [
                    { "target": "/data/adult", "calculate": { "binary": { "op": "ge",
                        "lhs": { "ref": "/data/age" },
                        "rhs": { "literal": { "type": "int", "value": 18 } } } } },
                    { "target": "/data/note", "relevant": { "ref": "/data/adult" } }
                ]
            }"#,
        )
        .unwrap();
        let mut form = FormBuilder::new(definition).build().unwrap();
        form.initialize();
        form
    }

    fn r(s: &str) -> TreeReference {
        TreeReference::parse(s).unwrap()
    }

    #[test]
    fn round_trip_keeps_state() {
        let form = form();
        let bytes = FormFile::from_form(&form).to_bytes().unwrap();
        let file = FormFile::from_bytes(&bytes, &ValueTypeRegistry::with_defaults()).unwrap();

        assert_eq!(file.id, form.id());
        assert_eq!(file.title, "Visit");
        assert_eq!(file.triggerables.len(), 2);
        assert_eq!(&file.instance, form.instance());

        let note = file.instance.resolve(&r("/data[0]/note[0]")).unwrap();
        assert!(!note.is_relevant());
        let age = file.instance.resolve(&r("/data[0]/age[0]")).unwrap();
        assert_eq!(age.value(), Some(&Value::Int(7)));
        assert_eq!(age.attribute(Some("jr"), "preload"), Some("x"));
    }

    #[test]
    fn unknown_value_type_is_reported() {
        let form = form();
        let bytes = FormFile::from_form(&form).to_bytes().unwrap();
        let err = FormFile::from_bytes(&bytes, &ValueTypeRegistry::new()).unwrap_err();
        assert!(matches!(err, FormError::Core(CoreError::UnknownValueType(_))));
    }

    #[test]
    fn invalid_magic() {
        let mut data = vec![0x00; 100];
        data[0..4].copy_from_slice(b"BAD\0");
        assert!(matches!(
            FormFile::from_bytes(&data, &ValueTypeRegistry::with_defaults()),
            Err(FormError::InvalidMagic)
        ));
    }

    #[test]
    fn unsupported_version() {
        let mut bytes = FormFile::from_form(&form()).to_bytes().unwrap();
        bytes[4] = 9;
        assert!(matches!(
            FormFile::from_bytes(&bytes, &ValueTypeRegistry::with_defaults()),
            Err(FormError::UnsupportedVersion { major: 9, .. })
        ));
    }

    #[test]
    fn corruption_detected() {
        let mut bytes = FormFile::from_form(&form()).to_bytes().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            FormFile::from_bytes(&bytes, &ValueTypeRegistry::with_defaults()),
            Err(FormError::IntegrityFailed { .. })
        ));
    }

    #[test]
    fn table_lists_each_section() {
        let bytes = FormFile::from_form(&form()).to_bytes().unwrap();
        let sections = FormFile::sections(&bytes).unwrap();
        let tags: Vec<_> = sections.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, ["META", "TRIG", "INST"]);
        assert!(sections.iter().all(|s| s.section.is_some() && s.length > 0));
        let total: usize = sections.iter().map(|s| s.length).sum();
        assert_eq!(
            bytes.len(),
            PREAMBLE_LEN + 3 * ENTRY_LEN + total + DIGEST_LEN
        );
    }

    fn sections_of(form: &FormDef) -> Vec<([u8; 4], Vec<u8>)> {
        let bytes = FormFile::from_form(form).to_bytes().unwrap();
        read_sections(&bytes)
            .unwrap()
            .into_iter()
            .map(|(tag, body)| (tag, body.to_vec()))
            .collect()
    }

    #[test]
    fn missing_section_is_reported() {
        let mut sections = sections_of(&form());
        sections.retain(|(tag, _)| tag != b"TRIG");
        let err = FormFile::from_bytes(&frame(&sections), &ValueTypeRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, FormError::MissingSection("triggerables")));
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let form = form();
        let mut sections = sections_of(&form);
        sections.insert(1, (*b"NOTE", b"reviewed".to_vec()));
        let bytes = frame(&sections);

        let table = FormFile::sections(&bytes).unwrap();
        assert_eq!(table[1].tag, "NOTE");
        assert_eq!(table[1].section, None);
        assert_eq!(table[1].length, 8);

        let file = FormFile::from_bytes(&bytes, &ValueTypeRegistry::with_defaults()).unwrap();
        assert_eq!(&file.instance, form.instance());
    }

    #[test]
    fn section_past_the_end_is_too_short() {
        let mut sections = sections_of(&form());
        sections.truncate(1);
        let mut bytes = frame(&sections);
        // Claim a longer body than was written, then re-seal.
        bytes.truncate(bytes.len() - DIGEST_LEN);
        let declared = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) + 4;
        bytes[12..16].copy_from_slice(&declared.to_le_bytes());
        let digest = Sha256::digest(&bytes);
        bytes.extend_from_slice(&digest);

        assert!(matches!(
            FormFile::from_bytes(&bytes, &ValueTypeRegistry::with_defaults()),
            Err(FormError::TooShort { .. })
        ));
    }

    #[test]
    fn too_short() {
        let data = vec![0x46, 0x44, 0x46, 0x00];
        assert!(matches!(
            FormFile::from_bytes(&data, &ValueTypeRegistry::with_defaults()),
            Err(FormError::TooShort { .. })
        ));
    }
}

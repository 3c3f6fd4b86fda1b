//! In-memory OPC package: the zip parts of an XLSX file, their
//! relationships and the content-type table.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use tempfile::NamedTempFile;
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::WorkbookError;

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const ROOT_RELS_PART: &str = "_rels/.rels";

const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

#[derive(Debug, Clone)]
struct Part {
    name: String,
    data: Vec<u8>,
}

/// Every part of a zip package, kept in archive order.
#[derive(Debug, Clone, Default)]
pub struct Package {
    parts: Vec<Part>,
}

impl Package {
    /// Reads every file entry of the archive into memory.
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            trace!("Loaded part {} ({} bytes)", entry.name(), data.len());
            parts.push(Part {
                name: entry.name().to_string(),
                data,
            });
        }

        debug!("Opened package {:?} with {} parts", path, parts.len());
        Ok(Self { parts })
    }

    fn position(&self, name: &str) -> Option<usize> {
        // Part names compare case-insensitively
        self.parts
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.position(name).map(|i| self.parts[i].data.as_slice())
    }

    pub fn require(&self, name: &str) -> Result<&[u8], WorkbookError> {
        self.part(name)
            .ok_or_else(|| WorkbookError::MissingPart(name.to_string()))
    }

    /// Replaces a part, or appends it when new.
    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.position(name) {
            Some(i) => self.parts[i].data = data,
            None => self.parts.push(Part {
                name: name.to_string(),
                data,
            }),
        }
    }

    #[cfg(test)]
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    /// First free `{stem}{n}.{extension}` name, counting from 1.
    pub fn unique_name(&self, stem: &str, extension: &str) -> String {
        (1..)
            .map(|n| format!("{stem}{n}.{extension}"))
            .find(|name| !self.contains(name))
            .unwrap_or_default()
    }

    /// Relationships of `part`, empty when it has no rels part.
    pub fn relationships(&self, part: &str) -> Result<Relationships, WorkbookError> {
        let rels_part = rels_path_for(part);
        match self.part(&rels_part) {
            Some(xml) => Relationships::parse(xml, &rels_part),
            None => Ok(Relationships::default()),
        }
    }

    pub fn set_relationships(&mut self, part: &str, rels: &Relationships) {
        self.set_part(&rels_path_for(part), rels.to_xml().into_bytes());
    }

    /// Writes the package to a sibling temp file and renames it over `path`.
    pub fn save_atomic(&self, path: &Path) -> Result<(), WorkbookError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut zip = ZipWriter::new(BufWriter::new(tmp.as_file_mut()));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

            for part in &self.parts {
                zip.start_file(part.name.as_str(), options)?;
                zip.write_all(&part.data)?;
            }

            let mut writer = zip.finish()?;
            writer.flush()?;
        }

        if let Ok(metadata) = std::fs::metadata(path) {
            tmp.as_file().set_permissions(metadata.permissions())?;
        }
        tmp.persist(path).map_err(|e| WorkbookError::Io(e.error))?;

        debug!("Saved package {:?} with {} parts", path, self.parts.len());
        Ok(())
    }

    /// Adds any missing `Default` / `Override` entries to the content-type table.
    pub fn ensure_content_types(
        &mut self,
        defaults: &[(&str, &str)],
        overrides: &[(&str, &str)],
    ) -> Result<(), WorkbookError> {
        let xml = self.require(CONTENT_TYPES_PART)?;
        let xml_err = WorkbookError::xml(CONTENT_TYPES_PART);

        let mut known_ext = HashSet::new();
        let mut known_parts = HashSet::new();
        let mut reader = Reader::from_reader(xml);
        let mut root_end = None;

        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => return Err(xml_err(e)),
            };
            match event {
                Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                    b"Default" => {
                        if let Some(ext) = attr_value(&e, b"Extension") {
                            known_ext.insert(ext.to_ascii_lowercase());
                        }
                    }
                    b"Override" => {
                        if let Some(part) = attr_value(&e, b"PartName") {
                            known_parts.insert(part.to_ascii_lowercase());
                        }
                    }
                    _ => {}
                },
                Event::End(e) if e.local_name().as_ref() == b"Types" => {
                    // root close tag is the last end tag in the part
                    root_end = xml.windows(2).rposition(|w| w == b"</");
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let root_end = root_end.ok_or_else(|| {
            WorkbookError::Malformed(format!("{CONTENT_TYPES_PART} has no Types element"))
        })?;

        let mut additions = String::new();
        for &(ext, content_type) in defaults {
            if known_ext.insert(ext.to_ascii_lowercase()) {
                additions.push_str(&format!(
                    r#"<Default Extension="{}" ContentType="{}"/>"#,
                    escape(ext),
                    escape(content_type)
                ));
            }
        }
        for &(part, content_type) in overrides {
            let part_name = format!("/{}", part.trim_start_matches('/'));
            if known_parts.insert(part_name.to_ascii_lowercase()) {
                additions.push_str(&format!(
                    r#"<Override PartName="{}" ContentType="{}"/>"#,
                    escape(part_name.as_str()),
                    escape(content_type)
                ));
            }
        }

        if additions.is_empty() {
            return Ok(());
        }

        let mut updated = Vec::with_capacity(xml.len() + additions.len());
        updated.extend_from_slice(&xml[..root_end]);
        updated.extend_from_slice(additions.as_bytes());
        updated.extend_from_slice(&xml[root_end..]);
        self.set_part(CONTENT_TYPES_PART, updated);
        Ok(())
    }
}

/// One `<Relationship>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub target_mode: Option<String>,
}

/// Contents of a `.rels` part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationships {
    entries: Vec<Relationship>,
}

impl Relationships {
    pub fn parse(xml: &[u8], part: &str) -> Result<Self, WorkbookError> {
        let mut reader = Reader::from_reader(xml);
        let mut entries = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e))
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    let (Some(id), Some(target)) =
                        (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                    else {
                        return Err(WorkbookError::Malformed(format!(
                            "relationship without Id or Target in {part}"
                        )));
                    };
                    entries.push(Relationship {
                        id,
                        rel_type: attr_value(&e, b"Type").unwrap_or_default(),
                        target,
                        target_mode: attr_value(&e, b"TargetMode"),
                    });
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(WorkbookError::xml(part)(e)),
            }
        }

        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.entries.iter()
    }

    pub fn by_id(&self, id: &str) -> Option<&Relationship> {
        self.iter().find(|r| r.id == id)
    }

    /// First relationship whose type ends with `suffix`.
    ///
    /// Matching on the suffix covers both transitional and strict namespaces.
    pub fn by_type_suffix(&self, suffix: &str) -> Option<&Relationship> {
        self.iter().find(|r| r.rel_type.ends_with(suffix))
    }

    /// Appends a relationship under the next free `rIdN` and returns that id.
    pub fn add(&mut self, rel_type: &str, target: &str) -> String {
        let next = self
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = format!("rId{next}");
        self.entries.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            target_mode: None,
        });
        id
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<Relationships xmlns="{RELATIONSHIPS_NS}">"#));
        for rel in &self.entries {
            xml.push_str(&format!(
                r#"<Relationship Id="{}" Type="{}" Target="{}""#,
                escape(rel.id.as_str()),
                escape(rel.rel_type.as_str()),
                escape(rel.target.as_str())
            ));
            if let Some(mode) = &rel.target_mode {
                xml.push_str(&format!(r#" TargetMode="{}""#, escape(mode.as_str())));
            }
            xml.push_str("/>");
        }
        xml.push_str("</Relationships>");
        xml
    }
}

/// Unescaped value of the attribute whose local name is `key`.
pub fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`.
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None if part.is_empty() => ROOT_RELS_PART.to_string(),
        None => format!("_rels/{part}.rels"),
    }
}

fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolves a relationship target against the part that owns it.
///
/// An empty `source` means the package root.
pub fn resolve_target(source: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if part_dir(source).is_empty() => target.to_string(),
        None => format!("{}/{}", part_dir(source), target),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Target string that reaches `to` from a relationship owned by `from`.
pub fn relative_target(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = part_dir(from).split('/').filter(|s| !s.is_empty()).collect();
    let to_segments: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from_dir
        .iter()
        .zip(&to_segments)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend_from_slice(&to_segments[common..]);
    parts.join("/")
}

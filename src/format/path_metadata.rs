use std::collections::BTreeMap;
use std::io::{Read, Write};

use super::{
    into_corruption, len_u16, len_u32, Decode, Encode, FieldReader, FieldWriter, PathEntry,
    Validate,
};
use crate::error::{Error, ErrorContext, Result};
use crate::path;
use crate::tags::{TagOwner, TagStore};

const HAS_PARENT: u8 = 1 << 0;
const HAS_INHERITANCE: u8 = 1 << 1;
const INHERITANCE_ENABLED: u8 = 1 << 2;

const FS_MODE: u8 = 1 << 0;
const FS_UID: u8 = 1 << 1;
const FS_GID: u8 = 1 << 2;
const FS_WINDOWS_ATTRS: u8 = 1 << 3;
const FS_FLAGS: u8 = 1 << 4;
const FS_MOD_TIME: u8 = 1 << 5;
const FS_LINK_TARGET: u8 = 1 << 6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PathType {
    #[default]
    File,
    Directory,
    FileSymlink,
    DirectorySymlink,
}

impl PathType {
    pub fn code(self) -> u8 {
        match self {
            PathType::File => 0,
            PathType::Directory => 1,
            PathType::FileSymlink => 2,
            PathType::DirectorySymlink => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PathType::File),
            1 => Some(PathType::Directory),
            2 => Some(PathType::FileSymlink),
            3 => Some(PathType::DirectorySymlink),
            _ => None,
        }
    }

    pub fn is_dir(self) -> bool {
        matches!(self, PathType::Directory | PathType::DirectorySymlink)
    }
}

/// whether an entry hands its tags down to descendants
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inheritance {
    pub enabled: bool,
    /// higher values win when ancestors set the same key
    pub priority: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclKind {
    User,
    Group,
    Other,
    Mask,
}

impl AclKind {
    fn code(self) -> u8 {
        match self {
            AclKind::User => 0,
            AclKind::Group => 1,
            AclKind::Other => 2,
            AclKind::Mask => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AclKind::User),
            1 => Some(AclKind::Group),
            2 => Some(AclKind::Other),
            3 => Some(AclKind::Mask),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    pub kind: AclKind,
    pub id: Option<u32>,
    /// e.g. "rwx", "r--"
    pub perms: String,
}

/// filesystem properties captured for a path; everything optional
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSystemMeta {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub acl: Vec<AclEntry>,
    pub windows_attrs: Option<u32>,
    pub extended_attrs: BTreeMap<String, Vec<u8>>,
    pub flags: Option<u16>,
    /// unix nanoseconds
    pub mod_time: Option<u64>,
    pub link_target: Option<String>,
}

impl FileSystemMeta {
    pub fn is_executable(&self) -> bool {
        self.mode.map_or(false, |m| m & 0o111 != 0)
    }

    fn presence(&self) -> u8 {
        let mut bits = 0;
        if self.mode.is_some() {
            bits |= FS_MODE;
        }
        if self.uid.is_some() {
            bits |= FS_UID;
        }
        if self.gid.is_some() {
            bits |= FS_GID;
        }
        if self.windows_attrs.is_some() {
            bits |= FS_WINDOWS_ATTRS;
        }
        if self.flags.is_some() {
            bits |= FS_FLAGS;
        }
        if self.mod_time.is_some() {
            bits |= FS_MOD_TIME;
        }
        if self.link_target.is_some() {
            bits |= FS_LINK_TARGET;
        }
        bits
    }

    fn encoded_len(&self) -> usize {
        let mut len = 1;
        len += [self.mode, self.uid, self.gid, self.windows_attrs]
            .iter()
            .filter(|v| v.is_some())
            .count()
            * 4;
        len += self.flags.map_or(0, |_| 2);
        len += self.mod_time.map_or(0, |_| 8);
        len += self.link_target.as_ref().map_or(0, |t| 2 + t.len());
        len += 2 + self
            .acl
            .iter()
            .map(|a| 2 + a.id.map_or(0, |_| 4) + 1 + a.perms.len())
            .sum::<usize>();
        len += 2 + self
            .extended_attrs
            .iter()
            .map(|(k, v)| 2 + k.len() + 2 + v.len())
            .sum::<usize>();
        len
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        w.u8("FileSystemPresence", self.presence())?;
        if let Some(mode) = self.mode {
            w.u32("Mode", mode)?;
        }
        if let Some(uid) = self.uid {
            w.u32("UID", uid)?;
        }
        if let Some(gid) = self.gid {
            w.u32("GID", gid)?;
        }
        if let Some(attrs) = self.windows_attrs {
            w.u32("WindowsAttrs", attrs)?;
        }
        if let Some(flags) = self.flags {
            w.u16("Flags", flags)?;
        }
        if let Some(mod_time) = self.mod_time {
            w.u64("ModTime", mod_time)?;
        }
        if let Some(target) = &self.link_target {
            w.u16("LinkTargetLength", len_u16("LinkTargetLength", target.len())?)?;
            w.bytes("LinkTarget", target.as_bytes())?;
        }

        w.u16("AclCount", len_u16("AclCount", self.acl.len())?)?;
        for acl in &self.acl {
            w.u8("AclType", acl.kind.code())?;
            w.u8("AclHasId", acl.id.is_some() as u8)?;
            if let Some(id) = acl.id {
                w.u32("AclId", id)?;
            }
            let perms_len = u8::try_from(acl.perms.len()).map_err(|_| {
                Error::validation(
                    "acl permissions too long",
                    ErrorContext::new("AclPerms", acl.perms.len(), "at most 255 bytes"),
                )
            })?;
            w.u8("AclPermsLength", perms_len)?;
            w.bytes("AclPerms", acl.perms.as_bytes())?;
        }

        w.u16(
            "ExtendedAttrCount",
            len_u16("ExtendedAttrCount", self.extended_attrs.len())?,
        )?;
        for (name, value) in &self.extended_attrs {
            w.u16("ExtendedAttrNameLength", len_u16("ExtendedAttrNameLength", name.len())?)?;
            w.bytes("ExtendedAttrName", name.as_bytes())?;
            w.u16("ExtendedAttrValueLength", len_u16("ExtendedAttrValueLength", value.len())?)?;
            w.bytes("ExtendedAttrValue", value)?;
        }
        Ok(())
    }

    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let presence = r.u8("FileSystemPresence")?;
        let mut fs = FileSystemMeta::default();
        if presence & FS_MODE != 0 {
            fs.mode = Some(r.u32("Mode")?);
        }
        if presence & FS_UID != 0 {
            fs.uid = Some(r.u32("UID")?);
        }
        if presence & FS_GID != 0 {
            fs.gid = Some(r.u32("GID")?);
        }
        if presence & FS_WINDOWS_ATTRS != 0 {
            fs.windows_attrs = Some(r.u32("WindowsAttrs")?);
        }
        if presence & FS_FLAGS != 0 {
            fs.flags = Some(r.u16("Flags")?);
        }
        if presence & FS_MOD_TIME != 0 {
            fs.mod_time = Some(r.u64("ModTime")?);
        }
        if presence & FS_LINK_TARGET != 0 {
            let len = r.u16("LinkTargetLength")?;
            fs.link_target = Some(r.string("LinkTarget", len as usize)?);
        }

        let acl_count = r.u16("AclCount")?;
        for _ in 0..acl_count {
            let code = r.u8("AclType")?;
            let kind = AclKind::from_code(code).ok_or_else(|| {
                Error::corruption(
                    "unknown acl entry type",
                    ErrorContext::new("AclType", code, "0..=3"),
                )
            })?;
            let id = match r.u8("AclHasId")? {
                0 => None,
                _ => Some(r.u32("AclId")?),
            };
            let perms_len = r.u8("AclPermsLength")?;
            let perms = r.string("AclPerms", perms_len as usize)?;
            fs.acl.push(AclEntry { kind, id, perms });
        }

        let xattr_count = r.u16("ExtendedAttrCount")?;
        for _ in 0..xattr_count {
            let name_len = r.u16("ExtendedAttrNameLength")?;
            let name = r.string("ExtendedAttrName", name_len as usize)?;
            let value_len = r.u16("ExtendedAttrValueLength")?;
            let value = r.bytes("ExtendedAttrValue", value_len as usize)?;
            fs.extended_attrs.insert(name, value);
        }
        Ok(fs)
    }
}

/// filesystem properties and tags bound to one package path
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathMetadataEntry {
    pub path: PathEntry,
    pub path_type: PathType,
    /// lookup key of the parent entry, never an ownership edge
    pub parent_path: Option<String>,
    pub inheritance: Option<Inheritance>,
    pub filesystem: FileSystemMeta,
    pub properties: TagStore,
}

impl PathMetadataEntry {
    /// entry for a file path
    pub fn file(raw: &str) -> Result<Self> {
        let path = PathEntry::new(raw)?;
        if path.is_dir() {
            return Err(Error::validation(
                "file path ends with a separator",
                ErrorContext::new("Path", raw, "a file path"),
            ));
        }
        Ok(Self {
            path,
            path_type: PathType::File,
            ..Self::default()
        })
    }

    /// entry for a directory path, inheriting to its children
    pub fn directory(raw: &str) -> Result<Self> {
        Ok(Self {
            path: PathEntry {
                path: path::normalize_dir(raw)?,
            },
            path_type: PathType::Directory,
            inheritance: Some(Inheritance {
                enabled: true,
                priority: 0,
            }),
            ..Self::default()
        })
    }

    pub fn key(&self) -> &str {
        self.path.as_str()
    }

    pub fn inherits(&self) -> bool {
        self.inheritance.map_or(false, |i| i.enabled)
    }

    pub fn with_parent(mut self, parent: &str) -> Result<Self> {
        self.parent_path = Some(path::normalize_dir(parent)?);
        Ok(self)
    }

    pub fn with_inheritance(mut self, enabled: bool, priority: i32) -> Self {
        self.inheritance = Some(Inheritance { enabled, priority });
        self
    }
}

impl TagOwner for PathMetadataEntry {
    fn tags(&self) -> &TagStore {
        &self.properties
    }

    fn tags_mut(&mut self) -> &mut TagStore {
        &mut self.properties
    }

    /// properties are persisted directly; check they still fit the encoding
    fn sync_tags(&mut self) -> Result<()> {
        let blob = self.properties.encode_blob()?;
        len_u32("PropertiesLength", blob.len())?;
        Ok(())
    }
}

impl Validate for PathMetadataEntry {
    fn validate(&self) -> Result<()> {
        self.path.validate()?;
        if self.path_type.is_dir() != self.path.is_dir() {
            return Err(Error::validation(
                "path form does not match its type",
                ErrorContext::new(
                    "Path",
                    self.key(),
                    if self.path_type.is_dir() {
                        "a directory path ending in /"
                    } else {
                        "a file path"
                    },
                ),
            ));
        }
        if !self.path_type.is_dir() && self.inheritance.is_some() {
            return Err(Error::validation(
                "file entries cannot carry inheritance",
                ErrorContext::new("Inheritance", "set", "none for files"),
            ));
        }
        if let Some(parent) = &self.parent_path {
            if !path::is_ancestor(parent, self.key()) {
                return Err(Error::validation(
                    "parent path is not an ancestor directory",
                    ErrorContext::new("ParentPath", parent, format!("an ancestor of {}", self.key())),
                ));
            }
        }
        Ok(())
    }
}

impl Encode for PathMetadataEntry {
    fn encoded_len(&self) -> usize {
        let properties = self.properties.encode_blob().map_or(0, |b| b.len());
        self.path.encoded_len()
            + 2
            + self.parent_path.as_ref().map_or(0, |p| 2 + p.len())
            + self.inheritance.map_or(0, |_| 4)
            + self.filesystem.encoded_len()
            + 4
            + properties
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        let properties = self.properties.encode_blob()?;
        let properties_len = len_u32("PropertiesLength", properties.len())?;

        let mut presence = 0;
        if self.parent_path.is_some() {
            presence |= HAS_PARENT;
        }
        if let Some(inheritance) = self.inheritance {
            presence |= HAS_INHERITANCE;
            if inheritance.enabled {
                presence |= INHERITANCE_ENABLED;
            }
        }

        self.path.encode_to(w)?;
        w.u8("PathType", self.path_type.code())?;
        w.u8("Presence", presence)?;
        if let Some(parent) = &self.parent_path {
            w.u16("ParentPathLength", len_u16("ParentPathLength", parent.len())?)?;
            w.bytes("ParentPath", parent.as_bytes())?;
        }
        if let Some(inheritance) = self.inheritance {
            w.i32("InheritancePriority", inheritance.priority)?;
        }
        self.filesystem.encode_to(w)?;
        w.u32("PropertiesLength", properties_len)?;
        w.bytes("Properties", &properties)
    }
}

impl Decode for PathMetadataEntry {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let path = PathEntry::decode_from(r)?;
        let code = r.u8("PathType")?;
        let path_type = PathType::from_code(code).ok_or_else(|| {
            Error::corruption(
                "unknown path type",
                ErrorContext::new("PathType", code, "0..=3"),
            )
        })?;
        let presence = r.u8("Presence")?;
        let parent_path = if presence & HAS_PARENT != 0 {
            let len = r.u16("ParentPathLength")?;
            Some(r.string("ParentPath", len as usize)?)
        } else {
            None
        };
        let inheritance = if presence & HAS_INHERITANCE != 0 {
            Some(Inheritance {
                enabled: presence & INHERITANCE_ENABLED != 0,
                priority: r.i32("InheritancePriority")?,
            })
        } else {
            None
        };
        let filesystem = FileSystemMeta::decode_from(r)?;
        let properties_len = r.u32("PropertiesLength")?;
        let blob = r.bytes("Properties", properties_len as usize)?;
        let properties = TagStore::decode_blob(&blob).map_err(into_corruption)?;

        Ok(Self {
            path,
            path_type,
            parent_path,
            inheritance,
            filesystem,
            properties,
        })
    }
}

/// payload of the special path metadata file: `count:u32 | entries`
pub fn encode_path_metadata_file<'a>(
    entries: impl IntoIterator<Item = &'a PathMetadataEntry>,
) -> Result<Vec<u8>> {
    let entries: Vec<&PathMetadataEntry> = entries.into_iter().collect();
    let mut w = FieldWriter::new(Vec::new());
    w.u32("EntryCount", len_u32("EntryCount", entries.len())?)?;
    for entry in entries {
        entry.encode_to(&mut w)?;
    }
    Ok(w.into_inner())
}

pub fn decode_path_metadata_file(bytes: &[u8]) -> Result<Vec<PathMetadataEntry>> {
    let mut r = FieldReader::new(bytes);
    let count = r.u32("EntryCount")?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let entry = PathMetadataEntry::decode_from(&mut r)?;
        entry.validate().map_err(into_corruption)?;
        entries.push(entry);
    }
    if r.consumed() != bytes.len() as u64 {
        return Err(Error::corruption(
            "trailing bytes after path metadata entries",
            ErrorContext::new("EntryCount", count, format!("{} bytes of entries", bytes.len())),
        ));
    }
    Ok(entries)
}

use std::fmt;

use bitflags::bitflags;

/// Kind of a setting entry. The numeric values are single bits so kinds can
/// be combined into a [`KindMask`]; they are also the values persisted in the
/// storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum EntryKind {
    IncludePath = 0x01,
    IncludeFile = 0x02,
    Macro = 0x04,
    MacroFile = 0x08,
    LibraryPath = 0x10,
    LibraryFile = 0x20,
}

impl EntryKind {
    /// All kinds in canonical presentation order.
    pub const ALL: [EntryKind; 6] = [
        EntryKind::IncludePath,
        EntryKind::IncludeFile,
        EntryKind::Macro,
        EntryKind::MacroFile,
        EntryKind::LibraryPath,
        EntryKind::LibraryFile,
    ];

    #[must_use]
    pub fn raw(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn from_raw(raw: u32) -> Option<EntryKind> {
        EntryKind::ALL.into_iter().find(|kind| kind.raw() == raw)
    }
}

/// Bitmask selecting one or more entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KindMask(u32);

impl KindMask {
    pub const ALL: KindMask = KindMask(0x3f);

    #[must_use]
    pub fn of(kind: EntryKind) -> KindMask {
        KindMask(kind.raw())
    }

    #[must_use]
    pub fn contains(self, kind: EntryKind) -> bool {
        self.0 & kind.raw() != 0
    }
}

impl std::ops::BitOr for KindMask {
    type Output = KindMask;

    fn bitor(self, rhs: KindMask) -> KindMask {
        KindMask(self.0 | rhs.0)
    }
}

impl From<EntryKind> for KindMask {
    fn from(kind: EntryKind) -> KindMask {
        KindMask::of(kind)
    }
}

bitflags! {
    /// Modifiers changing how an entry participates in resolution and
    /// serialization. The raw value is what the storage format persists.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SettingFlags: u32 {
        const BUILTIN = 0x01;
        const READONLY = 0x02;
        const LOCAL = 0x04;
        const VALUE_WORKSPACE_PATH = 0x08;
        const RESOLVED = 0x10;
        const UNDEFINED = 0x20;
        const FRAMEWORKS_MAC = 0x40;
        const EXPORTED = 0x80;
    }
}

/// One compiler-visible setting: an include path, macro definition, library
/// path and so on. Entries are immutable values; equality is structural over
/// kind, name, value and flags. Only macros carry a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettingEntry {
    kind: EntryKind,
    name: String,
    value: Option<String>,
    flags: SettingFlags,
}

impl SettingEntry {
    pub fn new(
        kind: EntryKind,
        name: impl Into<String>,
        value: Option<String>,
        flags: SettingFlags,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            value,
            flags,
        }
    }

    pub fn include_path(name: impl Into<String>, flags: SettingFlags) -> Self {
        Self::new(EntryKind::IncludePath, name, None, flags)
    }

    pub fn include_file(name: impl Into<String>, flags: SettingFlags) -> Self {
        Self::new(EntryKind::IncludeFile, name, None, flags)
    }

    pub fn macro_def(
        name: impl Into<String>,
        value: impl Into<String>,
        flags: SettingFlags,
    ) -> Self {
        Self::new(EntryKind::Macro, name, Some(value.into()), flags)
    }

    pub fn macro_file(name: impl Into<String>, flags: SettingFlags) -> Self {
        Self::new(EntryKind::MacroFile, name, None, flags)
    }

    pub fn library_path(name: impl Into<String>, flags: SettingFlags) -> Self {
        Self::new(EntryKind::LibraryPath, name, None, flags)
    }

    pub fn library_file(name: impl Into<String>, flags: SettingFlags) -> Self {
        Self::new(EntryKind::LibraryFile, name, None, flags)
    }

    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    #[must_use]
    pub fn flags(&self) -> SettingFlags {
        self.flags
    }

    #[must_use]
    pub fn has_flag(&self, flag: SettingFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Same entry with different flags. Used when re-exposing exported
    /// entries of referenced projects with `EXPORTED` stripped.
    #[must_use]
    pub fn with_flags(&self, flags: SettingFlags) -> Self {
        Self {
            kind: self.kind,
            name: self.name.clone(),
            value: self.value.clone(),
            flags,
        }
    }
}

impl fmt::Display for SettingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{:?} {}={}", self.kind, self.name, value),
            None => write!(f, "{:?} {}", self.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_raw_round_trip() {
        for kind in EntryKind::ALL {
            assert_eq!(EntryKind::from_raw(kind.raw()), Some(kind));
        }
        assert_eq!(EntryKind::from_raw(0), None);
        assert_eq!(EntryKind::from_raw(3), None);
    }

    #[test]
    fn test_kind_mask() {
        let mask = KindMask::of(EntryKind::IncludePath) | KindMask::of(EntryKind::Macro);
        assert!(mask.contains(EntryKind::IncludePath));
        assert!(mask.contains(EntryKind::Macro));
        assert!(!mask.contains(EntryKind::LibraryFile));
        for kind in EntryKind::ALL {
            assert!(KindMask::ALL.contains(kind));
        }
    }

    #[test]
    fn test_structural_equality() {
        let a = SettingEntry::include_path("path0", SettingFlags::BUILTIN);
        let b = SettingEntry::include_path("path0", SettingFlags::BUILTIN);
        let c = SettingEntry::include_path("path0", SettingFlags::empty());
        assert_eq!(a, b);
        assert_ne!(a, c);

        let m1 = SettingEntry::macro_def("MACRO0", "value0", SettingFlags::empty());
        let m2 = SettingEntry::macro_def("MACRO0", "value1", SettingFlags::empty());
        assert_ne!(m1, m2);
    }

    #[test]
    fn test_with_flags_strips_exported() {
        let exported = SettingEntry::macro_def("M", "1", SettingFlags::EXPORTED);
        let stripped = exported.with_flags(exported.flags() - SettingFlags::EXPORTED);
        assert!(!stripped.has_flag(SettingFlags::EXPORTED));
        assert_eq!(stripped.name(), "M");
        assert_eq!(stripped.value(), Some("1"));
    }
}

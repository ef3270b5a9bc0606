//! Entry-list XML shape shared by the serializable provider and the tests:
//! one `entry` element per entry with numeric `kind`, the `name`, a `value`
//! for macros, and a child `flag` element that is omitted when no flags are
//! set.

use lset_core::{EntryKind, SettingEntry, SettingFlags};
use lset_xml::Element;

pub(crate) const ELEM_ENTRY: &str = "entry";
pub(crate) const ELEM_FLAG: &str = "flag";
pub(crate) const ATTR_KIND: &str = "kind";
pub(crate) const ATTR_NAME: &str = "name";
pub(crate) const ATTR_VALUE: &str = "value";

pub(crate) fn append_entries(parent: &mut Element, entries: &[SettingEntry]) {
    for entry in entries {
        let element = parent.add_child(ELEM_ENTRY);
        element.set_attr(ATTR_KIND, entry.kind().raw().to_string());
        element.set_attr(ATTR_NAME, entry.name());
        if let Some(value) = entry.value() {
            element.set_attr(ATTR_VALUE, value);
        }
        let flags = entry.flags();
        if !flags.is_empty() {
            element
                .add_child(ELEM_FLAG)
                .set_attr(ATTR_VALUE, flags.bits().to_string());
        }
    }
}

/// Parse the `entry` children of `parent`. Unparsable entries are dropped
/// with a warning; a stored document never takes the provider down.
pub(crate) fn parse_entries(parent: &Element) -> Vec<SettingEntry> {
    parent
        .children_named(ELEM_ENTRY)
        .filter_map(parse_entry)
        .collect()
}

fn parse_entry(element: &Element) -> Option<SettingEntry> {
    let kind = element
        .attr(ATTR_KIND)
        .and_then(|raw| raw.parse::<u32>().ok())
        .and_then(EntryKind::from_raw);
    let Some(kind) = kind else {
        tracing::warn!(kind = ?element.attr(ATTR_KIND), "dropping entry with unknown kind");
        return None;
    };
    let Some(name) = element.attr(ATTR_NAME) else {
        tracing::warn!("dropping entry without a name");
        return None;
    };

    let value = if kind == EntryKind::Macro {
        element.attr(ATTR_VALUE).map(ToOwned::to_owned)
    } else {
        None
    };

    let flags = element
        .first_child(ELEM_FLAG)
        .and_then(|flag| flag.attr(ATTR_VALUE))
        .and_then(|raw| raw.parse::<u32>().ok())
        .map_or(SettingFlags::empty(), SettingFlags::from_bits_truncate);

    Some(SettingEntry::new(kind, name, value, flags))
}

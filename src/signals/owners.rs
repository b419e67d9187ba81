//! Well-known name ownership aliases.
//!
//! Signals arrive stamped with the emitter's unique name (`:1.42`) while
//! listeners usually subscribe by well-known name. This table records which
//! well-known names each unique name currently owns.

use std::collections::{BTreeSet, HashMap};

use crate::bus::{RawSignal, Value, DBUS_INTERFACE, DBUS_SERVICE, NAME_OWNER_CHANGED};

#[derive(Debug, Default)]
pub(crate) struct OwnerTable {
    aliases: HashMap<String, BTreeSet<String>>,
}

impl OwnerTable {
    /// Record that `name` is now owned by `owner` (`None` = released).
    pub(crate) fn set_owner(&mut self, name: &str, owner: Option<&str>) {
        self.aliases.retain(|_, names| {
            names.remove(name);
            !names.is_empty()
        });
        if let Some(owner) = owner.filter(|o| !o.is_empty()) {
            self.aliases
                .entry(owner.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    /// Unique name currently owning `name`.
    pub(crate) fn owner_of(&self, name: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, names)| names.contains(name))
            .map(|(unique, _)| unique.as_str())
    }

    /// Well-known names owned by `unique`.
    pub(crate) fn names_for(&self, unique: &str) -> impl Iterator<Item = &str> {
        self.aliases
            .get(unique)
            .into_iter()
            .flat_map(|names| names.iter().map(String::as_str))
    }
}

/// A `NameOwnerChanged` notification from the bus daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OwnerChange {
    pub name: String,
    pub new_owner: Option<String>,
}

impl OwnerChange {
    pub(crate) fn parse(signal: &RawSignal) -> Option<Self> {
        if signal.sender.as_deref() != Some(DBUS_SERVICE)
            || signal.interface.as_deref() != Some(DBUS_INTERFACE)
            || signal.member != NAME_OWNER_CHANGED
        {
            return None;
        }
        match signal.args.as_slice() {
            [Value::Str(name), _, Value::Str(new_owner)] => Some(Self {
                name: name.clone(),
                new_owner: Some(new_owner.clone()).filter(|o| !o.is_empty()),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DBUS_PATH;

    #[test]
    fn test_set_owner_moves_name() {
        let mut table = OwnerTable::default();
        table.set_owner("com.example.A", Some(":1.1"));
        table.set_owner("com.example.B", Some(":1.1"));
        assert_eq!(
            table.names_for(":1.1").collect::<Vec<_>>(),
            vec!["com.example.A", "com.example.B"]
        );
        assert_eq!(table.owner_of("com.example.A"), Some(":1.1"));

        table.set_owner("com.example.A", Some(":1.2"));
        assert_eq!(table.names_for(":1.1").collect::<Vec<_>>(), vec!["com.example.B"]);
        assert_eq!(table.names_for(":1.2").collect::<Vec<_>>(), vec!["com.example.A"]);

        table.set_owner("com.example.B", None);
        assert_eq!(table.names_for(":1.1").count(), 0);
        assert_eq!(table.owner_of("com.example.B"), None);
    }

    #[test]
    fn test_parse_owner_change() {
        let signal = RawSignal::new(NAME_OWNER_CHANGED)
            .from_sender(DBUS_SERVICE)
            .at_path(DBUS_PATH)
            .on_interface(DBUS_INTERFACE)
            .with_args(vec!["com.example.A".into(), ":1.1".into(), "".into()]);
        assert_eq!(
            OwnerChange::parse(&signal),
            Some(OwnerChange {
                name: "com.example.A".to_string(),
                new_owner: None,
            })
        );

        let spoofed = signal.clone().from_sender(":1.9");
        assert_eq!(OwnerChange::parse(&spoofed), None);
    }
}

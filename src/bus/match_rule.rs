//! Signal match rules.
//!
//! A match rule asks the bus to forward signals that satisfy every field it
//! sets. Rendered in the `AddMatch` string form:
//!
//! ```text
//! type='signal',path='/com/example/Sender',interface='com.example.Sender',
//!     sender='com.example.Sender'
//! ```

use std::fmt;

use super::{RawSignal, Value, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE, NAME_OWNER_CHANGED};

/// A `type='signal'` match rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchRule {
    pub path: Option<String>,
    pub interface: Option<String>,
    pub sender: Option<String>,
    pub member: Option<String>,
    /// Required value of the first string argument.
    pub arg0: Option<String>,
}

impl MatchRule {
    /// Rule matching every signal.
    pub fn signals() -> Self {
        Self::default()
    }

    /// Sender-scoped rule installed once per listened sender.
    pub fn for_sender(path: &str, interface: &str, sender: &str) -> Self {
        Self::signals()
            .with_path(path)
            .with_interface(interface)
            .with_sender(sender)
    }

    /// Rule that tracks ownership changes of a single well-known name.
    pub fn name_owner_changed(name: &str) -> Self {
        Self::signals()
            .with_path(DBUS_PATH)
            .with_interface(DBUS_INTERFACE)
            .with_sender(DBUS_SERVICE)
            .with_member(NAME_OWNER_CHANGED)
            .with_arg0(name)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn with_arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    /// Check a delivered signal against this rule.
    ///
    /// `sender_names` holds every name the emitter is known by (its unique
    /// name plus any well-known names it owns); the `sender` field matches
    /// when any of them is equal.
    pub fn matches(&self, signal: &RawSignal, sender_names: &[&str]) -> bool {
        let sender_ok = match &self.sender {
            None => true,
            Some(sender) => sender_names.iter().any(|n| n == sender),
        };
        let arg0_ok = match &self.arg0 {
            None => true,
            Some(expected) => {
                signal.args.first().and_then(Value::as_str) == Some(expected.as_str())
            }
        };

        sender_ok
            && arg0_ok
            && field_matches(&self.path, signal.path.as_deref())
            && field_matches(&self.interface, signal.interface.as_deref())
            && field_matches(&self.member, Some(signal.member.as_str()))
    }
}

fn field_matches(rule: &Option<String>, actual: Option<&str>) -> bool {
    match rule {
        None => true,
        Some(expected) => actual == Some(expected.as_str()),
    }
}

/// Quote a match rule value. An apostrophe cannot appear inside quotes, so it
/// is written as close-quote, escaped apostrophe, reopen-quote.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type='signal'")?;
        let fields = [
            ("path", &self.path),
            ("interface", &self.interface),
            ("sender", &self.sender),
            ("member", &self.member),
            ("arg0", &self.arg0),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                write!(f, ",{}={}", key, quote(value))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed(sender: &str) -> RawSignal {
        RawSignal::new("StateChanged")
            .from_sender(sender)
            .at_path("/com/example/Sender")
            .on_interface("com.example.Sender")
    }

    #[test]
    fn test_sender_rule_string() {
        let rule = MatchRule::for_sender(
            "/com/example/Sender",
            "com.example.Sender",
            "com.example.Sender",
        );
        assert_eq!(
            rule.to_string(),
            "type='signal',path='/com/example/Sender',interface='com.example.Sender',\
             sender='com.example.Sender'"
        );
    }

    #[test]
    fn test_name_owner_changed_rule_string() {
        let rule = MatchRule::name_owner_changed("com.example.Sender");
        assert_eq!(
            rule.to_string(),
            "type='signal',path='/org/freedesktop/DBus',interface='org.freedesktop.DBus',\
             sender='org.freedesktop.DBus',member='NameOwnerChanged',arg0='com.example.Sender'"
        );
    }

    #[test]
    fn test_quote_apostrophe() {
        let rule = MatchRule::signals().with_arg0("it's");
        assert_eq!(rule.to_string(), r"type='signal',arg0='it'\''s'");
    }

    #[test]
    fn test_matches_any_sender_alias() {
        let rule = MatchRule::for_sender(
            "/com/example/Sender",
            "com.example.Sender",
            "com.example.Sender",
        );
        let signal = state_changed(":1.7");

        assert!(rule.matches(&signal, &[":1.7", "com.example.Sender"]));
        assert!(!rule.matches(&signal, &[":1.7"]));
    }

    #[test]
    fn test_matches_path_and_interface() {
        let rule = MatchRule::for_sender("/other", "com.example.Sender", ":1.7");
        assert!(!rule.matches(&state_changed(":1.7"), &[":1.7"]));

        let rule = MatchRule::for_sender("/com/example/Sender", "com.example.Other", ":1.7");
        assert!(!rule.matches(&state_changed(":1.7"), &[":1.7"]));
    }

    #[test]
    fn test_matches_arg0() {
        let rule = MatchRule::name_owner_changed("com.example.Sender");
        let signal = RawSignal::new(NAME_OWNER_CHANGED)
            .from_sender(DBUS_SERVICE)
            .at_path(DBUS_PATH)
            .on_interface(DBUS_INTERFACE)
            .with_args(vec!["com.example.Sender".into(), "".into(), ":1.3".into()]);
        assert!(rule.matches(&signal, &[DBUS_SERVICE]));

        let other = signal.clone().with_args(vec!["com.example.Other".into()]);
        assert!(!rule.matches(&other, &[DBUS_SERVICE]));
    }
}

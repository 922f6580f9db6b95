use core::str::FromStr;

use serde::{Deserialize, Serialize};

use roadlink_core::{DomainError, Language};

/// Authorization tag attached to a session.
///
/// The set is closed: the backend's `roles` table may carry more rows, but the
/// client only routes on these five. Anything else is treated as unrecognized
/// by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Driver,
    Admin,
    Manager,
    Supervisor,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Customer,
        Role::Driver,
        Role::Admin,
        Role::Manager,
        Role::Supervisor,
    ];

    /// Role assumed when no assignment can be found.
    pub const FALLBACK: Role = Role::Customer;

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Driver => "driver",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Supervisor => "supervisor",
        }
    }

    /// Parse a role tag (case-insensitive, surrounding whitespace ignored).
    pub fn parse(tag: &str) -> Option<Role> {
        let tag = tag.trim();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(tag))
    }

    pub fn is_valid(tag: &str) -> bool {
        Role::parse(tag).is_some()
    }

    pub fn is_driver(&self) -> bool {
        *self == Role::Driver
    }

    pub fn display_name(&self, language: Language) -> &'static str {
        match (self, language) {
            (Role::Customer, Language::En) => "Customer",
            (Role::Driver, Language::En) => "Driver",
            (Role::Admin, Language::En) => "Administrator",
            (Role::Manager, Language::En) => "Manager",
            (Role::Supervisor, Language::En) => "Supervisor",
            (Role::Customer, Language::Ar) => "عميل",
            (Role::Driver, Language::Ar) => "سائق",
            (Role::Admin, Language::Ar) => "مدير النظام",
            (Role::Manager, Language::Ar) => "مدير",
            (Role::Supervisor, Language::Ar) => "مشرف",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s).ok_or_else(|| DomainError::UnknownRole(s.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Role::parse("driver"), Some(Role::Driver));
        assert_eq!(Role::parse(" ADMIN "), Some(Role::Admin));
        assert_eq!(Role::parse("dispatcher"), None);
        assert!(!Role::is_valid(""));
    }

    #[test]
    fn tags_round_trip_through_display() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn fallback_is_customer() {
        assert_eq!(Role::FALLBACK, Role::Customer);
        assert_eq!(Role::default(), Role::FALLBACK);
    }

    #[test]
    fn display_names_follow_language() {
        assert_eq!(Role::Driver.display_name(Language::En), "Driver");
        assert_eq!(Role::Driver.display_name(Language::Ar), "سائق");
    }
}

//! Scope registry.
//!
//! Static mapping of provider services to the permission scopes that are
//! meaningful for them. Every service accepts `full`, which acts as a
//! superset grant for the rest of that service's scopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A third-party API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Mail,
    Calendar,
    Drive,
    Contacts,
    Meet,
}

/// A named permission granularity within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Readonly,
    Full,
    Send,
    Compose,
    Modify,
    Labels,
    Event,
    File,
    Metadata,
    OtherReadonly,
    Created,
}

/// Scopes assumed for a service name the registry does not know.
pub const DEFAULT_SCOPES: &[ScopeLevel] = &[ScopeLevel::Readonly, ScopeLevel::Full];

const MAIL_SCOPES: &[ScopeLevel] = &[
    ScopeLevel::Readonly,
    ScopeLevel::Send,
    ScopeLevel::Compose,
    ScopeLevel::Modify,
    ScopeLevel::Labels,
    ScopeLevel::Full,
];
const CALENDAR_SCOPES: &[ScopeLevel] = &[ScopeLevel::Readonly, ScopeLevel::Event, ScopeLevel::Full];
const DRIVE_SCOPES: &[ScopeLevel] = &[
    ScopeLevel::Readonly,
    ScopeLevel::File,
    ScopeLevel::Metadata,
    ScopeLevel::Full,
];
const CONTACTS_SCOPES: &[ScopeLevel] = &[
    ScopeLevel::Readonly,
    ScopeLevel::OtherReadonly,
    ScopeLevel::Full,
];
const MEET_SCOPES: &[ScopeLevel] = &[ScopeLevel::Readonly, ScopeLevel::Created, ScopeLevel::Full];

impl ServiceType {
    /// All services known to the registry.
    pub const ALL: [Self; 5] = [
        Self::Mail,
        Self::Calendar,
        Self::Drive,
        Self::Contacts,
        Self::Meet,
    ];

    /// Wire tag used in storage keys, URLs and API payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Calendar => "calendar",
            Self::Drive => "drive",
            Self::Contacts => "contacts",
            Self::Meet => "meet",
        }
    }

    /// Human-readable service name used in consent prompts.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Mail => "Mail",
            Self::Calendar => "Calendar",
            Self::Drive => "Drive",
            Self::Contacts => "Contacts",
            Self::Meet => "Meet",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|service| service.as_str() == s)
            .ok_or_else(|| Error::UnknownService(s.to_string()))
    }
}

impl ScopeLevel {
    /// Every scope tag, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Readonly,
        Self::Full,
        Self::Send,
        Self::Compose,
        Self::Modify,
        Self::Labels,
        Self::Event,
        Self::File,
        Self::Metadata,
        Self::OtherReadonly,
        Self::Created,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Readonly => "readonly",
            Self::Full => "full",
            Self::Send => "send",
            Self::Compose => "compose",
            Self::Modify => "modify",
            Self::Labels => "labels",
            Self::Event => "event",
            Self::File => "file",
            Self::Metadata => "metadata",
            Self::OtherReadonly => "other_readonly",
            Self::Created => "created",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| Error::UnknownScope(s.to_string()))
    }
}

/// Ordered set of scopes valid for a service. Always ends with `full`.
pub const fn valid_scopes_for(service: ServiceType) -> &'static [ScopeLevel] {
    match service {
        ServiceType::Mail => MAIL_SCOPES,
        ServiceType::Calendar => CALENDAR_SCOPES,
        ServiceType::Drive => DRIVE_SCOPES,
        ServiceType::Contacts => CONTACTS_SCOPES,
        ServiceType::Meet => MEET_SCOPES,
    }
}

/// Name-based lookup. Unrecognized services get [`DEFAULT_SCOPES`].
pub fn valid_scopes_for_name(name: &str) -> &'static [ScopeLevel] {
    name.parse::<ServiceType>()
        .map_or(DEFAULT_SCOPES, valid_scopes_for)
}

pub fn is_valid_scope(service: ServiceType, scope: ScopeLevel) -> bool {
    valid_scopes_for(service).contains(&scope)
}

/// Descriptive text shown to the user when asking for a grant.
pub const fn describe_scope(service: ServiceType, scope: ScopeLevel) -> &'static str {
    match (service, scope) {
        (ServiceType::Mail, ScopeLevel::Readonly) => "read your email messages and settings",
        (ServiceType::Mail, ScopeLevel::Send) => "send email on your behalf",
        (ServiceType::Mail, ScopeLevel::Compose) => "create and manage drafts and send email",
        (ServiceType::Mail, ScopeLevel::Modify) => {
            "read, compose and send email, and modify labels"
        }
        (ServiceType::Mail, ScopeLevel::Labels) => "create and manage mail labels",
        (ServiceType::Mail, ScopeLevel::Full) => {
            "read, compose, send and permanently delete all your email"
        }
        (ServiceType::Calendar, ScopeLevel::Readonly) => "view your calendars and events",
        (ServiceType::Calendar, ScopeLevel::Event) => "view and edit events on your calendars",
        (ServiceType::Calendar, ScopeLevel::Full) => {
            "see, edit, share and delete all your calendars"
        }
        (ServiceType::Drive, ScopeLevel::Readonly) => "see and download your files",
        (ServiceType::Drive, ScopeLevel::File) => "manage files created or opened with this app",
        (ServiceType::Drive, ScopeLevel::Metadata) => "view metadata for your files",
        (ServiceType::Drive, ScopeLevel::Full) => "see, edit, create and delete all your files",
        (ServiceType::Contacts, ScopeLevel::Readonly) => "see your contacts",
        (ServiceType::Contacts, ScopeLevel::OtherReadonly) => {
            "see contacts you have interacted with"
        }
        (ServiceType::Contacts, ScopeLevel::Full) => "see, edit, download and delete your contacts",
        (ServiceType::Meet, ScopeLevel::Readonly) => "see information about your meetings",
        (ServiceType::Meet, ScopeLevel::Created) => {
            "create and manage meetings started by this app"
        }
        (ServiceType::Meet, ScopeLevel::Full) => "create, view and manage all your meetings",
        _ => "access this feature",
    }
}

/// Provider OAuth scope a grant corresponds to.
pub const fn provider_scope(service: ServiceType, scope: ScopeLevel) -> Option<&'static str> {
    let uri = match (service, scope) {
        (ServiceType::Mail, ScopeLevel::Readonly) => {
            "https://www.googleapis.com/auth/gmail.readonly"
        }
        (ServiceType::Mail, ScopeLevel::Send) => "https://www.googleapis.com/auth/gmail.send",
        (ServiceType::Mail, ScopeLevel::Compose) => "https://www.googleapis.com/auth/gmail.compose",
        (ServiceType::Mail, ScopeLevel::Modify) => "https://www.googleapis.com/auth/gmail.modify",
        (ServiceType::Mail, ScopeLevel::Labels) => "https://www.googleapis.com/auth/gmail.labels",
        (ServiceType::Mail, ScopeLevel::Full) => "https://mail.google.com/",
        (ServiceType::Calendar, ScopeLevel::Readonly) => {
            "https://www.googleapis.com/auth/calendar.readonly"
        }
        (ServiceType::Calendar, ScopeLevel::Event) => {
            "https://www.googleapis.com/auth/calendar.events"
        }
        (ServiceType::Calendar, ScopeLevel::Full) => "https://www.googleapis.com/auth/calendar",
        (ServiceType::Drive, ScopeLevel::Readonly) => {
            "https://www.googleapis.com/auth/drive.readonly"
        }
        (ServiceType::Drive, ScopeLevel::File) => "https://www.googleapis.com/auth/drive.file",
        (ServiceType::Drive, ScopeLevel::Metadata) => {
            "https://www.googleapis.com/auth/drive.metadata.readonly"
        }
        (ServiceType::Drive, ScopeLevel::Full) => "https://www.googleapis.com/auth/drive",
        (ServiceType::Contacts, ScopeLevel::Readonly) => {
            "https://www.googleapis.com/auth/contacts.readonly"
        }
        (ServiceType::Contacts, ScopeLevel::OtherReadonly) => {
            "https://www.googleapis.com/auth/contacts.other.readonly"
        }
        (ServiceType::Contacts, ScopeLevel::Full) => "https://www.googleapis.com/auth/contacts",
        (ServiceType::Meet, ScopeLevel::Readonly) => {
            "https://www.googleapis.com/auth/meetings.space.readonly"
        }
        (ServiceType::Meet, ScopeLevel::Created) => {
            "https://www.googleapis.com/auth/meetings.space.created"
        }
        _ => return None,
    };
    Some(uri)
}

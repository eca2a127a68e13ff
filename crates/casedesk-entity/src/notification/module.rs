//! UI module buckets used for unread badges.

use serde::{Deserialize, Serialize};

/// A UI-facing grouping of notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AppModule {
    /// Case (matter) activity.
    Cases,
    /// Court hearings.
    Hearings,
    /// Tasks and deadlines.
    Tasks,
    /// Documents.
    Documents,
    /// Clients and contacts.
    Clients,
    /// Firm team.
    Team,
    /// Notes.
    Notes,
    /// Chat and direct messages.
    Chat,
}

enum Rule {
    Prefix(&'static str),
    Contains(&'static str),
}

impl Rule {
    fn matches(&self, notification_type: &str) -> bool {
        match self {
            Self::Prefix(p) => notification_type.starts_with(p),
            Self::Contains(s) => notification_type.contains(s),
        }
    }
}

// Evaluated top to bottom; first match wins.
const RULES: &[(Rule, AppModule)] = &[
    (Rule::Prefix("case_"), AppModule::Cases),
    (Rule::Prefix("hearing_"), AppModule::Hearings),
    (Rule::Prefix("task_"), AppModule::Tasks),
    (Rule::Prefix("document_"), AppModule::Documents),
    (Rule::Prefix("client_"), AppModule::Clients),
    (Rule::Contains("contact_"), AppModule::Clients),
    (Rule::Prefix("team_"), AppModule::Team),
    (Rule::Prefix("note_"), AppModule::Notes),
    (Rule::Prefix("message_"), AppModule::Chat),
    (Rule::Contains("direct_message"), AppModule::Chat),
];

impl AppModule {
    /// Every module, in display order.
    pub const ALL: [AppModule; 8] = [
        Self::Cases,
        Self::Hearings,
        Self::Tasks,
        Self::Documents,
        Self::Clients,
        Self::Team,
        Self::Notes,
        Self::Chat,
    ];

    /// Map a notification type to its module; `None` for unrecognized types.
    pub fn classify(notification_type: &str) -> Option<Self> {
        RULES
            .iter()
            .find(|(rule, _)| rule.matches(notification_type))
            .map(|(_, module)| *module)
    }

    /// Return the module name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cases => "Cases",
            Self::Hearings => "Hearings",
            Self::Tasks => "Tasks",
            Self::Documents => "Documents",
            Self::Clients => "Clients",
            Self::Team => "Team",
            Self::Notes => "Notes",
            Self::Chat => "Chat",
        }
    }
}

impl std::fmt::Display for AppModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Core data model: entities (nouns), relationships (verbs), and the closed
//! type vocabularies validated at write time.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Arbitrary JSON-like metadata tree attached to an entity or verb.
///
/// `serde_json::Map<String, Value>` already is the tagged union the design
/// notes call for (`null | bool | i64 | f64 | string | array | map`), so we
/// use it directly rather than inventing a parallel type.
pub type Metadata = Map<String, Value>;

/// Metadata keys the store treats specially; callers may still set them, but
/// the VFS and blob layers read/write through these names.
pub const RESERVED_KEYS: &[&str] = &[
    "vfsType", "path", "name", "storage", "size", "rawData", "vfsPath",
];

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $str:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[doc = $str] $variant),+
        }

        impl $name {
            /// All variants, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical lowercase-ish name used in the wire format.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $str),+
                }
            }

            /// Parse from the canonical name. Unknown names are rejected;
            /// the specification treats an unknown type as a fatal write error.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($str => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::parse(s).ok_or_else(|| format!("unknown {}: {}", stringify!($name), s))
            }
        }
    };
}

closed_enum! {
    /// Closed set of entity ("noun") types.
    NounType {
        Person => "Person",
        Organization => "Organization",
        Document => "Document",
        Concept => "Concept",
        Location => "Location",
        Event => "Event",
        File => "File",
        Directory => "Directory",
        Project => "Project",
        Task => "Task",
        Issue => "Issue",
        Comment => "Comment",
        Message => "Message",
        Email => "Email",
        Meeting => "Meeting",
        Topic => "Topic",
        Tag => "Tag",
        Skill => "Skill",
        Tool => "Tool",
        Product => "Product",
        Service => "Service",
        Team => "Team",
        Role => "Role",
        Goal => "Goal",
        Decision => "Decision",
        Question => "Question",
        Answer => "Answer",
        Note => "Note",
        Reference => "Reference",
        Citation => "Citation",
        Dataset => "Dataset",
        Model => "Model",
        Experiment => "Experiment",
        Metric => "Metric",
        Report => "Report",
        Image => "Image",
        Video => "Video",
        Audio => "Audio",
        Code => "Code",
        Repository => "Repository",
        Commit => "Commit",
        Session => "Session",
    }
}

closed_enum! {
    /// Closed set of relationship ("verb") types.
    ///
    /// The specification describes ~127 verbs; this vocabulary covers the
    /// common relational, organizational, and provenance relationships a
    /// knowledge graph needs and is deliberately extensible by appending new
    /// variants (see DESIGN.md).
    VerbType {
        Contains => "Contains",
        ContainedBy => "ContainedBy",
        MemberOf => "MemberOf",
        HasMember => "HasMember",
        References => "References",
        ReferencedBy => "ReferencedBy",
        RelatesTo => "RelatesTo",
        Creates => "Creates",
        CreatedBy => "CreatedBy",
        Owns => "Owns",
        OwnedBy => "OwnedBy",
        PartOf => "PartOf",
        HasPart => "HasPart",
        DependsOn => "DependsOn",
        DependencyOf => "DependencyOf",
        Precedes => "Precedes",
        Follows => "Follows",
        Causes => "Causes",
        CausedBy => "CausedBy",
        Mentions => "Mentions",
        MentionedIn => "MentionedIn",
        Cites => "Cites",
        CitedBy => "CitedBy",
        AuthoredBy => "AuthoredBy",
        Authors => "Authors",
        Assigns => "Assigns",
        AssignedTo => "AssignedTo",
        Manages => "Manages",
        ManagedBy => "ManagedBy",
        ReportsTo => "ReportsTo",
        Supervises => "Supervises",
        CollaboratesWith => "CollaboratesWith",
        WorksOn => "WorksOn",
        WorksAt => "WorksAt",
        LocatedIn => "LocatedIn",
        LocationOf => "LocationOf",
        Attends => "Attends",
        AttendedBy => "AttendedBy",
        Organizes => "Organizes",
        OrganizedBy => "OrganizedBy",
        ParticipatesIn => "ParticipatesIn",
        HasParticipant => "HasParticipant",
        Blocks => "Blocks",
        BlockedBy => "BlockedBy",
        Resolves => "Resolves",
        ResolvedBy => "ResolvedBy",
        Implements => "Implements",
        ImplementedBy => "ImplementedBy",
        Extends => "Extends",
        ExtendedBy => "ExtendedBy",
        Uses => "Uses",
        UsedBy => "UsedBy",
        Imports => "Imports",
        ImportedBy => "ImportedBy",
        TaggedWith => "TaggedWith",
        Tags => "Tags",
        RepliesTo => "RepliesTo",
        HasReply => "HasReply",
        Forwards => "Forwards",
        DerivesFrom => "DerivesFrom",
        HasDerivative => "HasDerivative",
        Supersedes => "Supersedes",
        SupersededBy => "SupersededBy",
        Duplicates => "Duplicates",
        DuplicateOf => "DuplicateOf",
        MergesInto => "MergesInto",
        HasMerge => "HasMerge",
        BranchesFrom => "BranchesFrom",
        HasBranch => "HasBranch",
        Triggers => "Triggers",
        TriggeredBy => "TriggeredBy",
        Approves => "Approves",
        ApprovedBy => "ApprovedBy",
        Rejects => "Rejects",
        RejectedBy => "RejectedBy",
        Reviews => "Reviews",
        ReviewedBy => "ReviewedBy",
        Schedules => "Schedules",
        ScheduledFor => "ScheduledFor",
        Completes => "Completes",
        CompletedBy => "CompletedBy",
        Attaches => "Attaches",
        AttachedTo => "AttachedTo",
        SimilarTo => "SimilarTo",
        RespondsTo => "RespondsTo",
    }
}

/// A stored entity: a typed record with metadata and an optional embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entity_type: NounType,
    /// Dense embedding. Empty on reads of metadata-only markers; never empty
    /// on a write unless the caller never supplied data/vector to embed.
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub service: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity {
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A stored relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verb {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    #[serde(rename = "type")]
    pub verb_type: VerbType,
    pub metadata: Metadata,
    pub bidirectional: bool,
}

/// Parse a user-supplied UUID string, rejecting anything that isn't
/// canonical UUID form as the specification requires for custom ids.
pub fn parse_uuid(s: &str) -> Result<Uuid, crate::Error> {
    Uuid::parse_str(s).map_err(|e| crate::Error::invalid(format!("invalid id {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noun_type_round_trips() {
        for t in NounType::ALL {
            assert_eq!(NounType::parse(t.as_str()), Some(*t));
        }
    }

    #[test]
    fn verb_type_round_trips() {
        for t in VerbType::ALL {
            assert_eq!(VerbType::parse(t.as_str()), Some(*t));
        }
    }

    #[test]
    fn unknown_noun_type_rejected() {
        assert_eq!(NounType::parse("NotAType"), None);
    }
}

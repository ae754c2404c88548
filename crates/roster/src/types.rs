//! Common types shared by the ledger, attachment store, coordinator and catalog.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RosterError;

/// Identity of a lecturer, generated by the relational store on insert.
///
/// Wraps a raw `i64` so that entity ids cannot be confused with ranks or
/// other integers.
///
/// # Examples
///
/// ```
/// use faculty_roster::EntityId;
///
/// let id = EntityId::from(42);
/// assert_eq!(i64::from(id), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<EntityId> for i64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 1-based position within a partition.
///
/// # Examples
///
/// ```
/// use faculty_roster::Rank;
///
/// assert_eq!(Rank::FIRST.get(), 1);
/// assert_eq!(Rank::FIRST.next().get(), 2);
/// assert!(Rank::new(0).is_none());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Rank(u32);

impl Rank {
    /// The first rank of every partition.
    pub const FIRST: Rank = Rank(1);

    /// Creates a rank, returning `None` for zero.
    #[must_use]
    pub fn new(value: u32) -> Option<Self> {
        (value >= 1).then_some(Self(value))
    }

    /// Returns the raw 1-based value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Returns the rank immediately after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the rank immediately before this one, or `None` for [`Rank::FIRST`].
    #[must_use]
    pub fn prev(self) -> Option<Self> {
        Self::new(self.0.saturating_sub(1))
    }
}

impl TryFrom<u32> for Rank {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "rank must be at least 1".to_owned())
    }
}

impl From<Rank> for u32 {
    fn from(rank: Rank) -> Self {
        rank.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ranking category. Ranks are dense and independent per partition.
///
/// The set of partitions is closed so that store implementations never build
/// table or column names from caller input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    /// Full-time lecturers.
    FullTime,
    /// Part-time lecturers.
    PartTime,
}

impl Partition {
    /// Every partition, in the order listings concatenate them.
    pub const ALL: [Partition; 2] = [Partition::FullTime, Partition::PartTime];

    /// Returns the external name of the partition.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullTime => "full-time",
            Self::PartTime => "part-time",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RosterError::invalid_input(format!("unknown lecturer type: {s:?}")))
    }
}

/// Deterministic name of a lecturer's attachment blob.
///
/// The name is derived from the lecturer's identity so that the owning
/// entity of any blob can be recomputed without extra bookkeeping.
///
/// # Examples
///
/// ```
/// use faculty_roster::{AttachmentName, EntityId};
///
/// let name = AttachmentName::for_lecturer(EntityId::from(12), "Ada Lovelace");
/// assert_eq!(name.as_str(), "12-Ada Lovelace");
/// assert_eq!(name.owner(), Some(EntityId::from(12)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentName(String);

impl AttachmentName {
    /// Builds the attachment name for a lecturer: `"{id}-{name}"`.
    #[must_use]
    pub fn for_lecturer(id: EntityId, name: &str) -> Self {
        Self(format!("{id}-{name}"))
    }

    /// Wraps a stored attachment name as read back from the relational store.
    #[must_use]
    pub fn from_stored(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the object name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the owning entity from the name prefix.
    #[must_use]
    pub fn owner(&self) -> Option<EntityId> {
        let (id, _) = self.0.split_once('-')?;
        id.parse::<i64>().ok().map(EntityId)
    }
}

impl fmt::Display for AttachmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptive attributes of a lecturer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct LecturerProfile {
    /// Display name.
    #[builder(into)]
    pub name: String,
    /// Job title.
    #[builder(into)]
    pub designation: String,
    /// Academic qualifications.
    #[builder(into)]
    pub qualifications: String,
    /// External profile link.
    #[builder(into)]
    pub linkedin: Option<String>,
}

impl LecturerProfile {
    /// Rejects profiles that cannot be stored or used to derive an attachment name.
    pub(crate) fn validate(&self) -> Result<(), RosterError> {
        if self.name.trim().is_empty() {
            return Err(RosterError::invalid_input("name must not be blank"));
        }
        if self.name.contains('/') {
            return Err(RosterError::invalid_input("name must not contain '/'"));
        }
        if self.designation.trim().is_empty() {
            return Err(RosterError::invalid_input("designation must not be blank"));
        }
        Ok(())
    }
}

/// A lecturer row as held by the relational store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LecturerRecord {
    /// Store-generated identity.
    pub id: EntityId,
    /// The partition the lecturer is ranked in.
    pub partition: Partition,
    /// Descriptive attributes.
    pub profile: LecturerProfile,
    /// Name of the attachment blob, if any.
    pub attachment: Option<AttachmentName>,
}

/// One row of the rank ledger.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankEntry {
    /// The partition the rank belongs to.
    pub partition: Partition,
    /// The ranked lecturer.
    pub entity: EntityId,
    /// The lecturer's position within the partition.
    pub rank: Rank,
}

/// A lecturer row joined with its rank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedLecturer {
    /// The lecturer row.
    pub record: LecturerRecord,
    /// The lecturer's position within its partition.
    pub rank: Rank,
}

/// Binary attachment supplied with a create request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentPayload {
    /// Raw blob contents.
    pub bytes: Bytes,
    /// MIME type forwarded to the object store.
    pub content_type: String,
}

impl AttachmentPayload {
    /// Creates a payload from raw bytes and a MIME type.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), content_type: content_type.into() }
    }

    /// Returns `true` if there are no bytes to upload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A request to create a ranked lecturer.
///
/// # Examples
///
/// ```
/// use faculty_roster::{LecturerProfile, NewLecturer, Partition};
///
/// let request = NewLecturer::builder()
///     .partition(Partition::FullTime)
///     .profile(
///         LecturerProfile::builder()
///             .name("Grace Hopper")
///             .designation("Senior Lecturer")
///             .qualifications("PhD")
///             .build(),
///     )
///     .build();
/// assert!(request.picture.is_none());
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct NewLecturer {
    /// The partition to rank the lecturer in.
    pub partition: Partition,
    /// Descriptive attributes.
    pub profile: LecturerProfile,
    /// Optional picture. An empty payload is treated as absent.
    pub picture: Option<AttachmentPayload>,
}

/// A time-bounded URL granting read access to one attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    /// The URL to hand to clients.
    pub url: String,
    /// When the URL stops granting access.
    pub expires_at: DateTime<Utc>,
}

/// Metadata returned by the object store after a successful upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHandle {
    /// The object name.
    pub name: String,
    /// Stored size in bytes.
    pub size: u64,
    /// Stored MIME type.
    pub content_type: String,
    /// Store-assigned generation of this object version.
    pub generation: u64,
}

/// A fully populated lecturer, as returned by a successful create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lecturer {
    /// Store-generated identity.
    pub id: EntityId,
    /// The partition the lecturer is ranked in.
    pub partition: Partition,
    /// The lecturer's position within its partition.
    pub rank: Rank,
    /// Descriptive attributes.
    pub profile: LecturerProfile,
    /// Name of the attachment blob, if any.
    pub attachment: Option<AttachmentName>,
    /// Freshly signed access URL for the attachment, if any.
    pub picture_url: Option<SignedUrl>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_parse_is_case_insensitive() {
        assert_eq!("full-time".parse::<Partition>().unwrap(), Partition::FullTime);
        assert_eq!("Part-Time".parse::<Partition>().unwrap(), Partition::PartTime);
        assert_eq!(" FULL-TIME ".parse::<Partition>().unwrap(), Partition::FullTime);
    }

    #[test]
    fn test_partition_parse_rejects_unknown() {
        let err = "visiting".parse::<Partition>().unwrap_err();
        assert!(matches!(err, RosterError::InvalidInput { .. }));
    }

    #[test]
    fn test_partition_serde_uses_external_names() {
        let json = serde_json::to_string(&Partition::PartTime).unwrap();
        assert_eq!(json, r#""part-time""#);
        let parsed: Partition = serde_json::from_str(r#""full-time""#).unwrap();
        assert_eq!(parsed, Partition::FullTime);
    }

    #[test]
    fn test_rank_rejects_zero() {
        assert!(Rank::new(0).is_none());
        assert!(serde_json::from_str::<Rank>("0").is_err());
        assert_eq!(serde_json::from_str::<Rank>("3").unwrap().get(), 3);
    }

    #[test]
    fn test_rank_prev_stops_at_first() {
        assert_eq!(Rank::FIRST.prev(), None);
        assert_eq!(Rank::new(4).unwrap().prev(), Rank::new(3));
    }

    #[test]
    fn test_attachment_name_owner_round_trips() {
        let name = AttachmentName::for_lecturer(EntityId::from(305), "Jane-Doe");
        assert_eq!(name.as_str(), "305-Jane-Doe");
        assert_eq!(name.owner(), Some(EntityId::from(305)));
        assert_eq!(AttachmentName::from_stored("orphan").owner(), None);
    }

    #[test]
    fn test_profile_validation() {
        let ok = LecturerProfile::builder().name("A").designation("Lecturer").qualifications("").build();
        assert!(ok.validate().is_ok());

        let blank = LecturerProfile { name: "  ".into(), ..ok.clone() };
        assert!(matches!(blank.validate(), Err(RosterError::InvalidInput { .. })));

        let slash = LecturerProfile { name: "a/b".into(), ..ok };
        assert!(slash.validate().is_err());
    }
}

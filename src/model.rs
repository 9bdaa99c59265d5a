use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LinkageError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    Birth,
    Death,
    Marriage,
}

impl RecordKind {
    pub fn field_count(self) -> usize {
        match self {
            RecordKind::Birth => BirthField::COUNT,
            RecordKind::Death => DeathField::COUNT,
            RecordKind::Marriage => MarriageField::COUNT,
        }
    }
}

/// Generates a per-kind field id space: a fieldless enum whose discriminant is the
/// storage slot, plus the canonical upper-case name used in JSON input.
macro_rules! field_space {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const COUNT: usize = $name::ALL.len();

            #[inline(always)]
            pub fn slot(self) -> usize {
                self as usize
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

field_space!(
    /// Fields of a birth registration.
    BirthField {
        StandardisedId => "STANDARDISED_ID",
        Forename => "FORENAME",
        Surname => "SURNAME",
        Sex => "SEX",
        BirthDay => "BIRTH_DAY",
        BirthMonth => "BIRTH_MONTH",
        BirthYear => "BIRTH_YEAR",
        BirthAddress => "BIRTH_ADDRESS",
        FatherForename => "FATHER_FORENAME",
        FatherSurname => "FATHER_SURNAME",
        FatherOccupation => "FATHER_OCCUPATION",
        MotherForename => "MOTHER_FORENAME",
        MotherMaidenSurname => "MOTHER_MAIDEN_SURNAME",
        MotherOccupation => "MOTHER_OCCUPATION",
        ParentsPlaceOfMarriage => "PARENTS_PLACE_OF_MARRIAGE",
        ParentsDayOfMarriage => "PARENTS_DAY_OF_MARRIAGE",
        ParentsMonthOfMarriage => "PARENTS_MONTH_OF_MARRIAGE",
        ParentsYearOfMarriage => "PARENTS_YEAR_OF_MARRIAGE",
        ChildIdentity => "CHILD_IDENTITY",
        MotherIdentity => "MOTHER_IDENTITY",
        FatherIdentity => "FATHER_IDENTITY",
        FamilyIdentity => "FAMILY",
        DeathRecordIdentity => "DEATH_RECORD_IDENTITY",
        ParentMarriageRecordIdentity => "PARENT_MARRIAGE_RECORD_IDENTITY",
    }
);

field_space!(
    /// Fields of a death registration.
    DeathField {
        StandardisedId => "STANDARDISED_ID",
        Forename => "FORENAME",
        Surname => "SURNAME",
        Sex => "SEX",
        FatherForename => "FATHER_FORENAME",
        FatherSurname => "FATHER_SURNAME",
        FatherOccupation => "FATHER_OCCUPATION",
        MotherForename => "MOTHER_FORENAME",
        MotherMaidenSurname => "MOTHER_MAIDEN_SURNAME",
        DateOfBirth => "DATE_OF_BIRTH",
        DeathDay => "DEATH_DAY",
        DeathMonth => "DEATH_MONTH",
        DeathYear => "DEATH_YEAR",
        AgeAtDeath => "AGE_AT_DEATH",
        PlaceOfDeath => "PLACE_OF_DEATH",
        Occupation => "OCCUPATION",
        MaritalStatus => "MARITAL_STATUS",
        SpouseNames => "SPOUSE_NAMES",
        DeceasedIdentity => "DECEASED_IDENTITY",
        BirthRecordIdentity => "BIRTH_RECORD_IDENTITY",
        FatherIdentity => "FATHER_IDENTITY",
        MotherIdentity => "MOTHER_IDENTITY",
        FamilyIdentity => "FAMILY",
    }
);

field_space!(
    /// Fields of a marriage registration. Both spouses live on the same record.
    MarriageField {
        StandardisedId => "STANDARDISED_ID",
        MarriageDay => "MARRIAGE_DAY",
        MarriageMonth => "MARRIAGE_MONTH",
        MarriageYear => "MARRIAGE_YEAR",
        PlaceOfMarriage => "PLACE_OF_MARRIAGE",
        BrideForename => "BRIDE_FORENAME",
        BrideSurname => "BRIDE_SURNAME",
        BrideAgeOrDateOfBirth => "BRIDE_AGE_OR_DATE_OF_BIRTH",
        BrideOccupation => "BRIDE_OCCUPATION",
        BrideFatherForename => "BRIDE_FATHER_FORENAME",
        BrideFatherSurname => "BRIDE_FATHER_SURNAME",
        BrideMotherForename => "BRIDE_MOTHER_FORENAME",
        BrideMotherMaidenSurname => "BRIDE_MOTHER_MAIDEN_SURNAME",
        GroomForename => "GROOM_FORENAME",
        GroomSurname => "GROOM_SURNAME",
        GroomAgeOrDateOfBirth => "GROOM_AGE_OR_DATE_OF_BIRTH",
        GroomOccupation => "GROOM_OCCUPATION",
        GroomFatherForename => "GROOM_FATHER_FORENAME",
        GroomFatherSurname => "GROOM_FATHER_SURNAME",
        GroomMotherForename => "GROOM_MOTHER_FORENAME",
        GroomMotherMaidenSurname => "GROOM_MOTHER_MAIDEN_SURNAME",
        BrideIdentity => "BRIDE_IDENTITY",
        GroomIdentity => "GROOM_IDENTITY",
        BrideBirthRecordIdentity => "BRIDE_BIRTH_RECORD_IDENTITY",
        GroomBirthRecordIdentity => "GROOM_BIRTH_RECORD_IDENTITY",
    }
);

/// A field id qualified by the record kind it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Birth(BirthField),
    Death(DeathField),
    Marriage(MarriageField),
}

impl Field {
    pub fn kind(self) -> RecordKind {
        match self {
            Field::Birth(_) => RecordKind::Birth,
            Field::Death(_) => RecordKind::Death,
            Field::Marriage(_) => RecordKind::Marriage,
        }
    }

    pub fn slot(self) -> usize {
        match self {
            Field::Birth(f) => f.slot(),
            Field::Death(f) => f.slot(),
            Field::Marriage(f) => f.slot(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Birth(f) => f.name(),
            Field::Death(f) => f.name(),
            Field::Marriage(f) => f.name(),
        }
    }

    pub fn from_name(kind: RecordKind, name: &str) -> Option<Field> {
        match kind {
            RecordKind::Birth => BirthField::from_name(name).map(Field::Birth),
            RecordKind::Death => DeathField::from_name(name).map(Field::Death),
            RecordKind::Marriage => MarriageField::from_name(name).map(Field::Marriage),
        }
    }

    /// The field holding the record's own identifier in the source dataset.
    pub fn standardised_id(kind: RecordKind) -> Field {
        match kind {
            RecordKind::Birth => Field::Birth(BirthField::StandardisedId),
            RecordKind::Death => Field::Death(DeathField::StandardisedId),
            RecordKind::Marriage => Field::Marriage(MarriageField::StandardisedId),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{}", self.kind(), self.name())
    }
}

impl From<BirthField> for Field {
    fn from(f: BirthField) -> Self {
        Field::Birth(f)
    }
}

impl From<DeathField> for Field {
    fn from(f: DeathField) -> Self {
        Field::Death(f)
    }
}

impl From<MarriageField> for Field {
    fn from(f: MarriageField) -> Self {
        Field::Marriage(f)
    }
}

/// One registration. Values are stored positionally by field slot; unset fields read as "".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordRepr", into = "RecordRepr")]
pub struct Record {
    pub id: Uuid,
    kind: RecordKind,
    values: Vec<String>,
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Self::with_id(Uuid::new_v4(), kind)
    }

    pub fn with_id(id: Uuid, kind: RecordKind) -> Self {
        Self {
            id,
            kind,
            values: vec![String::new(); kind.field_count()],
        }
    }

    pub fn birth<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (BirthField, V)>,
        V: Into<String>,
    {
        let mut record = Self::new(RecordKind::Birth);
        for (field, value) in values {
            record.values[field.slot()] = value.into();
        }
        record
    }

    pub fn death<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (DeathField, V)>,
        V: Into<String>,
    {
        let mut record = Self::new(RecordKind::Death);
        for (field, value) in values {
            record.values[field.slot()] = value.into();
        }
        record
    }

    pub fn marriage<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (MarriageField, V)>,
        V: Into<String>,
    {
        let mut record = Self::new(RecordKind::Marriage);
        for (field, value) in values {
            record.values[field.slot()] = value.into();
        }
        record
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Reads a field. A field of another kind reads as "".
    #[inline(always)]
    pub fn get(&self, field: impl Into<Field>) -> &str {
        let field = field.into();
        if field.kind() != self.kind {
            return "";
        }
        self.values.get(field.slot()).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: impl Into<Field>, value: impl Into<String>) -> Result<()> {
        let field = field.into();
        if field.kind() != self.kind {
            return Err(LinkageError::FieldKindMismatch { field, kind: self.kind });
        }
        self.values[field.slot()] = value.into();
        Ok(())
    }
}

/// Wire form of a record: named fields, optional id.
#[derive(Serialize, Deserialize)]
struct RecordRepr {
    #[serde(default)]
    id: Option<Uuid>,
    kind: RecordKind,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

impl TryFrom<RecordRepr> for Record {
    type Error = LinkageError;

    fn try_from(repr: RecordRepr) -> Result<Self> {
        let mut record = Record::with_id(repr.id.unwrap_or_else(Uuid::new_v4), repr.kind);
        for (name, value) in repr.fields {
            let field = Field::from_name(repr.kind, &name).ok_or_else(|| {
                LinkageError::Config(format!("unknown {:?} field '{}'", repr.kind, name))
            })?;
            record.set(field, value)?;
        }
        Ok(record)
    }
}

impl From<Record> for RecordRepr {
    fn from(record: Record) -> Self {
        let kind = record.kind;
        let fields = record
            .values
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_empty())
            .filter_map(|(slot, v)| slot_name(kind, slot).map(|n| (n.to_string(), v)))
            .collect();
        Self { id: Some(record.id), kind, fields }
    }
}

fn slot_name(kind: RecordKind, slot: usize) -> Option<&'static str> {
    match kind {
        RecordKind::Birth => BirthField::ALL.get(slot).map(|f| f.name()),
        RecordKind::Death => DeathField::ALL.get(slot).map(|f| f.name()),
        RecordKind::Marriage => MarriageField::ALL.get(slot).map(|f| f.name()),
    }
}

/// Positional translation table between the fields of two schemas.
/// `left[i]` on one side corresponds to `right[i]` on the other.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    left: Vec<Field>,
    right: Vec<Field>,
}

impl FieldMapping {
    pub fn new(left: Vec<Field>, right: Vec<Field>) -> Result<Self> {
        if left.is_empty() || left.len() != right.len() {
            return Err(LinkageError::Config(format!(
                "field lists must be non-empty and of equal length (got {} and {})",
                left.len(),
                right.len()
            )));
        }
        for side in [&left, &right] {
            let kind = side[0].kind();
            if let Some(f) = side.iter().find(|f| f.kind() != kind) {
                return Err(LinkageError::FieldKindMismatch { field: *f, kind });
            }
        }
        Ok(Self { left, right })
    }

    pub fn identity(fields: Vec<Field>) -> Result<Self> {
        Self::new(fields.clone(), fields)
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn left(&self) -> &[Field] {
        &self.left
    }

    pub fn right(&self) -> &[Field] {
        &self.right
    }

    pub fn left_kind(&self) -> RecordKind {
        self.left[0].kind()
    }

    pub fn right_kind(&self) -> RecordKind {
        self.right[0].kind()
    }

    pub fn to_right(&self, field: Field) -> Option<Field> {
        self.left.iter().position(|f| *f == field).map(|i| self.right[i])
    }

    pub fn to_left(&self, field: Field) -> Option<Field> {
        self.right.iter().position(|f| *f == field).map(|i| self.left[i])
    }

    pub fn reversed(&self) -> Self {
        Self {
            left: self.right.clone(),
            right: self.left.clone(),
        }
    }

    pub fn side(&self, side: Side) -> &[Field] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// The fields on whichever side matches `record`'s kind (left wins for same-kind mappings).
    pub fn fields_for(&self, record: &Record) -> &[Field] {
        if record.kind() == self.left_kind() {
            &self.left
        } else {
            &self.right
        }
    }

    /// Sides for reading `a` and `b`: cross-kind pairs by kind, same-kind pairs in argument order.
    pub fn orient(&self, a: &Record, b: &Record) -> (Side, Side) {
        if a.kind() != self.left_kind() && b.kind() == self.left_kind() {
            (Side::Right, Side::Left)
        } else {
            (Side::Left, Side::Right)
        }
    }

    /// Value pairs for each aligned field, `a` read through the `a_side` fields and `b`
    /// through the `b_side` fields. Both records may be read through the same side.
    pub fn values_on<'r>(
        &'r self,
        a: &'r Record,
        a_side: Side,
        b: &'r Record,
        b_side: Side,
    ) -> impl Iterator<Item = (&'r str, &'r str)> + 'r {
        self.side(a_side)
            .iter()
            .zip(self.side(b_side).iter())
            .map(move |(fa, fb)| (a.get(*fa), b.get(*fb)))
    }

    /// Value pairs for each aligned field, left value first, with the records oriented
    /// by [`orient`](Self::orient).
    pub fn aligned_values<'r>(
        &'r self,
        a: &'r Record,
        b: &'r Record,
    ) -> impl Iterator<Item = (&'r str, &'r str)> + 'r {
        let (l, r) = match self.orient(a, b) {
            (Side::Left, _) => (a, b),
            (Side::Right, _) => (b, a),
        };
        self.values_on(l, Side::Left, r, Side::Right)
    }
}

/// Which field list of a [`FieldMapping`] a record is read through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// A scored candidate pair. Immutable once built.
#[derive(Debug, Clone, Copy)]
pub struct RecordPair<'a> {
    record1: &'a Record,
    record2: &'a Record,
    distance: f64,
}

impl<'a> RecordPair<'a> {
    pub fn new(record1: &'a Record, record2: &'a Record, distance: f64) -> Self {
        Self { record1, record2, distance }
    }

    pub fn record1(&self) -> &'a Record {
        self.record1
    }

    pub fn record2(&self) -> &'a Record {
        self.record2
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// The pair ordered so that the `first` kind comes first, if the kinds allow it.
    pub fn oriented(&self, first: RecordKind) -> (&'a Record, &'a Record) {
        if self.record1.kind() != first && self.record2.kind() == first {
            (self.record2, self.record1)
        } else {
            (self.record1, self.record2)
        }
    }
}

/// A record acting in a named role, e.g. the "baby" on a birth record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleTag {
    pub record_id: Uuid,
    pub kind: RecordKind,
    pub role: String,
}

impl RoleTag {
    pub fn new(record: &Record, role: impl Into<String>) -> Self {
        Self {
            record_id: record.id,
            kind: record.kind(),
            role: role.into(),
        }
    }
}

/// An accepted link. Equality and hashing consider only the two roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub role1: RoleTag,
    pub role2: RoleTag,
    pub confidence: f64,
    pub link_type: String,
    pub distance: f64,
    pub provenance: Vec<String>,
}

/// Ground truth links share the link shape; they are only ever compared against.
pub type GroundTruthLink = Link;

impl Link {
    pub fn new(
        role1: RoleTag,
        role2: RoleTag,
        link_type: impl Into<String>,
        distance: f64,
        provenance: Vec<String>,
    ) -> Self {
        Self {
            role1,
            role2,
            confidence: 1.0,
            link_type: link_type.into(),
            distance,
            provenance,
        }
    }

    /// Orders the roles so that (a, b) and (b, a) of a symmetric relation coincide.
    pub fn canonical(mut self) -> Self {
        if self.role2 < self.role1 {
            std::mem::swap(&mut self.role1, &mut self.role2);
        }
        self
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.role1 == other.role1 && self.role2 == other.role2
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.role1.hash(state);
        self.role2.hash(state);
    }
}
